use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Stable hexadecimal digest of the canonical JSON encoding of `value`.
///
/// Object keys are sorted by `serde_json::Value`, so field order in the
/// source struct never changes the result.
pub fn stable_digest<T: Serialize>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// `<label>-<first 12 digest characters>`, the naming scheme for artifacts.
pub fn artifact_stem<T: Serialize>(label: &str, value: &T) -> Result<String> {
    let digest = stable_digest(value)?;
    Ok(format!("{}-{}", label, &digest[..12]))
}
