//! Existence-based artifact memoization.
//!
//! Presence of the final artifact path is the only cache signal. Producers
//! must therefore never leave a file at that path unless they succeeded.

use crate::error::PipelineError;
use anyhow::Result;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Produced,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

#[derive(Debug, Default)]
pub struct ArtifactCache {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce `path` through a staging file unless it already exists.
    ///
    /// The producer receives the staging path and must write its output
    /// there. The staging file is renamed onto `path` only after the producer
    /// returns `Ok`; on error it is removed.
    pub fn ensure<F>(&self, path: &Path, producer: F) -> Result<CacheOutcome>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if path.exists() {
            return Ok(self.hit(path));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = staging_path(path);
        remove_if_present(&staging)?;

        if let Err(err) = producer(&staging) {
            let _ = remove_if_present(&staging);
            return Err(err);
        }
        if !staging.exists() {
            return Err(PipelineError::MissingArtifact(staging).into());
        }
        fs::rename(&staging, path)?;
        Ok(self.produced(path))
    }

    /// Run `producer` unless `marker` exists.
    ///
    /// For tools that pick their own output location. `marker` must be a file
    /// the tool only writes once it has finished successfully; a directory
    /// that merely exists is not evidence of completion.
    pub fn ensure_external<F>(&self, marker: &Path, producer: F) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        if marker.is_file() {
            return Ok(self.hit(marker));
        }
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }
        producer()?;
        if !marker.is_file() {
            return Err(PipelineError::MissingArtifact(marker.to_path_buf()).into());
        }
        Ok(self.produced(marker))
    }

    pub fn is_cached(&self, marker: &Path) -> bool {
        marker.exists()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn hit(&self, path: &Path) -> CacheOutcome {
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), "artifact cached");
        CacheOutcome::Hit
    }

    fn produced(&self, path: &Path) -> CacheOutcome {
        self.misses.fetch_add(1, Ordering::Relaxed);
        info!(path = %path.display(), "artifact produced");
        CacheOutcome::Produced
    }
}

/// Sibling path a producer writes to before publication.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".partial");
    path.with_file_name(name)
}

fn remove_if_present(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::Cell;

    #[test]
    fn test_second_ensure_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphs").join("d_3.json");
        let cache = ArtifactCache::new();
        let calls = Cell::new(0);

        for _ in 0..2 {
            cache
                .ensure(&path, |staging| {
                    calls.set(calls.get() + 1);
                    fs::write(staging, "{}")?;
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_failed_producer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d_3.syndromes");
        let cache = ArtifactCache::new();

        let result = cache.ensure(&path, |staging| {
            fs::write(staging, "half written")?;
            bail!("generator crashed")
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_stale_staging_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d_3.json");
        fs::write(staging_path(&path), "left over from a crash").unwrap();
        let cache = ArtifactCache::new();

        cache
            .ensure(&path, |staging| {
                assert!(!staging.exists());
                fs::write(staging, "fresh")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");
    }

    #[test]
    fn test_producer_must_create_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d_3.json");
        let cache = ArtifactCache::new();
        let err = cache.ensure(&path, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingArtifact(_))
        ));
    }

    #[test]
    fn test_external_marker_not_directory() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("d_3_f200");
        fs::create_dir_all(project.join("d_3_f200_verilog")).unwrap();
        let marker = project.join("d_3_f200_verilog").join("MicroBlossomBus.v");
        let cache = ArtifactCache::new();
        let calls = Cell::new(0);

        let outcome = cache
            .ensure_external(&marker, || {
                calls.set(calls.get() + 1);
                fs::write(&marker, "module MicroBlossomBus;")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Produced);

        let outcome = cache.ensure_external(&marker, || bail!("must not run")).unwrap();
        assert!(outcome.is_hit());
        assert_eq!(calls.get(), 1);
    }
}
