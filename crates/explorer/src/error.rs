use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("trial log {path} is inconsistent at line {line}: {detail}")]
    InconsistentLog {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("search cannot start from {0}")]
    InvalidInitialGuess(u32),
}
