//! Errors raised while driving external tools.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    /// The process ran and exited unsuccessfully.
    #[error("command failed with exit code {code}: {command}")]
    CommandFailed { command: String, code: i32 },

    /// The process could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("terminal capture file {0} does not exist")]
    MissingCapture(PathBuf),
}
