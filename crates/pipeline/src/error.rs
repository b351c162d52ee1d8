//! Pipeline failures that are detected before or after external tools run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("syndrome transform is not implemented for code type {code_type}")]
    UnsupportedTransform { code_type: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "timing report in {project} was produced at {reported} MHz but {requested} MHz was requested"
    )]
    FrequencyMismatch {
        project: PathBuf,
        requested: f64,
        reported: f64,
    },

    #[error("malformed report {path}: {detail}")]
    MalformedReport { path: PathBuf, detail: String },

    #[error("producer finished without creating {0}")]
    MissingArtifact(PathBuf),

    #[error("expected marker {marker:?} not found in terminal output of {project}")]
    MarkerMissing { project: PathBuf, marker: String },

    #[error("{path} is targeted by both {first} and {second}")]
    ConflictingArtifacts {
        path: PathBuf,
        first: String,
        second: String,
    },
}
