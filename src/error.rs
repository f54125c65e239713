use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed coverage record at line {line_number}: {line:?}")]
    MalformedRecord { line_number: usize, line: String },

    #[error("Duplicate lcount for line {line} of '{file}'")]
    DuplicateLineMark { file: String, line: u32 },

    #[error(
        "Inconsistent merge for '{file}': prior data has {prior_len} lines, current run only {current_len}"
    )]
    InconsistentMerge {
        file: String,
        prior_len: usize,
        current_len: usize,
    },

    #[error("Line {line} of '{file}' was a statement in prior data but not in the current run")]
    StatementVanished { file: String, line: u32 },

    #[error("Failed to digest source file {}: {source}", path.display())]
    DigestFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Source '{file}' reports zero lines and cannot be folded")]
    UnsupportedLocation { file: String },

    #[error("Upload failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CovError>;
