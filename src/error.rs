use std::path::PathBuf;

use thiserror::Error;

/// Failures callers may want to tell apart. Everything else travels as plain
/// `anyhow` context.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{key} not set")]
    MissingConfig { key: &'static str },

    #[error("{key} has invalid value {value:?}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("{what} failed: http {status}: {body}")]
    UpstreamStatus {
        what: String,
        status: u16,
        body: String,
    },

    #[error("{} is missing columns: {}", path.display(), columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },
}
