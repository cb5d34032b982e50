//! Error types for issuelock.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input: session ids, issue ids, scope targets.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or unrecognized status, or a closed parent with open children.
    #[error("status error in {}: {message}", path.display())]
    Status { path: PathBuf, message: String },

    #[error("lock for {id} is owned by session {owner}")]
    Ownership { id: String, owner: String },

    #[error("no lock exists for {0}")]
    LockNotFound(String),

    #[error("corrupt lock file {}: {message}", path.display())]
    CorruptLock { path: PathBuf, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable identifier used in the CLI's JSON error document.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Status { .. } => "status_error",
            Error::Ownership { .. } => "ownership_error",
            Error::LockNotFound(_) => "lock_not_found",
            Error::CorruptLock { .. } => "corrupt_lock",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Other(_) => "error",
        }
    }

    pub(crate) fn status(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Status {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
