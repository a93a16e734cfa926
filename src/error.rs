use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("watch error: {0}")]
    Watch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Maps a poisoned lock to an internal error.
pub(crate) fn lock_poisoned_error(what: &str) -> ResourceError {
    ResourceError::Internal(format!("{what} lock poisoned"))
}
