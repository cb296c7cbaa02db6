//! Runtime error types.

use thiserror::Error;

/// Errors reported by a container runtime backend.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such object: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested state change was already in effect.
    #[error("not modified: {0}")]
    NotModified(String),

    #[error("runtime rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified(_))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
