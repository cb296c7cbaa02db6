//! Core error types.

use thiserror::Error;

/// Errors raised while validating identities, environments, or config.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid workload identity: {0}")]
    InvalidIdentity(String),

    #[error("incomplete environment: {0}")]
    IncompleteEnvironment(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
