//! Orchestrator error types.

use std::fmt;

use cradle_core::CoreError;
use cradle_runtime::RuntimeError;
use thiserror::Error;

/// Step of the deploy sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    List,
    RemoveStale,
    Create,
    Start,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list containers"),
            Self::RemoveStale => write!(f, "remove stale container"),
            Self::Create => write!(f, "create container"),
            Self::Start => write!(f, "start container"),
        }
    }
}

/// Errors returned by orchestrator operations.
///
/// Every variant names the operation and the identity, image or container
/// it concerned, plus the underlying diagnostic.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("staging into {target} failed: {reason}")]
    StageFailed { target: String, reason: String },

    #[error("build of image {image} failed: {reason}")]
    BuildFailed { image: String, reason: String },

    #[error("deploy of {identity} failed to {step}: {reason}")]
    DeployFailed {
        identity: String,
        step: DeployStep,
        reason: String,
    },

    #[error("{operation}: no such container {container_id}")]
    NotFound {
        operation: &'static str,
        container_id: String,
    },

    #[error("{operation}: container runtime unavailable: {reason}")]
    RuntimeUnavailable {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} of container {container_id} failed: {reason}")]
    LifecycleFailed {
        operation: &'static str,
        container_id: String,
        reason: String,
    },

    #[error("workspace preparation failed: {0}")]
    Workspace(String),

    #[error(transparent)]
    InvalidInput(#[from] CoreError),
}

impl OrchestratorError {
    /// Map a runtime error raised by a lifecycle call on `container_id`.
    pub(crate) fn lifecycle(operation: &'static str, container_id: &str, err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(_) => Self::NotFound {
                operation,
                container_id: container_id.to_string(),
            },
            RuntimeError::Unavailable(reason) => Self::RuntimeUnavailable { operation, reason },
            other => Self::LifecycleFailed {
                operation,
                container_id: container_id.to_string(),
                reason: other.to_string(),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
