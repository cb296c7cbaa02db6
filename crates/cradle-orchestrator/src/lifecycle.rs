//! Container start, stop, remove, status and recreate.

use std::fmt;
use std::sync::Arc;

use cradle_core::environment::CUSTOMER_NAME;
use cradle_core::{EnvironmentContract, WorkloadIdentity};
use cradle_runtime::{ContainerRuntime, RuntimeError};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::registrar::{ContainerRecord, LABEL_CUSTOMER, LABEL_WORKLOAD, Registrar};

/// Coarse container status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Restarting,
    Unknown,
}

impl ContainerStatus {
    /// Map the engine's native state string. Total: anything unrecognised
    /// is `Unknown`.
    pub fn from_native(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "created" | "exited" | "dead" | "paused" => Self::Stopped,
            "restarting" => Self::Restarting,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Restarting => "restarting",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    registrar: Registrar,
}

impl LifecycleController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        let registrar = Registrar::new(runtime.clone());
        Self { runtime, registrar }
    }

    /// Start a container. Already running counts as success.
    pub async fn start(&self, container_id: &str) -> OrchestratorResult<()> {
        match self.runtime.start_container(container_id).await {
            Ok(()) => info!(%container_id, "container started"),
            Err(RuntimeError::NotModified(_)) => debug!(%container_id, "container already running"),
            Err(e) => return Err(OrchestratorError::lifecycle("start", container_id, e)),
        }
        Ok(())
    }

    /// Gracefully stop a container. Already stopped counts as success.
    pub async fn stop(&self, container_id: &str) -> OrchestratorResult<()> {
        match self.runtime.stop_container(container_id).await {
            Ok(()) => info!(%container_id, "container stopped"),
            Err(RuntimeError::NotModified(_)) => debug!(%container_id, "container already stopped"),
            Err(e) => return Err(OrchestratorError::lifecycle("stop", container_id, e)),
        }
        Ok(())
    }

    /// Force-remove a container. Removing an absent container succeeds.
    pub async fn remove(&self, container_id: &str) -> OrchestratorResult<()> {
        match self.runtime.remove_container(container_id, true).await {
            Ok(()) => info!(%container_id, "container removed"),
            Err(RuntimeError::NotFound(_)) => debug!(%container_id, "container already absent"),
            Err(e) => return Err(OrchestratorError::lifecycle("remove", container_id, e)),
        }
        Ok(())
    }

    pub async fn status(&self, container_id: &str) -> OrchestratorResult<ContainerStatus> {
        let details = self
            .runtime
            .inspect_container(container_id)
            .await
            .map_err(|e| OrchestratorError::lifecycle("status", container_id, e))?;
        Ok(ContainerStatus::from_native(&details.state))
    }

    /// Replace the identity's container using an already-built image.
    pub async fn recreate(
        &self,
        identity: &WorkloadIdentity,
        image_tag: &str,
        environment: &EnvironmentContract,
        network: &str,
    ) -> OrchestratorResult<ContainerRecord> {
        info!(%identity, image = %image_tag, "recreating container");
        self.registrar
            .deploy(image_tag, identity, environment, network)
            .await
    }

    /// Recover the identity a container was deployed for.
    ///
    /// Uses the identity labels; containers created without them fall back
    /// to the container name and the `CUSTOMER_NAME` variable.
    pub async fn identity_of(&self, container_id: &str) -> OrchestratorResult<WorkloadIdentity> {
        let details = self
            .runtime
            .inspect_container(container_id)
            .await
            .map_err(|e| OrchestratorError::lifecycle("inspect", container_id, e))?;

        let customer = details
            .labels
            .get(LABEL_CUSTOMER)
            .map(String::as_str)
            .or_else(|| details.env_var(CUSTOMER_NAME));
        let workload = details
            .labels
            .get(LABEL_WORKLOAD)
            .map(String::as_str)
            .or(Some(details.name.as_str()).filter(|n| !n.is_empty()));

        match (customer, workload) {
            (Some(customer), Some(workload)) => Ok(WorkloadIdentity::new(customer, workload)?),
            _ => Err(OrchestratorError::LifecycleFailed {
                operation: "inspect",
                container_id: container_id.to_string(),
                reason: "container carries no workload identity".to_string(),
            }),
        }
    }
}
