//! Keeps exactly one container per workload identity.

use std::collections::HashMap;
use std::sync::Arc;

use cradle_core::{EnvironmentContract, WorkloadIdentity};
use cradle_runtime::{ContainerRuntime, ContainerSpec, RuntimeError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DeployStep, OrchestratorError, OrchestratorResult};

pub const LABEL_CUSTOMER: &str = "io.cradle.customer";
pub const LABEL_WORKLOAD: &str = "io.cradle.workload";
pub const LABEL_IMAGE: &str = "io.cradle.image";

/// A container created by a deploy or recreate. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerRecord {
    pub identity: WorkloadIdentity,
    pub container_id: String,
    pub image_tag: String,
    pub network: String,
    pub environment: EnvironmentContract,
}

#[derive(Clone)]
pub struct Registrar {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Registrar {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Replace whatever container carries the identity's name with a fresh
    /// one created from `image_tag`, then start it.
    ///
    /// Not atomic: the caller must serialize deploys for the same identity.
    pub async fn deploy(
        &self,
        image_tag: &str,
        identity: &WorkloadIdentity,
        environment: &EnvironmentContract,
        network: &str,
    ) -> OrchestratorResult<ContainerRecord> {
        let name = identity.container_name();
        let fail = |step: DeployStep, err: RuntimeError| match err {
            RuntimeError::Unavailable(reason) => OrchestratorError::RuntimeUnavailable {
                operation: "deploy",
                reason,
            },
            other => OrchestratorError::DeployFailed {
                identity: identity.to_string(),
                step,
                reason: other.to_string(),
            },
        };

        let existing = self
            .runtime
            .list_containers()
            .await
            .map_err(|e| fail(DeployStep::List, e))?;

        for stale in existing.iter().filter(|c| c.has_name(name)) {
            debug!(%identity, container_id = %stale.id, "removing stale container");
            match self.runtime.remove_container(&stale.id, true).await {
                Ok(()) => {
                    info!(%identity, container_id = %stale.id, "stale container removed");
                }
                Err(RuntimeError::NotFound(_)) => {
                    debug!(%identity, container_id = %stale.id, "stale container already gone");
                }
                Err(e) => return Err(fail(DeployStep::RemoveStale, e)),
            }
        }

        let spec = ContainerSpec {
            name: name.to_string(),
            image: image_tag.to_string(),
            env: environment.to_env_vars(),
            network: network.to_string(),
            labels: identity_labels(identity, image_tag),
        };
        let container_id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| fail(DeployStep::Create, e))?;
        debug!(%identity, %container_id, image = %image_tag, %network, "container created");

        if let Err(e) = self.runtime.start_container(&container_id).await {
            warn!(%identity, %container_id, error = %e, "created container failed to start");
            return Err(fail(DeployStep::Start, e));
        }

        info!(%identity, %container_id, image = %image_tag, "container deployed");
        Ok(ContainerRecord {
            identity: identity.clone(),
            container_id,
            image_tag: image_tag.to_string(),
            network: network.to_string(),
            environment: environment.clone(),
        })
    }
}

fn identity_labels(identity: &WorkloadIdentity, image_tag: &str) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_CUSTOMER.to_string(), identity.customer().to_string()),
        (LABEL_WORKLOAD.to_string(), identity.workload().to_string()),
        (LABEL_IMAGE.to_string(), image_tag.to_string()),
    ])
}
