//! Docker Engine backend built on bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{
    BuildInfo, ContainerCreateBody, EndpointSettings, HostConfig, NetworkingConfig,
    RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptions,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::types::*;
use crate::ContainerRuntime;

/// Container runtime backed by a local Docker Engine.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default local socket.
    ///
    /// No request is made; use [`ContainerRuntime::ping`] to check reachability.
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        debug!("docker client configured");
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.docker.ping().await.map_err(map_docker_error)?;
        Ok(())
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_docker_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    fn build_image(&self, context: Bytes, tag: &str) -> BuildStream<'_> {
        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .build();

        let stream = self
            .docker
            .build_image(options, None, Some(bollard::body_full(context)))
            .map(|item| item.map(build_event).map_err(map_docker_error));
        Box::pin(stream)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let host_config = HostConfig {
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                ..Default::default()
            }),
            ..Default::default()
        };

        // One endpoint, no aliases.
        let networking_config = NetworkingConfig {
            endpoints_config: Some(HashMap::from([(
                spec.network.clone(),
                EndpointSettings::default(),
            )])),
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            networking_config: Some(networking_config),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();

        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(map_docker_error)?;

        for warning in &response.warnings {
            debug!(name = %spec.name, %warning, "container create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(map_docker_error)
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(map_docker_error)
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(force).build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_docker_error)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_docker_error)?;

        let config = inspect.config.unwrap_or_default();
        let state = inspect
            .state
            .and_then(|s| s.status)
            .map(|status| status.to_string())
            .unwrap_or_default();

        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            state,
            labels: config.labels.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
        })
    }
}

/// Reduce one engine build message to a [`BuildEvent`].
pub(crate) fn build_event(info: BuildInfo) -> BuildEvent {
    if let Some(message) = info.error_detail.and_then(|d| d.message) {
        return BuildEvent::Error(message);
    }
    if let Some(message) = info.error {
        return BuildEvent::Error(message);
    }
    if let Some(image_id) = info.aux.and_then(|aux| aux.id) {
        return BuildEvent::Built { image_id };
    }
    match info.stream {
        Some(line) if !line.trim().is_empty() => BuildEvent::Progress(line.trim_end().to_string()),
        _ => BuildEvent::Other,
    }
}

/// Map engine errors onto the runtime taxonomy.
///
/// Anything that is not an HTTP response from the engine (socket missing,
/// connection refused, timeouts, broken streams) means the control
/// interface could not be used.
pub(crate) fn map_docker_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            304 => RuntimeError::NotModified(message),
            404 => RuntimeError::NotFound(message),
            409 => RuntimeError::Conflict(message),
            status => RuntimeError::Api { status, message },
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}
