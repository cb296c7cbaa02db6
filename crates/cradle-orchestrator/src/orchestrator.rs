//! Composition root: wires workspace, stager, builder, registrar and
//! lifecycle controller into the operations exposed to callers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use cradle_core::config::{DiagnosticsConfig, StreamConfig};
use cradle_core::{CradleConfig, EnvironmentContract, WorkloadIdentity};
use cradle_runtime::ContainerRuntime;
use tracing::{info, warn};

use crate::builder::{BuildReport, ImageBuilder};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::lifecycle::{ContainerStatus, LifecycleController};
use crate::registrar::{ContainerRecord, Registrar};
use crate::stager;
use crate::workspace::{BuildWorkspace, TemplateProvider};

/// Settings threaded explicitly into every deploy.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub network: String,
    pub stream: StreamConfig,
    pub diagnostics: DiagnosticsConfig,
    pub workspace_root: PathBuf,
    pub workload_subdir: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &CradleConfig) -> Self {
        Self {
            network: config.runtime.network.clone(),
            stream: config.stream.clone(),
            diagnostics: config.diagnostics.clone(),
            workspace_root: config.workspace.root.clone(),
            workload_subdir: config.workspace.workload_subdir.clone(),
        }
    }
}

/// Input of [`Orchestrator::deploy`].
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub identity: WorkloadIdentity,
    /// Gzip-compressed tarball of the workload source.
    pub archive: Bytes,
    /// Per-workload variables added to the environment contract.
    pub extra_env: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    template: Arc<dyn TemplateProvider>,
    settings: Arc<OrchestratorSettings>,
    builder: ImageBuilder,
    registrar: Registrar,
    lifecycle: LifecycleController,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        settings: OrchestratorSettings,
        template: Arc<dyn TemplateProvider>,
    ) -> Self {
        Self {
            builder: ImageBuilder::new(runtime.clone()),
            registrar: Registrar::new(runtime.clone()),
            lifecycle: LifecycleController::new(runtime.clone()),
            runtime,
            template,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Stage, build and (re)deploy a workload from an uploaded archive.
    pub async fn deploy(&self, request: DeployRequest) -> OrchestratorResult<ContainerRecord> {
        let DeployRequest {
            identity,
            archive,
            extra_env,
        } = request;
        let environment = self.environment(&identity, &extra_env)?;
        let image_tag = identity.image_tag();

        info!(%identity, archive_bytes = archive.len(), template = %self.template.describe(), "deploy requested");

        let workspace = BuildWorkspace::prepare(&self.settings.workspace_root, &identity)?;
        let built = self.build_in(&workspace, archive, &image_tag).await;
        workspace.discard();
        let report = built?;

        self.registrar
            .deploy(&report.image_tag, &identity, &environment, &self.settings.network)
            .await
    }

    async fn build_in(
        &self,
        workspace: &BuildWorkspace,
        archive: Bytes,
        image_tag: &str,
    ) -> OrchestratorResult<BuildReport> {
        self.template.materialize(workspace.path()).await?;

        let root = workspace.path().to_path_buf();
        let subdir = self.settings.workload_subdir.clone();
        let staged = tokio::task::spawn_blocking(move || stager::stage(&root, &archive, &subdir))
            .await
            .map_err(|e| OrchestratorError::StageFailed {
                target: workspace.path().display().to_string(),
                reason: format!("staging task failed: {e}"),
            })??;
        info!(path = ?staged.path, entries = staged.entries, sha256 = %staged.archive_sha256, "source staged");

        self.builder.build(workspace.path(), image_tag).await
    }

    pub async fn start(&self, container_id: &str) -> OrchestratorResult<()> {
        self.lifecycle.start(container_id).await
    }

    pub async fn stop(&self, container_id: &str) -> OrchestratorResult<()> {
        self.lifecycle.stop(container_id).await
    }

    pub async fn remove(&self, container_id: &str) -> OrchestratorResult<()> {
        self.lifecycle.remove(container_id).await
    }

    pub async fn status(&self, container_id: &str) -> OrchestratorResult<ContainerStatus> {
        self.lifecycle.status(container_id).await
    }

    pub async fn identity_of(&self, container_id: &str) -> OrchestratorResult<WorkloadIdentity> {
        self.lifecycle.identity_of(container_id).await
    }

    /// Replace the identity's container from its last built image. Never rebuilds.
    pub async fn recreate(
        &self,
        identity: &WorkloadIdentity,
        extra_env: &BTreeMap<String, String>,
    ) -> OrchestratorResult<ContainerRecord> {
        let environment = self.environment(identity, extra_env)?;
        self.lifecycle
            .recreate(identity, &identity.image_tag(), &environment, &self.settings.network)
            .await
    }

    /// [`Self::recreate`] addressed by the current container's ID.
    pub async fn recreate_container(
        &self,
        container_id: &str,
        extra_env: &BTreeMap<String, String>,
    ) -> OrchestratorResult<ContainerRecord> {
        let identity = self.identity_of(container_id).await?;
        self.recreate(&identity, extra_env).await
    }

    pub async fn ping(&self) -> OrchestratorResult<()> {
        self.runtime.ping().await.map_err(|e| {
            warn!(error = %e, "container runtime ping failed");
            OrchestratorError::RuntimeUnavailable {
                operation: "ping",
                reason: e.to_string(),
            }
        })
    }

    fn environment(
        &self,
        identity: &WorkloadIdentity,
        extra_env: &BTreeMap<String, String>,
    ) -> OrchestratorResult<EnvironmentContract> {
        Ok(EnvironmentContract::build(
            &self.settings.stream,
            &self.settings.diagnostics,
            identity,
            extra_env,
        )?)
    }
}
