//! cradle-runtime: the container runtime capability used by the orchestrator.
//!
//! The orchestrator only needs a handful of operations (list, build, create,
//! start, stop, remove, inspect); they are captured by the
//! [`ContainerRuntime`] trait so the request/response shapes of a particular
//! engine never leak into orchestration logic.
//!
//! # Backends
//!
//! ```text
//! ContainerRuntime
//!   ├── DockerRuntime  (bollard, local socket or DOCKER_HOST)
//!   └── MemoryRuntime  (in-process, used by tests)
//! ```

pub mod docker;
pub mod error;
pub mod memory;
pub mod types;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::MemoryRuntime;
pub use types::*;

use async_trait::async_trait;
use bytes::Bytes;

/// Operations the orchestrator requires from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the engine's control interface is reachable.
    async fn ping(&self) -> RuntimeResult<()>;

    /// List containers in every state (not just running ones).
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Submit an uncompressed tar build context and stream diagnostics.
    ///
    /// The stream is lazy and finite; callers must drain it.
    fn build_image(&self, context: Bytes, tag: &str) -> BuildStream<'_>;

    /// Create (but do not start) a container. Returns the runtime-assigned ID.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Start a container. `NotModified` when it is already running.
    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Gracefully stop a container. `NotModified` when it is already stopped.
    async fn stop_container(&self, id: &str) -> RuntimeResult<()>;

    /// Remove a container; `force` kills a running container first.
    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Inspect a container by ID or name.
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerDetails>;
}
