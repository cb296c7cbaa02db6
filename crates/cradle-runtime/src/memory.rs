//! In-process container runtime.
//!
//! Mirrors the Docker Engine behaviours the orchestrator depends on: names
//! are unique (duplicate create is a conflict), start/stop report
//! not-modified when the state is already in effect, removing a running
//! container needs `force`, and a build only produces an image when the
//! context carries a `Dockerfile` at its root. Used by the test suites of
//! the orchestrator and API crates.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;

use crate::error::{RuntimeError, RuntimeResult};
use crate::types::*;
use crate::ContainerRuntime;

/// How the next builds behave.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildBehavior {
    /// Succeed when the context has a root `Dockerfile`.
    #[default]
    Succeed,
    /// Emit some progress, then a build error with this message.
    Fail(String),
    /// End the stream after progress without a success signal.
    Truncate,
    /// Break the transport mid-stream.
    Disconnect,
}

#[derive(Debug, Clone)]
struct MemContainer {
    id: String,
    name: String,
    image: String,
    state: String,
    env: Vec<String>,
    network: String,
    labels: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: Vec<MemContainer>,
    /// tag → image ID
    images: HashMap<String, String>,
    next_id: u64,
    unavailable: bool,
    build_behavior: BuildBehavior,
    remove_failure: Option<String>,
    start_failure: Option<String>,
    /// Last build context received, as (path, contents) pairs.
    last_context: Vec<(String, Vec<u8>)>,
}

impl Inner {
    fn check_available(&self) -> RuntimeResult<()> {
        if self.unavailable {
            return Err(RuntimeError::Unavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        let key = key.trim_start_matches('/');
        self.containers.iter().position(|c| {
            c.id == key || c.name == key || (key.len() >= 12 && c.id.starts_with(key))
        })
    }

    fn find(&self, key: &str) -> RuntimeResult<usize> {
        self.position(key)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {key}")))
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:064x}", 0xc0ffee_u64.wrapping_mul(self.next_id) ^ self.next_id)
    }
}

/// Container runtime that keeps all state in memory.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the engine's control socket going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_build_behavior(&self, behavior: BuildBehavior) {
        self.lock().build_behavior = behavior;
    }

    /// Make every subsequent removal fail with an engine error.
    pub fn fail_removals(&self, message: Option<&str>) {
        self.lock().remove_failure = message.map(str::to_string);
    }

    /// Make every subsequent start fail with an engine error.
    pub fn fail_starts(&self, message: Option<&str>) {
        self.lock().start_failure = message.map(str::to_string);
    }

    /// Register an image as if it had been pulled or built out-of-band.
    pub fn add_image(&self, tag: &str) -> String {
        let mut inner = self.lock();
        let image_id = format!("sha256:{}", inner.allocate_id());
        inner.images.insert(tag.to_string(), image_id.clone());
        image_id
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.lock().images.contains_key(tag)
    }

    /// Overwrite a container's native state string.
    pub fn set_state(&self, id: &str, state: &str) {
        let mut inner = self.lock();
        if let Some(pos) = inner.position(id) {
            inner.containers[pos].state = state.to_string();
        }
    }

    /// Delete a container behind the orchestrator's back.
    pub fn remove_out_of_band(&self, id: &str) {
        let mut inner = self.lock();
        if let Some(pos) = inner.position(id) {
            inner.containers.remove(pos);
        }
    }

    /// Number of containers carrying exactly this name.
    pub fn count_named(&self, name: &str) -> usize {
        self.lock().containers.iter().filter(|c| c.name == name).count()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Network a container was attached to at creation.
    pub fn network_of(&self, id: &str) -> Option<String> {
        let inner = self.lock();
        inner.position(id).map(|pos| inner.containers[pos].network.clone())
    }

    /// Paths contained in the most recent build context.
    pub fn last_context_paths(&self) -> Vec<String> {
        self.lock().last_context.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Contents of one file of the most recent build context.
    pub fn last_context_file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .last_context
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, data)| data.clone())
    }
}

fn read_context(context: &[u8]) -> Result<Vec<(String, Vec<u8>)>, String> {
    let mut archive = tar::Archive::new(context);
    let mut files = Vec::new();
    let entries = archive.entries().map_err(|e| e.to_string())?;
    for entry in entries {
        let mut entry = entry.map_err(|e| e.to_string())?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| e.to_string())?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| e.to_string())?;
        files.push((path, data));
    }
    Ok(files)
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.lock().check_available()
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{}", c.name)],
                image: c.image.clone(),
                labels: c.labels.clone(),
            })
            .collect())
    }

    fn build_image(&self, context: Bytes, tag: &str) -> BuildStream<'_> {
        let mut inner = self.lock();
        if let Err(e) = inner.check_available() {
            return Box::pin(stream::iter(vec![Err(e)]));
        }

        let files = match read_context(&context) {
            Ok(files) => files,
            Err(e) => {
                return Box::pin(stream::iter(vec![Ok(BuildEvent::Error(format!(
                    "invalid build context: {e}"
                )))]));
            }
        };
        let has_dockerfile = files.iter().any(|(p, _)| p == "Dockerfile");
        inner.last_context = files;

        if !has_dockerfile {
            return Box::pin(stream::iter(vec![Ok(BuildEvent::Error(
                "Cannot locate specified Dockerfile: Dockerfile".to_string(),
            ))]));
        }

        let mut events: Vec<RuntimeResult<BuildEvent>> =
            vec![Ok(BuildEvent::Progress("Step 1/2 : FROM node:20-alpine".to_string()))];

        match inner.build_behavior.clone() {
            BuildBehavior::Succeed => {
                let image_id = format!("sha256:{}", inner.allocate_id());
                inner.images.insert(tag.to_string(), image_id.clone());
                events.push(Ok(BuildEvent::Other));
                events.push(Ok(BuildEvent::Progress("Step 2/2 : COPY . .".to_string())));
                events.push(Ok(BuildEvent::Built { image_id }));
                events.push(Ok(BuildEvent::Progress(format!("Successfully tagged {tag}"))));
            }
            BuildBehavior::Fail(message) => {
                events.push(Ok(BuildEvent::Error(message)));
            }
            BuildBehavior::Truncate => {
                events.push(Ok(BuildEvent::Progress("Step 2/2 : COPY . .".to_string())));
            }
            BuildBehavior::Disconnect => {
                events.push(Err(RuntimeError::Unavailable(
                    "connection reset by peer".to_string(),
                )));
            }
        }
        Box::pin(stream::iter(events))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut inner = self.lock();
        inner.check_available()?;
        if !inner.images.contains_key(&spec.image) {
            return Err(RuntimeError::NotFound(format!("No such image: {}", spec.image)));
        }
        if inner.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let id = inner.allocate_id();
        inner.containers.push(MemContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "created".to_string(),
            env: spec.env.clone(),
            network: spec.network.clone(),
            labels: spec.labels.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        let pos = inner.find(id)?;
        if let Some(message) = inner.start_failure.clone() {
            return Err(RuntimeError::Api {
                status: 500,
                message,
            });
        }
        let container = &mut inner.containers[pos];
        if container.state == "running" {
            return Err(RuntimeError::NotModified("container already started".to_string()));
        }
        container.state = "running".to_string();
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        let pos = inner.find(id)?;
        let container = &mut inner.containers[pos];
        if container.state != "running" && container.state != "restarting" {
            return Err(RuntimeError::NotModified("container already stopped".to_string()));
        }
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        let pos = inner.find(id)?;
        if let Some(message) = inner.remove_failure.clone() {
            return Err(RuntimeError::Api {
                status: 500,
                message,
            });
        }
        if inner.containers[pos].state == "running" && !force {
            return Err(RuntimeError::Conflict(
                "You cannot remove a running container. Stop the container before attempting removal or force remove".to_string(),
            ));
        }
        inner.containers.remove(pos);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        let inner = self.lock();
        inner.check_available()?;
        let c = &inner.containers[inner.find(id)?];
        Ok(ContainerDetails {
            id: c.id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            state: c.state.clone(),
            labels: c.labels.clone(),
            env: c.env.clone(),
        })
    }
}
