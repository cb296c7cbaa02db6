//! cradle-orchestrator: turns an uploaded source archive into a running,
//! uniquely named, network-attached container, and manages that container
//! afterwards.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (composition root)
//!   ├── BuildWorkspace + TemplateProvider  (identity-scoped build dir)
//!   ├── stager        archive bytes  → extracted source tree
//!   ├── ImageBuilder  source tree    → image (streamed diagnostics)
//!   ├── Registrar     image          → exactly one container per identity
//!   └── LifecycleController  start / stop / remove / status / recreate
//! ```
//!
//! The container runtime is the only source of truth: nothing here keeps a
//! registry of deployed containers. Operations on the same identity must be
//! serialized by the caller; see `cradle-api`'s `IdentityLocks`.

pub mod builder;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod registrar;
pub mod stager;
pub mod workspace;

pub use builder::{BuildReport, ImageBuilder};
pub use error::{DeployStep, OrchestratorError, OrchestratorResult};
pub use lifecycle::{ContainerStatus, LifecycleController};
pub use orchestrator::{DeployRequest, Orchestrator, OrchestratorSettings};
pub use registrar::{ContainerRecord, Registrar};
pub use stager::StagedSource;
pub use workspace::{BuildWorkspace, GitTemplate, LocalTemplate, TemplateProvider};
