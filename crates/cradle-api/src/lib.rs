//! cradle-api: REST API for Cradle.
//!
//! Exposes workload deploys and container lifecycle operations over HTTP,
//! serializes same-identity operations and keeps the external controller
//! informed of container IDs.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/workloads/{customer}/{workload}` | Deploy from a multipart `file` upload (`.tar.gz`) |
//! | POST | `/api/v1/workloads/{customer}/{workload}/recreate` | Recreate from the last built image |
//! | POST | `/api/v1/containers/{id}/start` | Start a container |
//! | POST | `/api/v1/containers/{id}/stop` | Stop a container |
//! | POST | `/api/v1/containers/{id}/recreate` | Recreate the workload owning a container |
//! | DELETE | `/api/v1/containers/{id}` | Remove a container (idempotent) |
//! | GET | `/api/v1/containers/{id}/status` | Container status |
//! | GET | `/healthz` | Container runtime reachability |

pub mod controller;
pub mod error;
pub mod handlers;
pub mod locks;

pub use controller::{ControllerClient, ControllerError};
pub use error::{ApiError, ApiResult};
pub use locks::IdentityLocks;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use cradle_orchestrator::Orchestrator;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub locks: IdentityLocks,
    pub controller: Option<ControllerClient>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        controller: Option<ControllerClient>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            orchestrator,
            locks: IdentityLocks::new(),
            controller,
            max_upload_bytes,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD));

    let api_routes = Router::new()
        .route(
            "/workloads/{customer}/{workload}",
            post(handlers::deploy_workload).layer(body_limit),
        )
        .route(
            "/workloads/{customer}/{workload}/recreate",
            post(handlers::recreate_workload),
        )
        .route("/containers/{id}", delete(handlers::remove_container))
        .route("/containers/{id}/start", post(handlers::start_container))
        .route("/containers/{id}/stop", post(handlers::stop_container))
        .route("/containers/{id}/recreate", post(handlers::recreate_container))
        .route("/containers/{id}/status", get(handlers::container_status))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}
