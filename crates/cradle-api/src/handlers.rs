//! REST API handlers.
//!
//! Mutating handlers hold the identity's lock for their whole duration; see
//! [`crate::locks::IdentityLocks`].

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use cradle_core::WorkloadIdentity;
use cradle_orchestrator::{ContainerRecord, ContainerStatus, DeployRequest};
use serde::Serialize;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    pub(crate) fn failure(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Result of a deploy or recreate.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub identity: String,
    pub container_id: String,
    pub image_tag: String,
    /// Whether the controller acknowledged the new container ID.
    pub reported: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub container_id: String,
    pub status: ContainerStatus,
}

// ── Workloads ──────────────────────────────────────────────────

/// POST /api/v1/workloads/{customer}/{workload}
pub async fn deploy_workload(
    State(state): State<AppState>,
    Path((customer, workload)): Path<(String, String)>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let identity = WorkloadIdentity::new(customer, workload)?;
    let archive = read_archive(multipart, state.max_upload_bytes).await?;
    info!(%identity, bytes = archive.len(), "archive received");

    let _guard = state.locks.lock(&identity.key()).await;
    let extra_env = fetch_extra_env(&state, &identity).await?;
    let record = state
        .orchestrator
        .deploy(DeployRequest {
            identity,
            archive,
            extra_env,
        })
        .await?;

    let response = report(&state, record).await;
    Ok((StatusCode::CREATED, ApiResponse::ok(response)))
}

/// POST /api/v1/workloads/{customer}/{workload}/recreate
pub async fn recreate_workload(
    State(state): State<AppState>,
    Path((customer, workload)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let identity = WorkloadIdentity::new(customer, workload)?;
    let _guard = state.locks.lock(&identity.key()).await;
    recreate_locked(&state, &identity).await
}

// ── Containers ─────────────────────────────────────────────────

/// POST /api/v1/containers/{id}/start
pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let _guard = state.locks.lock(&lock_key(&state, &id).await).await;
    state.orchestrator.start(&id).await?;
    Ok(ApiResponse::ok("started"))
}

/// POST /api/v1/containers/{id}/stop
pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let _guard = state.locks.lock(&lock_key(&state, &id).await).await;
    state.orchestrator.stop(&id).await?;
    Ok(ApiResponse::ok("stopped"))
}

/// DELETE /api/v1/containers/{id}
pub async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let _guard = state.locks.lock(&lock_key(&state, &id).await).await;
    state.orchestrator.remove(&id).await?;
    Ok(ApiResponse::ok("removed"))
}

/// GET /api/v1/containers/{id}/status
pub async fn container_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.orchestrator.status(&id).await?;
    Ok(ApiResponse::ok(StatusResponse {
        container_id: id,
        status,
    }))
}

/// POST /api/v1/containers/{id}/recreate
pub async fn recreate_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let identity = state.orchestrator.identity_of(&id).await?;
    let _guard = state.locks.lock(&identity.key()).await;
    recreate_locked(&state, &identity).await
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.orchestrator.ping().await?;
    Ok(ApiResponse::ok(serde_json::json!({ "status": "ok" })))
}

// ── Helpers ────────────────────────────────────────────────────

async fn recreate_locked(
    state: &AppState,
    identity: &WorkloadIdentity,
) -> ApiResult<Json<ApiResponse<DeployResponse>>> {
    let extra_env = fetch_extra_env(state, identity).await?;
    let record = state.orchestrator.recreate(identity, &extra_env).await?;
    Ok(ApiResponse::ok(report(state, record).await))
}

/// Lock on the container name of the identity that owns `id`, or on `id`
/// itself when the runtime cannot tell us.
async fn lock_key(state: &AppState, id: &str) -> String {
    match state.orchestrator.identity_of(id).await {
        Ok(identity) => identity.key(),
        Err(_) => format!("id:{id}"),
    }
}

async fn fetch_extra_env(
    state: &AppState,
    identity: &WorkloadIdentity,
) -> ApiResult<std::collections::BTreeMap<String, String>> {
    match &state.controller {
        Some(controller) => Ok(controller.fetch_env(identity).await?),
        None => Ok(Default::default()),
    }
}

/// Report the new container to the controller. Failures are logged and
/// surfaced as `reported: false`; the deploy itself already succeeded.
async fn report(state: &AppState, record: ContainerRecord) -> DeployResponse {
    let reported = match &state.controller {
        Some(controller) => {
            match controller
                .report_container(&record.identity, &record.container_id)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    warn!(identity = %record.identity, container_id = %record.container_id, error = %e, "failed to report container to controller");
                    false
                }
            }
        }
        None => false,
    };

    DeployResponse {
        identity: record.identity.to_string(),
        container_id: record.container_id,
        image_tag: record.image_tag,
        reported,
    }
}

async fn read_archive(mut multipart: Multipart, limit: usize) -> ApiResult<Bytes> {
    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
        if field.name() != Some("file") {
            continue;
        }
        let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        if data.len() > limit {
            return Err(ApiError::PayloadTooLarge { limit });
        }
        if data.is_empty() {
            return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
        }
        return Ok(data);
    }
    Err(ApiError::BadRequest("multipart field \"file\" is missing".to_string()))
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit }
    } else {
        ApiError::BadRequest(err.body_text())
    }
}
