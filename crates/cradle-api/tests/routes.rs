//! Router tests: every route against the in-memory runtime.

use std::fs;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use cradle_api::{AppState, ControllerClient, build_router};
use cradle_core::config::{DiagnosticsConfig, StreamConfig};
use cradle_orchestrator::{LocalTemplate, Orchestrator, OrchestratorSettings};
use cradle_runtime::memory::BuildBehavior;
use cradle_runtime::{ContainerRuntime, MemoryRuntime};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "cradle-test-boundary";

struct TestApp {
    router: Router,
    runtime: Arc<MemoryRuntime>,
    _dirs: (TempDir, TempDir),
}

fn app_with(controller: Option<ControllerClient>, max_upload_bytes: usize) -> TestApp {
    let template = tempfile::tempdir().unwrap();
    fs::write(template.path().join("Dockerfile"), "FROM node:20-alpine\n").unwrap();
    let workspace = tempfile::tempdir().unwrap();

    let runtime = Arc::new(MemoryRuntime::new());
    let settings = OrchestratorSettings {
        network: "sensority-labs".to_string(),
        stream: StreamConfig::default(),
        diagnostics: DiagnosticsConfig::default(),
        workspace_root: workspace.path().to_path_buf(),
        workload_subdir: "bot".to_string(),
    };
    let orchestrator = Orchestrator::new(
        runtime.clone(),
        settings,
        Arc::new(LocalTemplate::new(template.path())),
    );
    TestApp {
        router: build_router(AppState::new(orchestrator, controller, max_upload_bytes)),
        runtime,
        _dirs: (template, workspace),
    }
}

fn app() -> TestApp {
    app_with(None, 10 << 20)
}

fn targz() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let content = b"console.log('watching')";
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "index.ts", &content[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn multipart_body(field: &str, data: &[u8]) -> Body {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"bot.tar.gz\"\r\n\
             Content-Type: application/gzip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

fn upload(uri: &str, field: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(field, data))
        .unwrap()
}

fn call(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn deploy(app: &TestApp, customer: &str, workload: &str) -> String {
    let uri = format!("/api/v1/workloads/{customer}/{workload}");
    let resp = app.router.clone().oneshot(upload(&uri, "file", &targz())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json(resp).await;
    body["data"]["container_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn deploy_returns_container_id() {
    let app = app();
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "file", &targz()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["identity"], "acme/bot1");
    assert_eq!(body["data"]["image_tag"], "bot1:latest");
    assert_eq!(body["data"]["reported"], false);
    assert!(body.get("error").is_none());
    assert_eq!(app.runtime.count_named("bot1"), 1);
}

#[tokio::test]
async fn redeploy_keeps_one_container() {
    let app = app();
    let first = deploy(&app, "acme", "bot1").await;
    let second = deploy(&app, "acme", "bot1").await;
    assert_ne!(first, second);
    assert_eq!(app.runtime.count_named("bot1"), 1);
}

#[tokio::test]
async fn invalid_identity_is_bad_request() {
    let app = app();
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/-bot", "file", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("workload"));
}

#[tokio::test]
async fn uppercase_workload_is_bad_request() {
    let app = app();
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/Bot1", "file", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.runtime.container_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn customers_sharing_a_workload_name_are_serialized() {
    let app = app();
    let mut tasks = Vec::new();
    for customer in ["acme", "globex", "initech"] {
        let router = app.router.clone();
        let uri = format!("/api/v1/workloads/{customer}/bot1");
        tasks.push(tokio::spawn(async move {
            router.oneshot(upload(&uri, "file", &targz())).await.unwrap().status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::CREATED);
    }

    assert_eq!(app.runtime.count_named("bot1"), 1);
    assert_eq!(app.runtime.container_count(), 1);
}

#[tokio::test]
async fn missing_file_field_is_bad_request() {
    let app = app();
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "archive", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn corrupt_archive_is_unprocessable() {
    let app = app();
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "file", b"not a tarball"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.runtime.container_count(), 0);
}

#[tokio::test]
async fn build_failure_is_unprocessable() {
    let app = app();
    app.runtime
        .set_build_behavior(BuildBehavior::Fail("npm ci returned 1".to_string()));
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "file", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("npm ci returned 1"));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = app_with(None, 16);
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "file", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.runtime.container_count(), 0);
}

#[tokio::test]
async fn stop_start_status_cycle() {
    let app = app();
    let id = deploy(&app, "acme", "bot1").await;

    let resp = app
        .router
        .clone()
        .oneshot(call("POST", &format!("/api/v1/containers/{id}/stop")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .router
        .clone()
        .oneshot(call("GET", &format!("/api/v1/containers/{id}/status")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["data"]["status"], "stopped");

    for _ in 0..2 {
        let resp = app
            .router
            .clone()
            .oneshot(call("POST", &format!("/api/v1/containers/{id}/start")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .router
        .clone()
        .oneshot(call("GET", &format!("/api/v1/containers/{id}/status")))
        .await
        .unwrap();
    assert_eq!(json(resp).await["data"]["status"], "running");
}

#[tokio::test]
async fn unknown_container_is_not_found() {
    let app = app();
    for (method, uri) in [
        ("POST", "/api/v1/containers/deadbeef/start"),
        ("POST", "/api/v1/containers/deadbeef/stop"),
        ("GET", "/api/v1/containers/deadbeef/status"),
        ("POST", "/api/v1/containers/deadbeef/recreate"),
    ] {
        let resp = app.router.clone().oneshot(call(method, uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{method} {uri}");
    }
}

#[tokio::test]
async fn remove_is_idempotent() {
    let app = app();
    let id = deploy(&app, "acme", "bot1").await;

    for _ in 0..2 {
        let resp = app
            .router
            .clone()
            .oneshot(call("DELETE", &format!("/api/v1/containers/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert_eq!(app.runtime.container_count(), 0);
}

#[tokio::test]
async fn recreate_by_identity_and_by_container() {
    let app = app();
    let first = deploy(&app, "acme", "bot1").await;

    let resp = app
        .router
        .clone()
        .oneshot(call("POST", "/api/v1/workloads/acme/bot1/recreate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let second = json(resp).await["data"]["container_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(first, second);

    let resp = app
        .router
        .clone()
        .oneshot(call("POST", &format!("/api/v1/containers/{second}/recreate")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(app.runtime.count_named("bot1"), 1);
}

#[tokio::test]
async fn recreate_without_image_is_server_error() {
    let app = app();
    let resp = app
        .router
        .clone()
        .oneshot(call("POST", "/api/v1/workloads/acme/ghost/recreate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn healthz_tracks_runtime() {
    let app = app();
    let resp = app.router.clone().oneshot(call("GET", "/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    app.runtime.set_unavailable(true);
    let resp = app.router.clone().oneshot(call("GET", "/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unreachable_runtime_is_service_unavailable() {
    let app = app();
    let id = deploy(&app, "acme", "bot1").await;
    app.runtime.set_unavailable(true);

    let resp = app
        .router
        .clone()
        .oneshot(call("GET", &format!("/api/v1/containers/{id}/status")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn controller_env_and_report_flow() {
    use axum::Json;
    use axum::routing::{get, post};

    let controller = Router::new()
        .route(
            "/customers/get-bot-config/acme/bot1",
            get(|| async { Json(serde_json::json!({ "ALERT_THRESHOLD": "5" })) }),
        )
        .route(
            "/customers/set-bot-container-id",
            post(|| async { StatusCode::OK }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, controller).await.unwrap();
    });

    let app = app_with(Some(ControllerClient::new(format!("http://{addr}"), None)), 10 << 20);
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "file", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json(resp).await;
    assert_eq!(body["data"]["reported"], true);

    let id = body["data"]["container_id"].as_str().unwrap();
    let details = app.runtime.inspect_container(id).await.unwrap();
    assert_eq!(details.env_var("ALERT_THRESHOLD"), Some("5"));
}

#[tokio::test]
async fn failed_report_still_returns_container() {
    use axum::Json;
    use axum::routing::{get, post};

    let controller = Router::new()
        .route(
            "/customers/get-bot-config/acme/bot1",
            get(|| async { Json(serde_json::json!({})) }),
        )
        .route(
            "/customers/set-bot-container-id",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, controller).await.unwrap();
    });

    let app = app_with(Some(ControllerClient::new(format!("http://{addr}"), None)), 10 << 20);
    let resp = app
        .router
        .clone()
        .oneshot(upload("/api/v1/workloads/acme/bot1", "file", &targz()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json(resp).await;
    assert_eq!(body["data"]["reported"], false);
    assert!(body["data"]["container_id"].as_str().is_some());
}
