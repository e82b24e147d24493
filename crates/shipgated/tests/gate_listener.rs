//! Gate listeners and HTTP fleet members against a member server on loopback.

use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use shipgate_core::config::MemberConfig;
use shipgate_core::testing::ScriptedBuilder;
use shipgate_core::{Protocol, SourceRef, StackConfig, Tier};
use shipgate_state::fakes::{MemoryArtifactStore, MemoryRunLedger};
use shipgated::member::VERSION_HEADER;
use shipgated::App;
use tower::ServiceExt;

#[derive(Clone, Default)]
struct MemberServer {
    applied: Arc<Mutex<Vec<(String, usize)>>>,
}

async fn health() -> Json<Value> {
    Json(json!({"cpu_utilization": 12.5}))
}

async fn apply(State(server): State<MemberServer>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let version = headers
        .get(VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    server.applied.lock().unwrap().push((version, body.len()));
    StatusCode::OK
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let secret = headers
        .get("x-secret")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({
        "method": method.as_str(),
        "path": uri.to_string(),
        "secret": secret,
        "padding": "x".repeat(256),
    }))
}

async fn spawn_member() -> (String, MemberServer) {
    let server = MemberServer::default();
    let router = Router::new()
        .route("/health", get(health))
        .route("/_shipgate/artifact", put(apply))
        .fallback(echo)
        .with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), server)
}

fn app(member_urls: &[String], configure: impl FnOnce(&mut StackConfig)) -> App {
    let mut config = StackConfig::default();
    config.gate.header_value = "s3cr3t".to_string();
    config.pipeline.health_poll_interval_ms = 50;
    config.daemon.members = member_urls
        .iter()
        .enumerate()
        .map(|(i, url)| MemberConfig {
            id: format!("m-{}", i + 1),
            url: url.clone(),
            zone: None,
        })
        .collect();
    configure(&mut config);
    App::with_parts(
        config,
        Arc::new(ScriptedBuilder::new()),
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(MemoryRunLedger::new()),
    )
    .unwrap()
}

fn request(path: &str) -> axum::http::request::Builder {
    Request::builder()
        .uri(path)
        .header(header::HOST, "app.example.com")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn edge_injects_secret_and_forwards() {
    let (url, _) = spawn_member().await;
    let app = app(&[url], |_| {});
    let edge = app.gate_router(Tier::Edge, Protocol::Https);

    let response = edge
        .oneshot(request("/orders?page=2").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let echoed = body_json(response).await;
    assert_eq!(echoed["secret"], "s3cr3t");
    assert_eq!(echoed["path"], "/orders?page=2");
}

#[tokio::test]
async fn viewer_supplied_secret_is_overwritten_at_edge() {
    let (url, _) = spawn_member().await;
    let app = app(&[url], |_| {});
    let edge = app.gate_router(Tier::Edge, Protocol::Https);

    let response = edge
        .oneshot(
            request("/")
                .header("x-secret", "guess")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["secret"], "s3cr3t");
}

#[tokio::test]
async fn origin_without_header_is_denied() {
    let (url, _) = spawn_member().await;
    let app = app(&[url], |_| {});
    let origin = app.gate_router(Tier::Origin, Protocol::Https);

    let response = origin
        .oneshot(request("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"Access Denied");
}

#[tokio::test]
async fn origin_with_header_forwards() {
    let (url, _) = spawn_member().await;
    let app = app(&[url], |_| {});
    let origin = app.gate_router(Tier::Origin, Protocol::Https);

    let response = origin
        .oneshot(
            request("/api")
                .method("POST")
                .header("x-secret", "s3cr3t")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["method"], "POST");
}

#[tokio::test]
async fn http_is_redirected_before_header_checks() {
    let (url, _) = spawn_member().await;
    let app = app(&[url], |_| {});

    let origin_http = app.gate_router(Tier::Origin, Protocol::Http);
    let response = origin_http
        .oneshot(
            request("/login")
                .header("x-secret", "s3cr3t")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://app.example.com/login"
    );
}

#[tokio::test]
async fn http_port_ignores_forwarded_proto() {
    let (url, _) = spawn_member().await;
    let app = app(&[url], |c| c.daemon.trust_forwarded_proto = true);

    let origin_http = app.gate_router(Tier::Origin, Protocol::Http);
    let response = origin_http
        .oneshot(
            request("/login")
                .header("x-forwarded-proto", "https")
                .header("x-secret", "s3cr3t")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://app.example.com/login"
    );
}

#[tokio::test]
async fn edge_honours_forwarded_proto_only_when_trusted() {
    let (url, _) = spawn_member().await;

    let trusting = app(&[url.clone()], |c| c.daemon.trust_forwarded_proto = true);
    let response = trusting
        .gate_router(Tier::Edge, Protocol::Https)
        .oneshot(
            request("/login")
                .header("x-forwarded-proto", "http")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_redirection());

    let untrusting = app(&[url], |_| {});
    let response = untrusting
        .gate_router(Tier::Edge, Protocol::Https)
        .oneshot(
            request("/login")
                .header("x-forwarded-proto", "http")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_fleet_is_unavailable() {
    let app = app(&[], |_| {});
    let origin = app.gate_router(Tier::Origin, Protocol::Https);

    let response = origin
        .oneshot(
            request("/")
                .header("x-secret", "s3cr3t")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn edge_compresses_only_when_enabled() {
    let (url, _) = spawn_member().await;

    let app_on = app(&[url.clone()], |_| {});
    let response = app_on
        .gate_router(Tier::Edge, Protocol::Https)
        .oneshot(
            request("/")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );

    let app_off = app(&[url], |c| c.gate.compress = false);
    let response = app_off
        .gate_router(Tier::Edge, Protocol::Https)
        .oneshot(
            request("/")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_ne!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    assert_eq!(body_json(response).await["secret"], "s3cr3t");
}

#[tokio::test]
async fn pipeline_deploys_to_http_members() {
    let (url_a, member_a) = spawn_member().await;
    let (url_b, member_b) = spawn_member().await;
    let app = app(&[url_a, url_b], |_| {});

    app.orchestrator.trigger(SourceRef::manual("ops"));
    app.orchestrator.wait_idle().await;

    let current = app.orchestrator.current_artifact().unwrap();
    for member in [member_a, member_b] {
        let applied = member.applied.lock().unwrap().clone();
        assert_eq!(applied, vec![(current.version.as_str().to_string(), current.size as usize)]);
    }

    app.fleet.refresh_health().await;
    assert_eq!(app.fleet.metrics().avg_cpu_utilization, Some(12.5));
}
