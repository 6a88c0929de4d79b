#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Method, Request, Response};
use axum::Router;
use docbatch_api::config::{BroadcastConfig, ServerConfig, WsConfig};
use docbatch_api::router::build_app_router;
use docbatch_api::state::AppState;
use docbatch_core::generation::{InMemoryResultStore, Template};
use docbatch_core::render::PlaceholderGenerator;
use docbatch_core::templates::InMemoryTemplateManager;
use docbatch_events::EventBus;
use docbatch_scheduler::{Scheduler, SchedulerConfig};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Build a test `ServerConfig` with fast timings.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        template_dir: PathBuf::from("./templates"),
        scheduler: SchedulerConfig {
            max_concurrency: 2,
            default_max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(2),
            progress_every_units: 1,
            progress_interval: Duration::from_secs(60),
            estimated_unit_ms: 1000,
        },
        ws: WsConfig::default(),
        broadcast: BroadcastConfig {
            interval: Duration::from_millis(10),
            batch_size: 10,
            min_change_threshold: 1.0,
        },
    }
}

/// Application state over in-memory collaborators, plus the scheduler's
/// event stream for the caller to consume.
pub async fn build_test_state(config: ServerConfig) -> (AppState, docbatch_events::EventStream) {
    let templates = Arc::new(InMemoryTemplateManager::new());
    templates
        .insert(Template {
            id: "invoice".into(),
            name: "invoice.txt".into(),
            content: "Invoice for {{name}}".into(),
        })
        .await;
    templates
        .insert(Template {
            id: "letter".into(),
            name: "letter.txt".into(),
            content: "Dear {{name}}".into(),
        })
        .await;

    let (bus, stream) = EventBus::new();
    let scheduler = Scheduler::new(
        config.scheduler.clone(),
        templates,
        Arc::new(PlaceholderGenerator),
        Arc::new(InMemoryResultStore::new()),
        bus,
    );
    (AppState::new(config, scheduler), stream)
}

/// Full router with the production middleware stack. Events are discarded.
pub async fn build_test_app() -> (Router, AppState) {
    let config = test_config();
    let (state, _stream) = build_test_state(config.clone()).await;
    (build_app_router(state.clone(), &config), state)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// A server on an ephemeral loopback port with the broadcaster and
/// heartbeat running.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub cancel: CancellationToken,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn spawn_server(config: ServerConfig) -> TestServer {
    let (state, stream) = build_test_state(config.clone()).await;
    let cancel = CancellationToken::new();

    let broadcaster = Arc::clone(&state.broadcaster);
    let token = cancel.clone();
    tokio::spawn(async move { broadcaster.run(stream, token).await });
    docbatch_api::ws::start_heartbeat(
        Arc::clone(&state.rooms),
        config.ws.heartbeat_interval,
        config.ws.heartbeat_timeout,
        cancel.clone(),
    );

    let app = build_app_router(state.clone(), &config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .unwrap();
    });

    TestServer { addr, state, cancel }
}

/// Decode every text frame currently queued on a registry receiver.
pub fn drain_json(rx: &mut mpsc::Receiver<Message>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            out.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    out
}

/// Inline data source with `n` rows named `row-<i>`.
pub fn rows(n: usize) -> Value {
    let rows: Vec<Value> = (0..n)
        .map(|i| serde_json::json!({ "name": format!("row-{i}") }))
        .collect();
    serde_json::json!({ "type": "inline", "rows": rows })
}
