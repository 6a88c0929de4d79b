use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use docbatch_core::generation::InMemoryResultStore;
use docbatch_core::render::PlaceholderGenerator;
use docbatch_core::templates::DirTemplateManager;
use docbatch_events::EventBus;
use docbatch_scheduler::Scheduler;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docbatch_api::config::ServerConfig;
use docbatch_api::router::build_app_router;
use docbatch_api::state::AppState;
use docbatch_api::ws::{self, ConnectionRegistry};

const SHUTDOWN_EVENT: &str = "server_shutdown";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "docbatch_api=debug,docbatch_scheduler=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        template_dir = %config.template_dir.display(),
        max_concurrency = config.scheduler.max_concurrency,
        "Loaded server configuration",
    );

    // --- Collaborators ---
    let templates = Arc::new(DirTemplateManager::new(config.template_dir.clone()));
    let generator = Arc::new(PlaceholderGenerator);
    let results = Arc::new(InMemoryResultStore::new());

    // --- Scheduler and event channel ---
    let (event_bus, event_stream) = EventBus::new();
    let scheduler = Scheduler::new(
        config.scheduler.clone(),
        templates,
        generator,
        results,
        event_bus,
    );
    tracing::info!("Scheduler created");

    // --- App state ---
    let state = AppState::new(config.clone(), scheduler);
    let cancel = CancellationToken::new();

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&state.rooms),
        config.ws.heartbeat_interval,
        config.ws.heartbeat_timeout,
        cancel.clone(),
    );

    // --- Progress broadcaster ---
    let broadcaster = Arc::clone(&state.broadcaster);
    let broadcaster_cancel = cancel.clone();
    let broadcaster_handle = tokio::spawn(async move {
        broadcaster.run(event_stream, broadcaster_cancel).await;
    });
    tracing::info!("Background services started (heartbeat, progress broadcaster)");

    // --- Router ---
    let registry = Arc::clone(&state.registry);
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone(), Arc::clone(&registry)))
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(grace, broadcaster_handle).await;
    let _ = tokio::time::timeout(grace, heartbeat_handle).await;
    tracing::info!("Background services stopped");

    registry.shutdown_all().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal, then stop background services and close
/// every WebSocket so open sockets do not hold the server up.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal(cancel: CancellationToken, registry: Arc<ConnectionRegistry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }

    cancel.cancel();
    let ws_count = registry.connection_count().await;
    tracing::info!(ws_count, "Closing WebSocket connections");
    registry
        .announce(SHUTDOWN_EVENT, "Server is shutting down")
        .await;
    registry.shutdown_all().await;
}
