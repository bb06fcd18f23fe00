use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, get_service};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use vote_engine::{Transport, VotingService};
use vote_store::{ConnectionRegistry, VotingStore};
use vote_telemetry::MetricsRecorder;

use crate::client::{self, ClientRegistry};
use crate::config::ServerConfig;
use crate::handlers::HandlerState;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub config: Arc<ServerConfig>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let index = ServeFile::new(&state.config.index_path);
    Router::new()
        .route("/", get_service(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Construct all state, start background tasks and begin serving.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let metrics = Arc::new(MetricsRecorder::new());
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue, Arc::clone(&metrics)));
    let service = Arc::new(VotingService::new(
        Arc::new(VotingStore::new(config.store.clone())),
        Arc::new(ConnectionRegistry::new()),
        Arc::clone(&client_registry) as Arc<dyn Transport>,
        Arc::clone(&metrics),
    ));
    let handler_state = Arc::new(HandlerState::new(Arc::clone(&service), metrics));
    let shutdown = CancellationToken::new();

    let sweep = start_sweep_task(Arc::clone(&service), config.sweep_interval(), shutdown.clone());
    let cleanup = client::start_cleanup_task(
        Arc::clone(&client_registry),
        Arc::clone(&service),
        config.heartbeat_interval(),
        config.client_timeout(),
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let app_state = AppState {
        handler_state,
        client_registry: Arc::clone(&client_registry),
        config: Arc::new(config),
    };
    let router = build_router(app_state);

    let server_token = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    tracing::info!(addr = %local_addr, "Voting server started");

    Ok(ServerHandle {
        addr: local_addr,
        shutdown,
        client_registry,
        tasks: vec![server, sweep, cleanup],
    })
}

/// Handle returned by `start()`. Owns the background tasks.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    client_registry: Arc<ClientRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections, close every socket and wait for tasks.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let closed = self.client_registry.disconnect_all();
        tracing::info!(closed, task_count = self.tasks.len(), "Shutting down");

        let drain = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}, some tasks may still be running");
        }
    }
}

/// Periodically expire stale votings and reconcile ownership claims.
fn start_sweep_task(
    service: Arc<VotingService>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume first immediate tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }
            let (evicted, purged) = service.sweep();
            if evicted > 0 || purged > 0 {
                tracing::info!(evicted, purged, "Voting sweep");
            }
        }
    })
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection until it closes, then run the disconnect path.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(connection_id = %client_id, "WebSocket client connected");

    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        Arc::clone(&state.client_registry),
        Arc::clone(&state.handler_state),
        state.config.heartbeat_interval(),
    )
    .await;

    // the cleanup task may have already unregistered and closed it
    if state.client_registry.unregister(&client_id) {
        let _ = state.handler_state.service.on_disconnect(&client_id);
    }
    tracing::info!(connection_id = %client_id, "WebSocket client disconnected");
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.handler_state.service;
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.client_registry.count(),
        "groups": state.client_registry.group_count(),
        "votings": service.store().len(),
        "owners": service.registry().len(),
        "metrics": state.handler_state.metrics.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0, // Random port
            index_path: std::env::temp_dir().join("votehub-missing-index.html"),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(test_config()).await.unwrap();
        assert!(handle.port() > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["votings"], 0);
        assert_eq!(body["connections"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn index_serves_static_page() {
        let path = std::env::temp_dir().join(format!("votehub-index-{}.html", std::process::id()));
        std::fs::write(&path, "<html>vote</html>").unwrap();
        let handle = start(ServerConfig {
            index_path: path.clone(),
            ..test_config()
        })
        .await
        .unwrap();

        let resp = reqwest::get(format!("http://127.0.0.1:{}/", handle.port()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "<html>vote</html>");

        handle.shutdown().await;
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn missing_index_is_404() {
        let handle = start(test_config()).await.unwrap();
        let resp = reqwest::get(format!("http://127.0.0.1:{}/", handle.port()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        handle.shutdown().await;
    }
}
