use super::socket;
use crate::backend::{BackendLink, LinkState};
use crate::config::BrokerConfig;
use crate::registry::ClientRegistry;
use crate::router::RequestRouter;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// How long shutdown waits for the HTTP server to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared by the HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
    pub router: RequestRouter,
    pub backend: Arc<BackendLink>,
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
}

/// Composition root: one backend link, one client registry, one router
pub struct Broker {
    config: BrokerConfig,
    backend: Arc<BackendLink>,
    clients: Arc<ClientRegistry>,
    router: RequestRouter,
}

/// A broker that is accepting clients
pub struct RunningBroker {
    addr: SocketAddr,
    backend: Arc<BackendLink>,
    clients: Arc<ClientRegistry>,
    shutdown_tx: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
    relay: JoinHandle<()>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    backend: LinkState,
    clients: usize,
    oldest_client_since: Option<DateTime<Utc>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> crate::error::Result<Self> {
        config.validate()?;

        let backend = Arc::new(BackendLink::new(
            config.backend_url.clone(),
            config.reconnect_delay,
        ));
        let clients = Arc::new(ClientRegistry::new());
        let router = RequestRouter::new(backend.clone());

        Ok(Self {
            config,
            backend,
            clients,
            router,
        })
    }

    pub fn backend(&self) -> &Arc<BackendLink> {
        &self.backend
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Bind the listener, start relaying and connect to the backend.
    pub async fn bind(self) -> Result<RunningBroker> {
        let addr = self.config.listen_addr()?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        let addr = listener.local_addr().context("Failed to read local address")?;

        // Relay subscribes before the link can receive its first frame
        let relay = spawn_relay(&self.backend, self.clients.clone());
        self.backend.connect();

        let state = AppState {
            clients: self.clients.clone(),
            router: self.router.clone(),
            backend: self.backend.clone(),
            max_message_size: self.config.max_message_size,
            heartbeat_interval: self.config.heartbeat_interval,
        };
        let app = create_router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!("Broker listening on {}", addr);
        tracing::info!("Backend service: {}", self.config.backend_url);

        Ok(RunningBroker {
            addr,
            backend: self.backend,
            clients: self.clients,
            shutdown_tx,
            server,
            relay,
        })
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let running = self.bind().await?;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Shutdown signal received");

        running.shutdown().await
    }
}

impl RunningBroker {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL clients connect to
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn backend(&self) -> &Arc<BackendLink> {
        &self.backend
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Stop accepting clients, stop relaying and drop the backend link.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.relay.abort();
        self.backend.shutdown();

        let mut server = self.server;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
            Ok(joined) => joined.context("Server task panicked")?.context("Server error")?,
            Err(_) => {
                tracing::warn!(
                    "Server did not drain within {:?}, aborting",
                    SHUTDOWN_TIMEOUT
                );
                server.abort();
            },
        }

        tracing::info!("Broker stopped");
        Ok(())
    }
}

/// Broadcast every backend payload to all clients, in receipt order.
fn spawn_relay(backend: &BackendLink, clients: Arc<ClientRegistry>) -> JoinHandle<()> {
    let mut inbound = backend.subscribe();
    tokio::spawn(async move {
        while let Some(payload) = inbound.recv().await {
            let recipients = clients.broadcast(&payload).await;
            tracing::debug!(recipients, "Relayed backend message");
        }
    })
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(socket::handle_client_websocket))
        .route("/ws", get(socket::handle_client_websocket))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "speaker-broker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.backend.state(),
        clients: state.clients.len().await,
        oldest_client_since: state.clients.oldest_connected_at().await,
    })
}

/// 404 Not Found handler
async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "code": "NOT_FOUND"
        })),
    )
}
