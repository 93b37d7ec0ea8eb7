//! `ParleyServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router as AxumRouter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tracing::info;

use parley_core::auth::VerificationKey;

use crate::config::ServerConfig;
use crate::fanout::Fanout;
use crate::gateway::Gateway;
use crate::health::{self, HealthResponse};
use crate::rooms::RoomRegistry;
use crate::router::Router;
use crate::session::{run_session, SessionContext};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection admission and teardown.
    pub gateway: Arc<Gateway>,
    /// Message routing.
    pub router: Arc<Router>,
    /// Connection table.
    pub fanout: Arc<Fanout>,
    /// Room membership.
    pub rooms: Arc<RoomRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Handshake deadline for new channels.
    pub handshake_timeout: Duration,
    /// Outbound queue depth per connection.
    pub outbound_queue_capacity: usize,
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The messaging server: wiring plus the HTTP surface.
pub struct ParleyServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    router: Arc<Router>,
    fanout: Arc<Fanout>,
    rooms: Arc<RoomRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ParleyServer {
    /// Wire up a server from its configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let fanout = Arc::new(Fanout::new());
        let rooms = Arc::new(RoomRegistry::new());
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&fanout),
            Arc::clone(&rooms),
            VerificationKey::from_secret(config.auth_secret.as_bytes()),
            config.max_connections,
        ));
        let router = Arc::new(Router::new(Arc::clone(&fanout), Arc::clone(&rooms)));
        Self {
            config,
            gateway,
            router,
            fanout,
            rooms,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Attach a Prometheus render handle for `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> AxumRouter {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            router: Arc::clone(&self.router),
            fanout: Arc::clone(&self.fanout),
            rooms: Arc::clone(&self.rooms),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            handshake_timeout: Duration::from_secs(self.config.handshake_timeout_secs),
            outbound_queue_capacity: self.config.outbound_queue_capacity,
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
        };

        AxumRouter::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (port 0 resolves here) and the serve
    /// task handle.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                tracing::error!(%err, "server task exited with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Shutdown coordinator for this server.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Connection gateway.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.fanout.connection_count()
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /
async fn root_handler() -> &'static str {
    concat!("parley ", env!("CARGO_PKG_VERSION"))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.fanout.connection_count(),
        state.rooms.room_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed\n".to_owned(),
        ),
    }
}

/// GET /ws — WebSocket upgrade.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let ctx = SessionContext {
        gateway: Arc::clone(&state.gateway),
        router: Arc::clone(&state.router),
        handshake_timeout: state.handshake_timeout,
        outbound_queue_capacity: state.outbound_queue_capacity,
        shutdown: state.shutdown.token(),
    };
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_session(socket, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> ParleyServer {
        let config = ServerConfig {
            auth_secret: "test-secret".into(),
            ..ServerConfig::default()
        };
        ParleyServer::new(config)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["rooms"], 0);
    }

    #[tokio::test]
    async fn root_names_the_server() {
        let app = make_server().router();
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 10_000).await.unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().starts_with("parley"));
    }

    #[tokio::test]
    async fn metrics_endpoint_404_without_recorder() {
        let app = make_server().router();
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let app = make_server().router();
        // A plain GET without upgrade headers is rejected by the extractor.
        let response = app
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        handle.await.unwrap();
    }
}
