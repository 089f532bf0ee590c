//! HTTP routes, shared state and listener startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::RelayError;
use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{Authenticator, TokenStore};
use crate::health::{self, HealthResponse};
use crate::metrics::TOKENS_ISSUED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{KeepAlive, Registry, run_connection};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    /// Live connections and the token store.
    pub registry: Arc<Registry>,
    /// Login credential check.
    pub authenticator: Arc<dyn Authenticator>,
    /// Keepalive timing applied to new connections.
    pub keepalive: KeepAlive,
    /// Inbound frame/message size cap, in bytes.
    pub max_message_size: usize,
    /// Origins allowed to upgrade; empty accepts any.
    pub allowed_origins: Arc<[String]>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State for `settings` around an existing registry.
    pub fn new(
        settings: &RelaySettings,
        registry: Arc<Registry>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            registry,
            authenticator,
            keepalive: KeepAlive::from(&settings.connection),
            max_message_size: settings.connection.max_message_size,
            allowed_origins: settings.server.allowed_origins.clone().into(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|origin| self.allowed_origins.iter().any(|o| o == origin))
    }
}

/// HTTP-boundary error rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub RelayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            other => {
                if other.is_connection_fatal() {
                    error!(error = %other, kind = other.error_kind(), "connection error at http boundary");
                }
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Body of `POST /login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// Successful `POST /login` reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// One-time token to present on `/ws`.
    pub otp: String,
}

/// Query string of `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// One-time token from `/login`.
    #[serde(default)]
    pub otp: Option<String>,
}

/// Build the router over `state`.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/login", post(login_handler))
        .route("/ws", get(ws_handler))
        .route("/debug", get(debug_handler))
        .route("/health", get(health_handler));
    if state.metrics.is_some() {
        router = router.route("/metrics", get(metrics_handler));
    }
    router.with_state(state).layer(TraceLayer::new_for_http())
}

/// Running server and its background tasks.
pub struct ServerHandle {
    addr: SocketAddr,
    registry: Arc<Registry>,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Live connection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Background tasks, for draining on shutdown.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        vec![self.server, self.sweeper]
    }
}

/// Bind the listener and serve until `shutdown` fires.
pub async fn start(
    settings: &RelaySettings,
    authenticator: Arc<dyn Authenticator>,
    shutdown: &ShutdownCoordinator,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let tokens = Arc::new(TokenStore::new(settings.auth.token_ttl()));
    let sweeper = tokens.spawn_sweeper(shutdown.token());
    let registry = Arc::new(Registry::with_default_handlers(
        tokens,
        settings.connection.mailbox_capacity,
    ));

    let mut state = AppState::new(settings, Arc::clone(&registry), authenticator);
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }
    let router = build_router(state);

    let bind = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "relay listening");

    let cancel = shutdown.token();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!(error = %e, "server stopped with error");
        }
        info!("server stopped");
    });

    Ok(ServerHandle {
        addr,
        registry,
        server,
        sweeper,
    })
}

/// POST /login
async fn login_handler(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = body.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    if !state.authenticator.authenticate(&req.username, &req.password) {
        warn!(username = %req.username, "login rejected");
        return Err(RelayError::Unauthorized("invalid credentials".into()).into());
    }
    let token = state.registry.tokens().issue();
    counter!(TOKENS_ISSUED_TOTAL).increment(1);
    info!(username = %req.username, "token issued");
    Ok(Json(LoginResponse { otp: token.key }))
}

/// GET /ws?otp=
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    if !state.origin_allowed(&headers) {
        return Err(RelayError::Forbidden("origin not allowed".into()).into());
    }
    let otp = params.otp.unwrap_or_default();
    if otp.is_empty() {
        return Err(RelayError::BadRequest("otp is required".into()).into());
    }
    if !state.registry.tokens().verify(&otp) {
        return Err(RelayError::Unauthorized("invalid or expired otp".into()).into());
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let registry = Arc::clone(&state.registry);
    let keepalive = state.keepalive;
    Ok(upgrade
        .max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_connection(socket, registry, keepalive)))
}

/// GET /debug
async fn debug_handler(State(state): State<AppState>) -> String {
    state.registry.connection_count().to_string()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.tokens().len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
