use authgate_server::AuthManager;
use authgate_server::auth::{AuthAppState, auth_routes};
use authgate_server::config::Config;
use authgate_server::server::{AppState, ws_handler};
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn uptime_seconds() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime_seconds(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    /// Server uptime in seconds
    uptime_seconds: u64,
    /// Server version
    version: &'static str,
    /// Open WebSocket connections
    connections: usize,
    /// Connections that passed authentication
    authenticated_connections: usize,
    /// Authentications awaiting a decision
    pending_auths: usize,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let stats = state.get_stats().await;

    Json(MetricsResponse {
        uptime_seconds: uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
        connections: stats.connections,
        authenticated_connections: stats.authenticated_connections,
        pending_auths: stats.pending_auths,
    })
}

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Update gauge metrics for connections and pending auths (called periodically)
async fn update_gauge_metrics(state: &AppState) {
    let stats = state.get_stats().await;

    metrics::gauge!("authgate_ws_connections_active").set(stats.connections as f64);
    metrics::gauge!("authgate_ws_connections_authenticated")
        .set(stats.authenticated_connections as f64);
    metrics::gauge!("authgate_auth_pending").set(stats.pending_auths as f64);
    metrics::gauge!("authgate_uptime_seconds").set(uptime_seconds() as f64);
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Record server start time
    START_TIME.set(Instant::now()).ok();

    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, auth_timeout={:?}",
        config.host, config.port, config.auth.timeout
    );
    if config.auth.operator_token.is_none() {
        warn!("OPERATOR_TOKEN not set - the approval API is unauthenticated");
    }

    let auth_manager = Arc::new(AuthManager::new(Some(config.auth.timeout)));
    let auth_state = AuthAppState::new(
        auth_manager.clone(),
        config.auth.operator_token.as_deref(),
    );

    let app_state = AppState::new()
        .with_auth_manager(auth_manager.clone())
        .with_auth_config(config.auth.clone())
        .with_ws_config(config.websocket.clone());

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
        // Operator routes carry their own state
        .merge(Router::new().nest("/api/auth", auth_routes(auth_state)))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("AuthGate server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Fail anything still waiting on an operator while sockets are
            // open. Delivery of the resulting auth_result frames is best
            // effort: the runtime stops once serve returns.
            auth_manager.clear().await;
            tokio::task::yield_now().await;
        })
        .await?;

    info!("AuthGate server stopped");

    Ok(())
}
