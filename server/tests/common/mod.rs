//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

use authgate_server::{AuthManager, ServerMessage};
use authgate_server::auth::{AuthAppState, auth_routes};
use authgate_server::config::AuthConfig;
use authgate_server::server::{AppState, ws_handler};
use axum::{Json, Router, routing::get};
use futures_util::StreamExt;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tower_http::cors::{Any, CorsLayer};

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a test application router sharing one auth manager between
/// the WebSocket endpoint and the operator API
pub fn create_test_app_with_config(auth_config: AuthConfig) -> (Router, AppState) {
    let app_state = AppState::new()
        .with_auth_manager(Arc::new(AuthManager::new(Some(auth_config.timeout))))
        .with_auth_config(auth_config.clone());
    let auth_state = AuthAppState::new(
        app_state.auth_manager.clone(),
        auth_config.operator_token.as_deref(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(app_state.clone())
        .merge(Router::new().nest("/api/auth", auth_routes(auth_state)))
        .layer(cors);

    (app, app_state)
}

/// Create a test application router with default configuration
pub fn create_test_app_with_state() -> (Router, AppState) {
    create_test_app_with_config(AuthConfig::default())
}

/// Start a test server on a random port
pub async fn start_test_server(
    auth_config: AuthConfig,
) -> (SocketAddr, Router, AppState, tokio::task::JoinHandle<()>) {
    let (app, state) = create_test_app_with_config(auth_config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serve_app = app.clone();
    let handle = tokio::spawn(async move {
        axum::serve(listener, serve_app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, app, state, handle)
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let ws_url = format!("ws://{}/ws", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    ws_stream
}

/// Next server message, or `None` on close, error or a 2 second silence
pub async fn recv_message(ws: &mut WsClient) -> Option<ServerMessage> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&text) {
                        return Some(server_msg);
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Skip messages until one matches
pub async fn recv_until(
    ws: &mut WsClient,
    matches: impl Fn(&ServerMessage) -> bool,
) -> Option<ServerMessage> {
    while let Some(msg) = recv_message(ws).await {
        if matches(&msg) {
            return Some(msg);
        }
    }
    None
}

/// Wait for the connection's auth challenge and return its id
pub async fn expect_auth_required(ws: &mut WsClient) -> String {
    match recv_until(ws, |m| matches!(m, ServerMessage::AuthRequired { .. })).await {
        Some(ServerMessage::AuthRequired { auth_id, .. }) => auth_id,
        other => panic!("expected auth_required, got {:?}", other),
    }
}

/// True once the server has closed the stream
pub async fn wait_for_close(ws: &mut WsClient) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await
    .unwrap_or(false)
}

/// Initialize test logging for detailed output
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
