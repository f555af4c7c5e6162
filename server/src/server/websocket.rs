use crate::auth::{AuthManager, AuthSocket, DeliveryError, REASON_SUPERSEDED};
use crate::config::{AuthConfig, WebSocketConfig};
use crate::protocol::{AckStatus, ClientMessage, ErrorCode, ServerMessage};
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use metrics::counter;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Frames queued for a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    Ping,
    Close,
}

/// Connection state for a single client
pub struct Connection {
    pub id: Uuid,
    /// Written by auth callbacks, which may run outside any async context
    pub authenticated: Arc<AtomicBool>,
    pub last_seen: Instant,
    pub sender: mpsc::Sender<Outbound>,
}

impl Connection {
    pub fn new(id: Uuid, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            authenticated: Arc::new(AtomicBool::new(false)),
            last_seen: Instant::now(),
            sender,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }
}

/// Global connection registry
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, Connection>>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionRegistry,
    pub auth_manager: Arc<AuthManager>,
    pub auth_config: AuthConfig,
    pub ws_config: WebSocketConfig,
}

/// Connection counters for health and metrics endpoints
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connections: usize,
    pub authenticated_connections: usize,
    pub pending_auths: usize,
}

impl AppState {
    pub fn new() -> Self {
        let auth_config = AuthConfig::default();
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            auth_manager: Arc::new(AuthManager::new(Some(auth_config.timeout))),
            auth_config,
            ws_config: WebSocketConfig::default(),
        }
    }

    pub fn with_auth_manager(mut self, auth_manager: Arc<AuthManager>) -> Self {
        self.auth_manager = auth_manager;
        self
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }

    pub fn with_ws_config(mut self, ws_config: WebSocketConfig) -> Self {
        self.ws_config = ws_config;
        self
    }

    pub async fn get_stats(&self) -> ConnectionStats {
        let (connections, authenticated_connections) = {
            let connections = self.connections.read().await;
            let authenticated = connections
                .values()
                .filter(|c| c.is_authenticated())
                .count();
            (connections.len(), authenticated)
        };

        ConnectionStats {
            connections,
            authenticated_connections,
            pending_auths: self.auth_manager.pending_count().await,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// The auth manager's view of a connection
pub struct ConnectionHandle {
    id: Uuid,
    sender: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: Uuid, sender: mpsc::Sender<Outbound>) -> Self {
        Self { id, sender }
    }
}

#[async_trait]
impl AuthSocket for ConnectionHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_auth_request(
        &self,
        auth_id: &str,
        expires_in: Duration,
    ) -> Result<(), DeliveryError> {
        self.sender
            .send(Outbound::Message(ServerMessage::AuthRequired {
                auth_id: auth_id.to_string(),
                expires_in_ms: expires_in.as_millis() as u64,
            }))
            .await
            .map_err(|_| DeliveryError(format!("connection {} closed", self.id)))
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("New WebSocket connection: {}", connection_id);

    // Create channel for outgoing frames
    let (tx, rx) = mpsc::channel::<Outbound>(state.ws_config.outbound_buffer);

    // Register connection
    let authenticated = {
        let connection = Connection::new(connection_id, tx.clone());
        let authenticated = connection.authenticated.clone();
        let mut connections = state.connections.write().await;
        connections.insert(connection_id, connection);
        authenticated
    };

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut send_task = tokio::spawn(forward_outbound(ws_sender, rx));
    let ping_task = tokio::spawn(keepalive(state.clone(), connection_id, tx.clone()));

    if state.auth_config.auto_start {
        begin_auth(&state, connection_id, &authenticated, &tx).await;
    }

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let Some(result) = incoming else {
                    break;
                };
                match result {
                    Ok(Message::Text(text)) => {
                        touch(&state, connection_id).await;

                        if text.len() > state.ws_config.max_message_size {
                            warn!(
                                "Message from {} exceeds {} bytes",
                                connection_id, state.ws_config.max_message_size
                            );
                            send_error(
                                &tx,
                                ErrorCode::InvalidMessage,
                                format!(
                                    "Message exceeds {} bytes",
                                    state.ws_config.max_message_size
                                ),
                            )
                            .await;
                            continue;
                        }

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(
                                    client_msg,
                                    connection_id,
                                    &authenticated,
                                    &state,
                                    &tx,
                                )
                                .await;
                            }
                            Err(e) => {
                                warn!("Failed to parse client message: {}", e);
                                send_error(
                                    &tx,
                                    ErrorCode::InvalidMessage,
                                    format!("Invalid message format: {}", e),
                                )
                                .await;
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        debug!("Ignoring binary message from {}", connection_id);
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        // Pings are answered by axum
                        touch(&state, connection_id).await;
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client {} requested close", connection_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error for {}: {}", connection_id, e);
                        break;
                    }
                }
            }
            _ = &mut send_task => {
                debug!("Outbound stream for {} finished", connection_id);
                break;
            }
        }
    }

    // Cleanup
    ping_task.abort();
    send_task.abort();

    state.auth_manager.cancel_for_socket(connection_id).await;

    {
        let mut connections = state.connections.write().await;
        connections.remove(&connection_id);
    }

    info!("WebSocket connection closed: {}", connection_id);
}

/// Write queued frames to the socket until closed
async fn forward_outbound(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Message(msg) => match serde_json::to_string(&msg) {
                Ok(json) => {
                    counter!("authgate_ws_messages_sent_total", "type" => msg.message_type())
                        .increment(1);
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            },
            Outbound::Ping => {
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Ping the client periodically and close it once idle for too long
async fn keepalive(state: AppState, connection_id: Uuid, tx: mpsc::Sender<Outbound>) {
    let config = state.ws_config.clone();
    let mut interval = tokio::time::interval(config.ping_interval);
    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        let idle = {
            let connections = state.connections.read().await;
            match connections.get(&connection_id) {
                Some(conn) => conn.last_seen.elapsed() > config.ping_timeout + config.ping_interval,
                None => true,
            }
        };

        if idle {
            debug!("Connection {} timed out", connection_id);
            let _ = tx.send(Outbound::Close).await;
            break;
        }

        if tx.send(Outbound::Ping).await.is_err() {
            break;
        }
    }
}

async fn touch(state: &AppState, connection_id: Uuid) {
    let mut connections = state.connections.write().await;
    if let Some(conn) = connections.get_mut(&connection_id) {
        conn.last_seen = Instant::now();
    }
}

/// Challenge a connection and wire the outcome back to it
async fn begin_auth(
    state: &AppState,
    connection_id: Uuid,
    authenticated: &Arc<AtomicBool>,
    tx: &mpsc::Sender<Outbound>,
) {
    let socket = ConnectionHandle::new(connection_id, tx.clone());
    let flag = authenticated.clone();
    let reply = tx.clone();
    let close_on_failure = state.auth_config.close_on_failure;

    state
        .auth_manager
        .start_auth(&socket, move |success, error| {
            // The flag is settled before the manager call that resolved us returns
            if record_auth_outcome(connection_id, &flag, success, error.as_deref()) {
                tokio::spawn(send_auth_result(reply, close_on_failure, success, error));
            }
        })
        .await;

    // Approval of an earlier attempt can land between the caller's check and
    // `start_auth`; drop the attempt it just opened
    if authenticated.load(Ordering::Acquire) {
        state.auth_manager.cancel_for_socket(connection_id).await;
    }
}

/// Apply an auth outcome to the connection's flag.
///
/// Returns `false` when the outcome must not reach the client: superseded
/// attempts, and failures of attempts left over once the connection is
/// already authenticated.
fn record_auth_outcome(
    connection_id: Uuid,
    authenticated: &AtomicBool,
    success: bool,
    error: Option<&str>,
) -> bool {
    if error == Some(REASON_SUPERSEDED) {
        debug!("Superseded auth for {} resolved silently", connection_id);
        return false;
    }

    if success {
        authenticated.store(true, Ordering::Release);
        info!("Connection {} authenticated", connection_id);
        return true;
    }

    if authenticated.load(Ordering::Acquire) {
        debug!(
            "Ignoring stale auth failure for authenticated connection {}: {}",
            connection_id,
            error.unwrap_or("unknown reason")
        );
        return false;
    }

    info!(
        "Connection {} failed authentication: {}",
        connection_id,
        error.unwrap_or("unknown reason")
    );
    true
}

async fn send_auth_result(
    tx: mpsc::Sender<Outbound>,
    close_on_failure: bool,
    success: bool,
    error: Option<String>,
) {
    let _ = tx
        .send(Outbound::Message(ServerMessage::AuthResult { success, error }))
        .await;

    if !success && close_on_failure {
        let _ = tx.send(Outbound::Close).await;
    }
}

async fn send_error(tx: &mpsc::Sender<Outbound>, code: ErrorCode, message: String) {
    let _ = tx
        .send(Outbound::Message(ServerMessage::Error { code, message }))
        .await;
}

async fn send_ack(
    tx: &mpsc::Sender<Outbound>,
    seq: u64,
    status: AckStatus,
    reason: Option<String>,
) {
    let _ = tx
        .send(Outbound::Message(ServerMessage::Ack {
            ack_seq: seq,
            status,
            reason,
        }))
        .await;
}

/// Handle a parsed client message
async fn handle_client_message(
    msg: ClientMessage,
    connection_id: Uuid,
    authenticated: &Arc<AtomicBool>,
    state: &AppState,
    tx: &mpsc::Sender<Outbound>,
) {
    counter!("authgate_ws_messages_total", "type" => msg.message_type()).increment(1);

    match msg {
        ClientMessage::Ping { seq } => {
            let _ = tx.send(Outbound::Message(ServerMessage::Pong)).await;
            send_ack(tx, seq, AckStatus::Ok, None).await;
        }
        ClientMessage::Authenticate { seq } => {
            if authenticated.load(Ordering::Acquire) {
                send_ack(
                    tx,
                    seq,
                    AckStatus::Ok,
                    Some("Already authenticated".to_string()),
                )
                .await;
                return;
            }

            begin_auth(state, connection_id, authenticated, tx).await;
            send_ack(tx, seq, AckStatus::Ok, None).await;
        }
        ClientMessage::Broadcast { payload, seq } => {
            if !authenticated.load(Ordering::Acquire) {
                let (code, message) = if state
                    .auth_manager
                    .pending_for_socket(connection_id)
                    .await
                    .is_some()
                {
                    (ErrorCode::AuthPending, "Authentication is still pending")
                } else {
                    (ErrorCode::Unauthorized, "Connection is not authenticated")
                };
                send_error(tx, code, message.to_string()).await;
                send_ack(tx, seq, AckStatus::Rejected, Some(message.to_string())).await;
                return;
            }

            let recipients: Vec<mpsc::Sender<Outbound>> = {
                let connections = state.connections.read().await;
                connections
                    .values()
                    .filter(|conn| conn.is_authenticated() && conn.id != connection_id)
                    .map(|conn| conn.sender.clone())
                    .collect()
            };

            debug!(
                "Relaying broadcast from {} to {} connections",
                connection_id,
                recipients.len()
            );

            for recipient in recipients {
                let relay = Outbound::Message(ServerMessage::Relay {
                    from: connection_id,
                    payload: payload.clone(),
                });
                if recipient.try_send(relay).is_err() {
                    warn!("Dropped relay from {}: recipient queue full", connection_id);
                }
            }

            send_ack(tx, seq, AckStatus::Ok, None).await;
        }
    }
}
