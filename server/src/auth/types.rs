//! Core types for pending authentication tracking

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Auth ID: 32-character lowercase hex string
pub type AuthId = String;

const AUTH_ID_LENGTH: usize = 32;

/// Failure reasons reported to auth callbacks
pub const REASON_REJECTED: &str = "Authentication rejected";
pub const REASON_TIMED_OUT: &str = "Authentication timed out";
pub const REASON_CANCELLED: &str = "Authentication cancelled";
pub const REASON_SUPERSEDED: &str = "Superseded by a newer authentication attempt";
pub const REASON_CONNECTION_CLOSED: &str = "Connection closed";
pub const REASON_DELIVERY_FAILED: &str = "Failed to deliver authentication request";

/// Callback fired exactly once when a pending authentication resolves.
///
/// Receives `true` with no error on success, or `false` with a reason.
pub type AuthCallback = Box<dyn FnOnce(bool, Option<String>) + Send + 'static>;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unknown or already resolved auth id: {0}")]
    UnknownAuthId(AuthId),

    #[error("Malformed auth id: {0}")]
    InvalidAuthId(String),
}

/// The challenge could not reach the peer
#[derive(Debug, Error)]
#[error("Failed to deliver auth request: {0}")]
pub struct DeliveryError(pub String);

/// A connection that can be challenged for authentication
#[async_trait]
pub trait AuthSocket: Send + Sync {
    /// Stable identifier of the underlying connection
    fn id(&self) -> Uuid;

    /// Deliver the challenge for `auth_id` to the peer
    async fn send_auth_request(
        &self,
        auth_id: &str,
        expires_in: Duration,
    ) -> Result<(), DeliveryError>;
}

/// Operator-facing view of a pending authentication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAuthInfo {
    pub auth_id: AuthId,
    pub socket_id: Uuid,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
}

/// Generate a fresh auth ID (128 bits, hex encoded)
pub fn generate_auth_id() -> AuthId {
    Uuid::new_v4().simple().to_string()
}

/// Validation rules
pub fn validate_auth_id(id: &str) -> bool {
    id.len() == AUTH_ID_LENGTH && id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
