//! Pending authentication module
//!
//! This module provides:
//! - `AuthManager` for tracking in-flight authentications with timeouts
//! - `AuthSocket` trait for connections that can be challenged
//! - HTTP routes for operators to list, approve and reject attempts

pub mod manager;
pub mod routes;
mod types;

pub use manager::{AuthManager, DEFAULT_AUTH_TIMEOUT};
pub use routes::{AuthAppState, auth_routes};
pub use types::{
    AuthCallback, AuthError, AuthId, AuthSocket, DeliveryError, PendingAuthInfo, REASON_CANCELLED,
    REASON_CONNECTION_CLOSED, REASON_DELIVERY_FAILED, REASON_REJECTED, REASON_SUPERSEDED,
    REASON_TIMED_OUT, generate_auth_id, validate_auth_id,
};
