//! AuthGate Server Library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod auth;
pub mod config;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use auth::{AuthAppState, AuthManager, AuthSocket, auth_routes};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::AppState;
