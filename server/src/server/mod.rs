//! WebSocket server: connection registry and per-connection tasks

mod websocket;

pub use websocket::{
    AppState, Connection, ConnectionHandle, ConnectionRegistry, ConnectionStats, Outbound,
    ws_handler,
};
