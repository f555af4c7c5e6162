//! Server configuration
//!
//! Configuration is loaded from environment variables. See `.env.example` for documentation.

use std::env;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// WebSocket configuration
    pub websocket: WebSocketConfig,
}

/// Authentication-related configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// How long a connection may wait for approval
    pub timeout: Duration,
    /// Challenge every connection as soon as it opens
    pub auto_start: bool,
    /// Close connections whose authentication fails
    pub close_on_failure: bool,
    /// Bearer token required by the operator API (open when unset)
    pub operator_token: Option<String>,
}

/// WebSocket-related configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Interval between keepalive checks
    pub ping_interval: Duration,
    /// Extra idle time allowed past one ping interval
    pub ping_timeout: Duration,
    /// Maximum accepted text frame size in bytes
    pub max_message_size: usize,
    /// Outbound queue depth per connection
    pub outbound_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth: AuthConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            auto_start: true,
            close_on_failure: true,
            operator_token: None,
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024, // 64KB
            outbound_buffer: 32,
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Server config
        if let Some(host) = var("HOST") {
            config.host = host;
        }
        if let Some(port) = var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Auth config
        if let Some(val) = var("AUTH_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.auth.timeout = Duration::from_millis(ms);
        }
        if let Some(val) = var("AUTH_AUTO_START") {
            config.auth.auto_start = parse_bool(&val);
        }
        if let Some(val) = var("AUTH_CLOSE_ON_FAILURE") {
            config.auth.close_on_failure = parse_bool(&val);
        }
        if let Some(token) = var("OPERATOR_TOKEN")
            && !token.is_empty()
        {
            config.auth.operator_token = Some(token);
        }

        // WebSocket config
        if let Some(val) = var("WS_PING_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.websocket.ping_interval = Duration::from_secs(secs);
        }
        if let Some(val) = var("WS_PING_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.websocket.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = var("WS_MAX_MESSAGE_KB")
            && let Ok(kb) = val.parse::<usize>()
        {
            config.websocket.max_message_size = kb * 1024;
        }

        config
    }
}
