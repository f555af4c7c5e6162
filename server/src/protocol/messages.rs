use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client to Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start (or restart) authentication for this connection
    Authenticate { seq: u64 },
    /// Relay a payload to every other authenticated connection
    Broadcast {
        payload: serde_json::Value,
        seq: u64,
    },
    /// Ping for keepalive
    Ping { seq: u64 },
}

/// Server to Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication challenge awaiting operator approval
    AuthRequired { auth_id: String, expires_in_ms: u64 },
    /// Outcome of the pending authentication
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Acknowledgment of client action
    Ack {
        ack_seq: u64,
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Protocol or authorization error
    Error { code: ErrorCode, message: String },
    /// Payload relayed from another connection
    Relay {
        from: Uuid,
        payload: serde_json::Value,
    },
    /// Pong response (to client's Ping)
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    Unauthorized,
    AuthPending,
}

impl ClientMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::Broadcast { .. } => "broadcast",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

impl ServerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::AuthRequired { .. } => "auth_required",
            ServerMessage::AuthResult { .. } => "auth_result",
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Relay { .. } => "relay",
            ServerMessage::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"broadcast","payload":{"text":"hi"},"seq":7}"#)
                .unwrap();
        match msg {
            ClientMessage::Broadcast { payload, seq } => {
                assert_eq!(payload["text"], "hi");
                assert_eq!(seq, 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"authenticate","seq":1}"#).unwrap();
        assert_eq!(msg.message_type(), "authenticate");
    }

    #[test]
    fn test_auth_required_wire_format() {
        let msg = ServerMessage::AuthRequired {
            auth_id: "0123456789abcdef0123456789abcdef".to_string(),
            expires_in_ms: 30_000,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "auth_required");
        assert_eq!(json["auth_id"], "0123456789abcdef0123456789abcdef");
        assert_eq!(json["expires_in_ms"], 30_000);
    }

    #[test]
    fn test_server_message_type_matches_tag() {
        let messages = [
            ServerMessage::Pong,
            ServerMessage::AuthResult {
                success: true,
                error: None,
            },
            ServerMessage::Ack {
                ack_seq: 3,
                status: AckStatus::Rejected,
                reason: Some("nope".to_string()),
            },
        ];

        for msg in messages {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], msg.message_type());
        }
    }

    #[test]
    fn test_auth_result_omits_error_on_success() {
        let ok = serde_json::to_value(ServerMessage::AuthResult {
            success: true,
            error: None,
        })
        .unwrap();
        assert_eq!(ok["type"], "auth_result");
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(ServerMessage::AuthResult {
            success: false,
            error: Some("Authentication timed out".to_string()),
        })
        .unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "Authentication timed out");
    }

    #[test]
    fn test_error_code_snake_case() {
        let json = serde_json::to_value(ServerMessage::Error {
            code: ErrorCode::AuthPending,
            message: "pending".to_string(),
        })
        .unwrap();
        assert_eq!(json["code"], "auth_pending");
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe","seq":1}"#);
        assert!(result.is_err());
    }
}
