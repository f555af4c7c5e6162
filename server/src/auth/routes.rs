//! HTTP route handlers for the operator approval API

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;

use super::manager::AuthManager;
use super::types::{AuthError, PendingAuthInfo};

/// Application state for the operator API
#[derive(Clone)]
pub struct AuthAppState {
    pub auth_manager: Arc<AuthManager>,
    /// SHA-256 hex digest of the operator token; `None` leaves the API open
    pub operator_token_hash: Option<String>,
}

impl AuthAppState {
    pub fn new(auth_manager: Arc<AuthManager>, operator_token: Option<&str>) -> Self {
        Self {
            auth_manager,
            operator_token_hash: operator_token.map(hash_token),
        }
    }
}

/// Error response for auth API
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip)]
    status: StatusCode,
}

impl AuthErrorResponse {
    fn unauthorized() -> Self {
        Self {
            error: "Missing or invalid operator token".to_string(),
            code: "unauthorized".to_string(),
            status: StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<AuthError> for AuthErrorResponse {
    fn from(e: AuthError) -> Self {
        let (code, status) = match &e {
            AuthError::UnknownAuthId(_) => ("not_found", StatusCode::NOT_FOUND),
            AuthError::InvalidAuthId(_) => ("invalid_auth_id", StatusCode::BAD_REQUEST),
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
            status,
        }
    }
}

impl IntoResponse for AuthErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Check the bearer token against the configured operator token
fn authorize(state: &AuthAppState, headers: &HeaderMap) -> Result<(), AuthErrorResponse> {
    let Some(expected) = state.operator_token_hash.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if hash_token(token) == expected => Ok(()),
        _ => {
            tracing::warn!("Rejected operator request with missing or invalid token");
            Err(AuthErrorResponse::unauthorized())
        }
    }
}

/// GET /api/auth/pending - List pending authentications
pub async fn list_pending(
    State(state): State<AuthAppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PendingAuthInfo>>, AuthErrorResponse> {
    authorize(&state, &headers)?;
    Ok(Json(state.auth_manager.pending_snapshot().await))
}

/// POST /api/auth/:auth_id/approve - Approve a pending authentication
pub async fn approve(
    State(state): State<AuthAppState>,
    Path(auth_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AuthErrorResponse> {
    complete(&state, &headers, &auth_id, true).await
}

/// POST /api/auth/:auth_id/reject - Reject a pending authentication
pub async fn reject(
    State(state): State<AuthAppState>,
    Path(auth_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AuthErrorResponse> {
    complete(&state, &headers, &auth_id, false).await
}

async fn complete(
    state: &AuthAppState,
    headers: &HeaderMap,
    auth_id: &str,
    success: bool,
) -> Result<StatusCode, AuthErrorResponse> {
    authorize(state, headers)?;

    state
        .auth_manager
        .complete_auth(auth_id, success)
        .await
        .map_err(|e| {
            tracing::debug!("Failed to complete auth {}: {}", auth_id, e);
            AuthErrorResponse::from(e)
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Hash a token using SHA256 for comparison
fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build operator auth API routes
pub fn auth_routes(state: AuthAppState) -> Router {
    Router::new()
        .route("/pending", get(list_pending))
        .route("/:auth_id/approve", post(approve))
        .route("/:auth_id/reject", post(reject))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_sha256_hex() {
        // sha256("secret")
        assert_eq!(
            hash_token("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn test_open_api_without_operator_token() {
        let state = AuthAppState::new(Arc::new(AuthManager::default()), None);
        assert!(authorize(&state, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_bearer_token_required_when_configured() {
        let state = AuthAppState::new(Arc::new(AuthManager::default()), Some("s3cret"));

        assert!(authorize(&state, &HeaderMap::new()).is_err());

        let mut wrong = HeaderMap::new();
        wrong.insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        assert!(authorize(&state, &wrong).is_err());

        let mut not_bearer = HeaderMap::new();
        not_bearer.insert(header::AUTHORIZATION, "s3cret".parse().unwrap());
        assert!(authorize(&state, &not_bearer).is_err());

        let mut right = HeaderMap::new();
        right.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(authorize(&state, &right).is_ok());
    }

    #[test]
    fn test_error_codes_map_to_status() {
        let not_found = AuthErrorResponse::from(AuthError::UnknownAuthId("x".into()));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let malformed = AuthErrorResponse::from(AuthError::InvalidAuthId("x".into()));
        assert_eq!(malformed.into_response().status(), StatusCode::BAD_REQUEST);

        let unauthorized = AuthErrorResponse::unauthorized();
        assert_eq!(unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_body_carries_code_only() {
        let response = AuthErrorResponse::from(AuthError::UnknownAuthId("abc".into()));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["code"], "not_found");
        assert!(json["error"].as_str().unwrap().contains("abc"));
        assert!(json.get("status").is_none());
    }
}
