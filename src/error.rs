use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the seller-auth service.
///
/// Payloads are plain strings so the error is `Clone`: a renewal shared by
/// several waiters hands each of them the same failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    // ── Setup ───────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Identity provider ───────────────────────────────────────────────
    #[error("Identity provider error: {0}")]
    AuthProvider(String),

    #[error("No stored {0} credential; run the consent flow first")]
    NoStoredCredential(String),

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ── Request ─────────────────────────────────────────────────────────
    #[error("Bad request: {0}")]
    Validation(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl From<sqlx::Error> for CredentialError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        CredentialError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for CredentialError {
    fn from(e: std::io::Error) -> Self {
        CredentialError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(e: serde_json::Error) -> Self {
        CredentialError::Persistence(format!("malformed token record: {e}"))
    }
}

impl IntoResponse for CredentialError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CredentialError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            CredentialError::AuthProvider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            CredentialError::NoStoredCredential(_) => {
                (StatusCode::CONFLICT, "no_stored_credential")
            }
            CredentialError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error")
            }
            CredentialError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            CredentialError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            CredentialError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
