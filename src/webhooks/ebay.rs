//! eBay Marketplace Account Deletion notifications.
//!
//! eBay validates the endpoint with a GET carrying `challenge_code` and
//! expects `challengeResponse = hex(SHA-256(challenge_code + verification_token + endpoint))`,
//! where `endpoint` is the exact URL registered in the developer portal.
//! Actual deletion notices arrive as POSTs and only need a 2xx.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::{error::CredentialError, SharedState};

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    challenge_code: Option<String>,
}

pub fn challenge_response(challenge_code: &str, verification_token: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_code.as_bytes());
    hasher.update(verification_token.as_bytes());
    hasher.update(endpoint.as_bytes());
    hex::encode(hasher.finalize())
}

/// GET /verification-token
pub async fn verification_challenge(
    State(state): State<SharedState>,
    Query(q): Query<ChallengeQuery>,
) -> Result<Json<Value>, CredentialError> {
    let challenge_code = q
        .challenge_code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CredentialError::Validation("challenge_code is required".into()))?;
    let token = Config::require(&state.config.verification_token, "EBAY_VERIFICATION_TOKEN")?;
    let endpoint = Config::require(
        &state.config.notification_endpoint,
        "EBAY_NOTIFICATION_ENDPOINT",
    )?;

    Ok(Json(json!({
        "challengeResponse": challenge_response(&challenge_code, token, endpoint),
    })))
}

/// POST /verification-token
pub async fn deletion_notification(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let topic = body
        .pointer("/metadata/topic")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let notification_id = body
        .pointer("/notification/notificationId")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    tracing::info!("[Webhook] eBay notification topic={topic} id={notification_id}");

    (StatusCode::OK, Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_response_is_sha256_of_concatenation() {
        let expected = {
            let mut h = Sha256::new();
            h.update(b"abc123tokenhttps://example.test/verification-token");
            hex::encode(h.finalize())
        };
        assert_eq!(
            challenge_response("abc123", "token", "https://example.test/verification-token"),
            expected
        );
    }

    #[test]
    fn test_challenge_response_known_vector() {
        // sha256("abc") split across the three inputs
        assert_eq!(
            challenge_response("a", "b", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
