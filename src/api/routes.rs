//! Route handlers for the eBay consent flow and credential administration.
//!
//! Marketplace pass-through handlers live elsewhere and only ever call
//! [`crate::credentials::CredentialManager::get_valid_access_token`].

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::credentials::GrantKind;
use crate::error::CredentialError;
use crate::webhooks::ebay as ebay_webhooks;
use crate::SharedState;

// =============================================================================
// Routers
// =============================================================================

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── eBay OAuth ───────────────────────────────────────────────────
        .route("/auth/initial", get(auth_initial))
        .route("/auth/ebay", get(auth_url).delete(auth_forget))
        .route("/auth/ebay/callback", get(auth_callback))
        .route("/auth/ebay/callback/declined", get(auth_declined))
        .route("/auth/refresh-token", get(auth_refresh))
        .route("/auth/auth-file", get(auth_file))
        .with_state(state)
}

pub fn notification_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/verification-token",
            get(ebay_webhooks::verification_challenge).post(ebay_webhooks::deletion_notification),
        )
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "seller-auth",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

/// GET /api/auth/initial: Mint an application token (client credentials).
async fn auth_initial(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, CredentialError> {
    let record = state.credentials.mint_application_token().await?;
    let status = state.credentials.status_of(&record);
    Ok(Json(json!({ "data": status })))
}

/// GET /api/auth/ebay: Consent URL for the seller.
async fn auth_url(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, CredentialError> {
    let url = state.credentials.build_authorization_url()?;
    Ok(Json(json!({ "authUrl": url.as_str() })))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

/// GET /api/auth/ebay/callback: eBay redirects here after consent.
async fn auth_callback(
    State(state): State<SharedState>,
    Query(q): Query<CallbackQuery>,
) -> Result<Json<serde_json::Value>, CredentialError> {
    let signed_state = q.state.as_deref().ok_or(CredentialError::InvalidState)?;
    state.credentials.verify_state(signed_state)?;

    let code = q.code.unwrap_or_default();
    let record = state.credentials.exchange_authorization_code(&code).await?;
    tracing::info!("Seller authorized via consent flow");

    let status = state.credentials.status_of(&record);
    Ok(Json(json!({
        "message": "Authentication successful, refresh token saved",
        "data": status,
    })))
}

/// GET /api/auth/ebay/callback/declined: eBay redirects here when the seller declines.
async fn auth_declined() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {
                "code": "consent_declined",
                "message": "User denied access to eBay account",
            }
        })),
    )
}

/// GET /api/auth/refresh-token: Force a user-token refresh.
async fn auth_refresh(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, CredentialError> {
    let record = state.credentials.refresh_user_token().await?;
    let status = state.credentials.status_of(&record);
    Ok(Json(json!({ "data": status })))
}

/// GET /api/auth/auth-file: Metadata for both stored records, never the tokens.
async fn auth_file(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, CredentialError> {
    let application = state.credentials.status(GrantKind::Application).await?;
    let user = state.credentials.status(GrantKind::User).await?;
    Ok(Json(json!({
        "data": {
            "application": application,
            "user": user,
        }
    })))
}

/// DELETE /api/auth/ebay: Drop the stored user credential.
async fn auth_forget(
    State(state): State<SharedState>,
) -> Result<StatusCode, CredentialError> {
    state.credentials.forget_user_token().await?;
    Ok(StatusCode::NO_CONTENT)
}
