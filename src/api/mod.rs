//! HTTP surface of seller-auth.
//!
//! - `/api/status`: health check
//! - `/api/auth/...`: eBay consent flow and credential administration
//! - `/verification-token`: eBay account deletion notifications

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", routes::api_router(state.clone()))
        .merge(routes::notification_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
