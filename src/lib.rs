pub mod api;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod providers;
pub mod store;
pub mod webhooks;

pub use config::Config;
pub use credentials::{CredentialManager, GrantKind, TokenRecord};
pub use error::CredentialError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn store::TokenStore>,
    pub credentials: CredentialManager,
}

pub type SharedState = Arc<AppState>;
