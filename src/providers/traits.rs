use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CredentialError;

/// Tokens returned by the identity provider for any grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// The OAuth2 endpoints the credential manager needs.
///
/// Implementations only talk to the network; persistence, caching and
/// expiry decisions belong to [`crate::credentials::CredentialManager`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short identifier used in logs (e.g. "ebay").
    fn id(&self) -> &str;

    /// Build the consent page URL the seller is redirected to.
    ///
    /// Pure; fails only when required configuration is missing.
    fn authorization_url(&self, scopes: &[String], state: &str) -> Result<Url, CredentialError>;

    /// Client-credentials grant: an application token with no user context.
    async fn client_credentials(&self, scopes: &[String]) -> Result<TokenSet, CredentialError>;

    /// Authorization-code grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, CredentialError>;

    /// Refresh-token grant. `scopes` must be a subset of the originally
    /// consented scopes.
    async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenSet, CredentialError>;
}
