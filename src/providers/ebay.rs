use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::traits::{IdentityProvider, TokenSet};
use crate::config::{Config, EbayEnvironment};
use crate::error::CredentialError;

/// eBay OAuth 2.0 provider.
///
/// Quirks:
/// - Client authentication is HTTP Basic (`client_id:client_secret`) on every grant.
/// - `redirect_uri` is the application's RuName, not a URL.
/// - Application tokens (client credentials) live 2 hours and have no refresh token.
/// - User tokens live 2 hours; the refresh token lives ~18 months and is not
///   rotated on refresh, so the refresh response carries no `refresh_token`.
/// - Refresh requests must name scopes, and only previously consented ones.
pub struct EbayProvider {
    environment: EbayEnvironment,
    client_id: Option<String>,
    client_secret: Option<String>,
    ru_name: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EbayTokenResponse {
    access_token: String,
    token_type: String,
    expires_in: u64,
    refresh_token: Option<String>,
    refresh_token_expires_in: Option<u64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EbayErrorResponse {
    error: String,
    error_description: Option<String>,
}

impl EbayProvider {
    pub fn new(config: &Config) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CredentialError::Configuration(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            environment: config.environment,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            ru_name: config.ru_name.clone(),
            http,
        })
    }

    fn token_endpoint(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.environment.api_base())
    }

    fn client_credentials_pair(&self) -> Result<(&str, &str), CredentialError> {
        Ok((
            Config::require(&self.client_id, "EBAY_CLIENT_ID")?,
            Config::require(&self.client_secret, "EBAY_CLIENT_SECRET")?,
        ))
    }

    /// POST a form to the token endpoint and decode the token response.
    async fn token_request(
        &self,
        grant: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenSet, CredentialError> {
        let (client_id, client_secret) = self.client_credentials_pair()?;

        let resp = self
            .http
            .post(self.token_endpoint())
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| CredentialError::AuthProvider(format!("eBay {grant} request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::AuthProvider(format!(
                "eBay {grant} rejected ({status}): {}",
                describe_error(&body)
            )));
        }

        let token_resp: EbayTokenResponse = resp.json().await.map_err(|e| {
            CredentialError::AuthProvider(format!("Failed to parse eBay {grant} response: {e}"))
        })?;

        Ok(TokenSet {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            token_type: token_resp.token_type,
            expires_in: token_resp.expires_in,
            refresh_token_expires_in: token_resp.refresh_token_expires_in,
            scope: token_resp.scope,
        })
    }
}

#[async_trait]
impl IdentityProvider for EbayProvider {
    fn id(&self) -> &str {
        "ebay"
    }

    fn authorization_url(&self, scopes: &[String], state: &str) -> Result<Url, CredentialError> {
        let client_id = Config::require(&self.client_id, "EBAY_CLIENT_ID")?;
        let ru_name = Config::require(&self.ru_name, "EBAY_RU_NAME")?;

        let mut url = Url::parse(&format!("{}/oauth2/authorize", self.environment.auth_base()))
            .map_err(|e| CredentialError::Configuration(format!("Invalid auth base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", ru_name)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);

        Ok(url)
    }

    async fn client_credentials(&self, scopes: &[String]) -> Result<TokenSet, CredentialError> {
        let scope = scopes.join(" ");
        self.token_request(
            "client_credentials",
            &[("grant_type", "client_credentials"), ("scope", &scope)],
        )
        .await
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, CredentialError> {
        let ru_name = Config::require(&self.ru_name, "EBAY_RU_NAME")?;
        self.token_request(
            "authorization_code",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", ru_name),
            ],
        )
        .await
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenSet, CredentialError> {
        let scope = scopes.join(" ");
        self.token_request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", &scope),
            ],
        )
        .await
    }
}

/// Pull the OAuth `error`/`error_description` pair out of an error body,
/// falling back to the raw text.
fn describe_error(body: &str) -> String {
    match serde_json::from_str::<EbayErrorResponse>(body) {
        Ok(EbayErrorResponse {
            error,
            error_description: Some(desc),
        }) => format!("{error}: {desc}"),
        Ok(EbayErrorResponse { error, .. }) => error,
        Err(_) if body.is_empty() => "empty response body".into(),
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use std::path::PathBuf;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            environment: EbayEnvironment::Sandbox,
            client_id: Some("App-Id-123".into()),
            client_secret: Some("secret".into()),
            ru_name: Some("Seller-RuName".into()),
            application_scopes: vec![],
            user_scopes: vec![],
            safety_margin: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(5),
            store: StoreBackend::File(PathBuf::from(".")),
            master_key: None,
            state_secret: None,
            verification_token: None,
            notification_endpoint: None,
        }
    }

    #[test]
    fn test_authorization_url() {
        let provider = EbayProvider::new(&test_config()).unwrap();
        let scopes = vec![
            "https://api.ebay.com/oauth/api_scope".to_string(),
            "https://api.ebay.com/oauth/api_scope/sell.inventory".to_string(),
        ];
        let url = provider.authorization_url(&scopes, "abc").unwrap();

        assert_eq!(url.host_str(), Some("auth.sandbox.ebay.com"));
        assert_eq!(url.path(), "/oauth2/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "App-Id-123".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "Seller-RuName".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("state".into(), "abc".into())));
        assert!(pairs.contains(&("scope".into(), scopes.join(" "))));
    }

    #[test]
    fn test_authorization_url_requires_ru_name() {
        let mut config = test_config();
        config.ru_name = None;
        let provider = EbayProvider::new(&config).unwrap();
        let err = provider.authorization_url(&[], "abc").unwrap_err();
        assert!(matches!(err, CredentialError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_secret_fails_before_network() {
        let mut config = test_config();
        config.client_secret = None;
        let provider = EbayProvider::new(&config).unwrap();
        let err = provider.client_credentials(&[]).await.unwrap_err();
        assert!(matches!(err, CredentialError::Configuration(m) if m.contains("EBAY_CLIENT_SECRET")));
    }

    #[test]
    fn test_describe_error() {
        assert_eq!(
            describe_error(r#"{"error":"invalid_grant","error_description":"the provided authorization grant code is invalid"}"#),
            "invalid_grant: the provided authorization grant code is invalid"
        );
        assert_eq!(describe_error(r#"{"error":"invalid_client"}"#), "invalid_client");
        assert_eq!(describe_error("<html>oops</html>"), "<html>oops</html>");
        assert_eq!(describe_error(""), "empty response body");
    }
}
