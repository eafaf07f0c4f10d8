use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::error::CredentialError;

/// Which eBay deployment the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbayEnvironment {
    Production,
    Sandbox,
}

impl EbayEnvironment {
    /// Base URL of the REST API, which also hosts the token endpoint.
    pub fn api_base(&self) -> &'static str {
        match self {
            EbayEnvironment::Production => "https://api.ebay.com",
            EbayEnvironment::Sandbox => "https://api.sandbox.ebay.com",
        }
    }

    /// Base URL of the consent pages.
    pub fn auth_base(&self) -> &'static str {
        match self {
            EbayEnvironment::Production => "https://auth.ebay.com",
            EbayEnvironment::Sandbox => "https://auth.sandbox.ebay.com",
        }
    }
}

impl std::str::FromStr for EbayEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(EbayEnvironment::Production),
            "sandbox" => Ok(EbayEnvironment::Sandbox),
            other => bail!("Unknown EBAY_ENVIRONMENT '{other}' (expected production or sandbox)"),
        }
    }
}

/// Where token records are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// One JSON file per grant inside a directory.
    File(PathBuf),
    /// PostgreSQL, tokens encrypted at rest.
    Postgres { database_url: String },
}

/// Application configuration, loaded from environment variables.
///
/// eBay credentials stay optional here so the process can boot and serve
/// `/status` without them; the credential manager reports a
/// [`CredentialError::Configuration`] on first use instead.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── eBay application ────────────────────────────────────────────────
    pub environment: EbayEnvironment,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// eBay "RuName", the registered redirect URI alias.
    pub ru_name: Option<String>,
    pub application_scopes: Vec<String>,
    pub user_scopes: Vec<String>,

    // ── Token lifecycle ─────────────────────────────────────────────────
    pub safety_margin: Duration,
    pub provider_timeout: Duration,

    // ── Storage + crypto ────────────────────────────────────────────────
    pub store: StoreBackend,
    /// 32-byte base64-encoded key for AES-256-GCM (database backend only).
    pub master_key: Option<String>,
    /// base64-encoded HMAC key for signing the OAuth `state` parameter.
    pub state_secret: Option<String>,

    // ── Marketplace account deletion notifications ──────────────────────
    pub verification_token: Option<String>,
    pub notification_endpoint: Option<String>,
}

const DEFAULT_APPLICATION_SCOPES: &str = "https://api.ebay.com/oauth/api_scope";

const DEFAULT_USER_SCOPES: &str = "https://api.ebay.com/oauth/api_scope \
     https://api.ebay.com/oauth/api_scope/sell.inventory \
     https://api.ebay.com/oauth/api_scope/sell.account \
     https://api.ebay.com/oauth/api_scope/sell.fulfillment";

impl Config {
    pub fn from_env() -> Result<Self> {
        let store = match env_or("TOKEN_STORE", "file").as_str() {
            "file" => StoreBackend::File(PathBuf::from(env_or("TOKEN_DIR", "."))),
            "postgres" => StoreBackend::Postgres {
                database_url: std::env::var("DATABASE_URL")
                    .context("DATABASE_URL is required when TOKEN_STORE=postgres")?,
            },
            other => bail!("Unknown TOKEN_STORE '{other}' (expected file or postgres)"),
        };

        Ok(Config {
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "5000").parse().context("Invalid PORT")?,

            environment: env_or("EBAY_ENVIRONMENT", "production").parse()?,
            client_id: non_empty("EBAY_CLIENT_ID"),
            client_secret: non_empty("EBAY_CLIENT_SECRET"),
            ru_name: non_empty("EBAY_RU_NAME"),
            application_scopes: split_scopes(&env_or(
                "EBAY_APP_SCOPES",
                DEFAULT_APPLICATION_SCOPES,
            )),
            user_scopes: split_scopes(&env_or("EBAY_USER_SCOPES", DEFAULT_USER_SCOPES)),

            safety_margin: Duration::from_secs(
                env_or("TOKEN_SAFETY_MARGIN_SECS", "60")
                    .parse()
                    .context("Invalid TOKEN_SAFETY_MARGIN_SECS")?,
            ),
            provider_timeout: Duration::from_secs(
                env_or("PROVIDER_TIMEOUT_SECS", "15")
                    .parse()
                    .context("Invalid PROVIDER_TIMEOUT_SECS")?,
            ),

            store,
            master_key: non_empty("MASTER_KEY"),
            state_secret: non_empty("STATE_SECRET"),

            verification_token: non_empty("EBAY_VERIFICATION_TOKEN"),
            notification_endpoint: non_empty("EBAY_NOTIFICATION_ENDPOINT"),
        })
    }

    /// Fetch an optional setting or fail with a configuration error naming
    /// the environment variable.
    pub fn require<'a>(
        value: &'a Option<String>,
        var: &str,
    ) -> Result<&'a str, CredentialError> {
        value
            .as_deref()
            .ok_or_else(|| CredentialError::Configuration(format!("{var} is not set")))
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.into())
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Scopes may be separated by whitespace or commas.
pub fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
