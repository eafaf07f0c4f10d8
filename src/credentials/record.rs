//! The persisted token record and the grant it belongs to.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::TokenSet;

/// The OAuth grant a record was obtained through. Each grant has its own
/// record and its own renewal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Client-credentials token, no end-user context. Renewed by reminting.
    Application,
    /// Authorization-code token for the seller account. Renewed with the
    /// refresh token.
    User,
}

impl GrantKind {
    pub const ALL: [GrantKind; 2] = [GrantKind::Application, GrantKind::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::Application => "application",
            GrantKind::User => "user",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored access token.
///
/// Field names on the wire follow the provider's token response so the
/// record file stays readable by anything that consumed the raw response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub grant: GrantKind,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub token_type: String,
    /// Issue instant, epoch milliseconds.
    pub generated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default, with = "scope_string", skip_serializing_if = "BTreeSet::is_empty")]
    pub scope: BTreeSet<String>,
}

impl TokenRecord {
    /// Build a record from a fresh provider response.
    ///
    /// `requested_scopes` fills in the scope set when the provider does not
    /// echo it back.
    pub fn from_token_set(
        grant: GrantKind,
        tokens: TokenSet,
        issued_at: DateTime<Utc>,
        requested_scopes: &[String],
    ) -> Self {
        let scope = match tokens.scope.as_deref() {
            Some(s) if !s.trim().is_empty() => parse_scope(s),
            _ => requested_scopes.iter().cloned().collect(),
        };

        Self {
            grant,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            token_type: tokens.token_type,
            generated_at: issued_at.timestamp_millis(),
            refresh_token_expires_in: tokens.refresh_token_expires_in,
            scope,
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.generated_at)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = i64::try_from(self.expires_in).unwrap_or(i64::MAX);
        self.issued_at()
            .checked_add_signed(chrono::Duration::seconds(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the token can still be handed out at `now`, keeping
    /// `safety_margin` in reserve before the real expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        let Ok(margin) = chrono::Duration::from_std(safety_margin) else {
            return false;
        };
        match self.expires_at().checked_sub_signed(margin) {
            Some(deadline) => now < deadline,
            None => false,
        }
    }

    pub fn status(&self, now: DateTime<Utc>, safety_margin: Duration) -> TokenStatus {
        TokenStatus {
            grant: self.grant,
            token_type: self.token_type.clone(),
            issued_at: self.issued_at(),
            expires_at: self.expires_at(),
            valid: self.is_usable_at(now, safety_margin),
            has_refresh_token: self.refresh_token.is_some(),
            scope: self.scope.iter().cloned().collect(),
        }
    }
}

/// Non-secret view of a record for admin endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub grant: GrantKind,
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub valid: bool,
    pub has_refresh_token: bool,
    pub scope: Vec<String>,
}

fn parse_scope(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// OAuth scopes travel as one space-delimited string.
mod scope_string {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scope: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
        let joined = scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        s.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().map(super::parse_scope).unwrap_or_default())
    }
}
