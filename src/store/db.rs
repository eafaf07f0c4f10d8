//! PostgreSQL-backed token store.
//!
//! Table `marketplace_tokens` holds one row per grant. Access and refresh
//! tokens are AES-256-GCM encrypted at rest; the remaining columns mirror
//! the JSON record.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::TokenStore;
use crate::credentials::{GrantKind, TokenRecord};
use crate::crypto::TokenCipher;
use crate::error::CredentialError;

pub struct PostgresTokenStore {
    pool: PgPool,
    cipher: TokenCipher,
}

impl PostgresTokenStore {
    pub async fn connect(db_url: &str, cipher: TokenCipher) -> Result<Self, CredentialError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .map_err(|e| {
                CredentialError::Persistence(format!("Failed to connect to PostgreSQL: {e}"))
            })?;

        Ok(Self { pool, cipher })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS marketplace_tokens (
                grant_kind               TEXT PRIMARY KEY,
                access_token             TEXT NOT NULL,
                refresh_token            TEXT,
                expires_in               BIGINT NOT NULL,
                token_type               TEXT NOT NULL,
                generated_at             BIGINT NOT NULL,
                refresh_token_expires_in BIGINT,
                scope                    TEXT NOT NULL DEFAULT '',
                updated_at               TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    fn backend(&self) -> &str {
        "postgres"
    }

    async fn load(&self, grant: GrantKind) -> Result<Option<TokenRecord>, CredentialError> {
        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, expires_in, token_type,
                   generated_at, refresh_token_expires_in, scope
            FROM marketplace_tokens
            WHERE grant_kind = $1
            "#,
        )
        .bind(grant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let enc_access: String = row.try_get(0)?;
        let enc_refresh: Option<String> = row.try_get(1)?;
        let expires_in: i64 = row.try_get(2)?;
        let token_type: String = row.try_get(3)?;
        let generated_at: i64 = row.try_get(4)?;
        let refresh_token_expires_in: Option<i64> = row.try_get(5)?;
        let scope: String = row.try_get(6)?;

        let access_token = self.cipher.decrypt(&enc_access)?;
        let refresh_token = match enc_refresh {
            Some(ref rt) if !rt.is_empty() => Some(self.cipher.decrypt(rt)?),
            _ => None,
        };

        Ok(Some(TokenRecord {
            grant,
            access_token,
            refresh_token,
            expires_in: u64::try_from(expires_in).unwrap_or_default(),
            token_type,
            generated_at,
            refresh_token_expires_in: refresh_token_expires_in.and_then(|v| u64::try_from(v).ok()),
            scope: scope.split_whitespace().map(str::to_string).collect(),
        }))
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), CredentialError> {
        let enc_access = self.cipher.encrypt(&record.access_token)?;
        let enc_refresh = match &record.refresh_token {
            Some(rt) => Some(self.cipher.encrypt(rt)?),
            None => None,
        };
        let scope = record
            .scope
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");

        sqlx::query(
            r#"
            INSERT INTO marketplace_tokens
                (grant_kind, access_token, refresh_token, expires_in, token_type,
                 generated_at, refresh_token_expires_in, scope)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (grant_kind)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_in = EXCLUDED.expires_in,
                token_type = EXCLUDED.token_type,
                generated_at = EXCLUDED.generated_at,
                refresh_token_expires_in = EXCLUDED.refresh_token_expires_in,
                scope = EXCLUDED.scope,
                updated_at = NOW()
            "#,
        )
        .bind(record.grant.as_str())
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(i64::try_from(record.expires_in).unwrap_or(i64::MAX))
        .bind(&record.token_type)
        .bind(record.generated_at)
        .bind(
            record
                .refresh_token_expires_in
                .map(|v| i64::try_from(v).unwrap_or(i64::MAX)),
        )
        .bind(&scope)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, grant: GrantKind) -> Result<(), CredentialError> {
        sqlx::query("DELETE FROM marketplace_tokens WHERE grant_kind = $1")
            .bind(grant.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
