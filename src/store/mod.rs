//! Token persistence.
//!
//! The store is a singleton keyed by grant: at most one record per
//! [`GrantKind`]. Every `save` replaces the whole record for its grant.

pub mod db;
pub mod file;
pub mod memory;

pub use db::PostgresTokenStore;
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::credentials::{GrantKind, TokenRecord};
use crate::crypto::TokenCipher;
use crate::error::CredentialError;

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &str;

    async fn load(&self, grant: GrantKind) -> Result<Option<TokenRecord>, CredentialError>;

    /// Atomically replace the record for `record.grant`.
    async fn save(&self, record: &TokenRecord) -> Result<(), CredentialError>;

    /// Remove the record for `grant`. Removing a missing record is not an error.
    async fn delete(&self, grant: GrantKind) -> Result<(), CredentialError>;

    /// Release backend resources. The store must not be used afterwards.
    async fn close(&self) {}
}

/// Open the backend selected in configuration.
pub async fn open(config: &Config) -> Result<Arc<dyn TokenStore>, CredentialError> {
    match &config.store {
        StoreBackend::File(dir) => {
            let store = FileTokenStore::open(dir.clone()).await?;
            info!("Token store: JSON files in {}", dir.display());
            Ok(Arc::new(store))
        }
        StoreBackend::Postgres { database_url } => {
            let master_key = Config::require(&config.master_key, "MASTER_KEY")?;
            let cipher = TokenCipher::new(master_key)?;
            let store = PostgresTokenStore::connect(database_url, cipher).await?;
            store.migrate().await?;
            info!("Token store: PostgreSQL (connected and migrated)");
            Ok(Arc::new(store))
        }
    }
}
