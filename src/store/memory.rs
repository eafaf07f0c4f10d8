//! In-process token store. Nothing survives a restart; used for tests and
//! throwaway sandbox runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::TokenStore;
use crate::credentials::{GrantKind, TokenRecord};
use crate::error::CredentialError;

#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<GrantKind, TokenRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save`/`delete` fail with a persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), CredentialError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::Persistence("store is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn load(&self, grant: GrantKind) -> Result<Option<TokenRecord>, CredentialError> {
        Ok(self.records.read().await.get(&grant).cloned())
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), CredentialError> {
        self.check_writable()?;
        self.records
            .write()
            .await
            .insert(record.grant, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, grant: GrantKind) -> Result<(), CredentialError> {
        self.check_writable()?;
        self.records.write().await.remove(&grant);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
