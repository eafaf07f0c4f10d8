//! JSON-file token store: one file per grant in a directory.
//!
//! Writes go to a sibling temp file which is then renamed over the record,
//! so readers see either the old or the new record, never a partial one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::TokenStore;
use crate::credentials::{GrantKind, TokenRecord};
use crate::error::CredentialError;

pub struct FileTokenStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            CredentialError::Persistence(format!("Cannot create token dir {}: {e}", dir.display()))
        })?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path_for(&self, grant: GrantKind) -> PathBuf {
        self.dir.join(file_name(grant))
    }
}

fn file_name(grant: GrantKind) -> &'static str {
    match grant {
        GrantKind::Application => "ebay_application_token.json",
        GrantKind::User => "ebay_user_token.json",
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write `body` to `path` and flush it to disk before returning, so a
/// following rename never publishes an empty file after a crash.
async fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await
}

#[async_trait]
impl TokenStore for FileTokenStore {
    fn backend(&self) -> &str {
        "file"
    }

    async fn load(&self, grant: GrantKind) -> Result<Option<TokenRecord>, CredentialError> {
        let path = self.path_for(grant);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CredentialError::Persistence(format!(
                    "Cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        let record: TokenRecord = serde_json::from_slice(&raw)?;
        if record.grant != grant {
            return Err(CredentialError::Persistence(format!(
                "{} holds a {} record, expected {grant}",
                path.display(),
                record.grant
            )));
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), CredentialError> {
        let path = self.path_for(record.grant);
        let tmp = temp_path(&path);
        let body = serde_json::to_vec_pretty(record)?;

        let _guard = self.write_lock.lock().await;
        write_synced(&tmp, &body).await.map_err(|e| {
            CredentialError::Persistence(format!("Cannot write {}: {e}", tmp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CredentialError::Persistence(format!(
                "Cannot replace {}: {e}",
                path.display()
            )));
        }

        debug!("Saved {} token record to {}", record.grant, path.display());
        Ok(())
    }

    async fn delete(&self, grant: GrantKind) -> Result<(), CredentialError> {
        let path = self.path_for(grant);
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn user_record() -> TokenRecord {
        TokenRecord {
            grant: GrantKind::User,
            access_token: "v^1.1#i^1#U1".into(),
            refresh_token: Some("v^1.1#i^1#R1".into()),
            expires_in: 7200,
            token_type: "User Access Token".into(),
            generated_at: 1_712_000_000_123,
            refresh_token_expires_in: Some(47_304_000),
            scope: BTreeSet::from(["https://api.ebay.com/oauth/api_scope/sell.inventory".to_string()]),
        }
    }

    #[tokio::test]
    async fn test_reload_after_restart_yields_identical_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = user_record();

        {
            let store = FileTokenStore::open(dir.path()).await.unwrap();
            store.save(&record).await.unwrap();
        }

        let reopened = FileTokenStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load(GrantKind::User).await.unwrap();
        assert_eq!(loaded, Some(record));
        assert_eq!(reopened.load(GrantKind::Application).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path()).await.unwrap();

        let mut record = user_record();
        store.save(&record).await.unwrap();
        record.access_token = "U2".into();
        store.save(&record).await.unwrap();

        let loaded = store.load(GrantKind::User).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "U2");
        assert!(!temp_path(&store.path_for(GrantKind::User)).exists());
    }

    #[tokio::test]
    async fn test_synced_write_lands_full_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json.tmp");
        std::fs::write(&path, "a much longer previous body").unwrap();

        write_synced(&path, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_reads_plain_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path()).await.unwrap();
        std::fs::write(
            store.path_for(GrantKind::Application),
            r#"{"grant":"application","access_token":"A1","expires_in":7200,"token_type":"Application Access Token","generated_at":1712000000000}"#,
        )
        .unwrap();

        let loaded = store.load(GrantKind::Application).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "A1");
        assert_eq!(loaded.refresh_token, None);
        assert!(loaded.scope.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path()).await.unwrap();
        std::fs::write(store.path_for(GrantKind::User), "{ not json").unwrap();

        let err = store.load(GrantKind::User).await.unwrap_err();
        assert!(matches!(err, CredentialError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path()).await.unwrap();
        store.save(&user_record()).await.unwrap();

        store.delete(GrantKind::User).await.unwrap();
        store.delete(GrantKind::User).await.unwrap();
        assert_eq!(store.load(GrantKind::User).await.unwrap(), None);
    }
}
