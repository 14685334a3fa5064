//! Persistent cache tier.
//!
//! The response cache only needs get/put/delete-by-key from a durable store.
//! Rows are `{fingerprint, payload (serialized result), created_at, ttl}`;
//! schema and migrations belong to the store implementation.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: a process-local map, useful for tests and embedding
//! - [`DirStore`]: one JSON file per fingerprint under a directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::response::CacheEntry;
use crate::fingerprint::Fingerprint;
use crate::types::CompletionResult;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt cache row: {0}")]
    Corrupt(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted cache row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub fingerprint: String,
    /// JSON-serialized [`CompletionResult`].
    pub payload: String,
    pub created_at_unix_ms: u64,
    pub ttl_ms: u64,
}

impl StoredEntry {
    pub fn from_entry(entry: &CacheEntry) -> Result<Self, StoreError> {
        let payload =
            serde_json::to_string(&entry.result).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let created_at_unix_ms = entry
            .created_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Ok(Self {
            fingerprint: entry.fingerprint.to_string(),
            payload,
            created_at_unix_ms,
            ttl_ms: entry.ttl.as_millis() as u64,
        })
    }

    pub fn into_entry(self) -> Result<CacheEntry, StoreError> {
        let result: CompletionResult =
            serde_json::from_str(&self.payload).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(CacheEntry {
            fingerprint: Fingerprint::from_hex(self.fingerprint),
            result,
            created_at: UNIX_EPOCH + Duration::from_millis(self.created_at_unix_ms),
            ttl: Duration::from_millis(self.ttl_ms),
        })
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        now_ms >= self.created_at_unix_ms.saturating_add(self.ttl_ms)
    }
}

/// Durable key-value backend for cache rows.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    async fn put(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.rows.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError> {
        self.rows.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.rows.lock().await.remove(key);
        Ok(())
    }
}

/// Directory-backed [`CacheStore`]: `<dir>/<fingerprint>.json`.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Keys are hex digests; anything else could escape the directory.
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::Unavailable(format!("invalid key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl CacheStore for DirStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    async fn put(&self, key: &str, entry: StoredEntry) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec(&entry).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        // Write-then-rename so readers never see a partial row.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
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
    use crate::types::{FinishReason, ProviderKind};

    fn entry() -> CacheEntry {
        CacheEntry {
            fingerprint: Fingerprint::from_hex("abc123"),
            result: CompletionResult {
                text: "a cat".into(),
                finish_reason: FinishReason::Completed,
                provider: ProviderKind::Gemini,
                model: "gemini-1.5-flash-latest".into(),
                latency_ms: 12,
                metadata: serde_json::json!({"usage": {"totalTokenCount": 9}}),
            },
            created_at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_000),
            ttl: Duration::from_secs(60),
        }
    }

    #[test]
    fn stored_entry_preserves_result() {
        let stored = StoredEntry::from_entry(&entry()).unwrap();
        assert_eq!(stored.fingerprint, "abc123");
        assert_eq!(stored.created_at_unix_ms, 1_700_000_000_000);
        assert_eq!(stored.ttl_ms, 60_000);

        let back = stored.into_entry().unwrap();
        assert_eq!(back.result, entry().result);
        assert_eq!(back.created_at, entry().created_at);
    }

    #[test]
    fn stored_entry_expiry() {
        let stored = StoredEntry::from_entry(&entry()).unwrap();
        let created = UNIX_EPOCH + Duration::from_millis(stored.created_at_unix_ms);
        assert!(!stored.is_expired_at(created + Duration::from_secs(59)));
        assert!(stored.is_expired_at(created + Duration::from_secs(60)));
    }

    #[test]
    fn corrupt_payload_is_reported() {
        let mut stored = StoredEntry::from_entry(&entry()).unwrap();
        stored.payload = "{not json".into();
        assert!(matches!(stored.into_entry(), Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn dir_store_put_get_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path().join("cache")).unwrap();
        let stored = StoredEntry::from_entry(&entry()).unwrap();

        assert!(store.get("abc123").await.unwrap().is_none());
        store.put("abc123", stored.clone()).await.unwrap();
        assert_eq!(store.get("abc123").await.unwrap(), Some(stored));

        store.delete("abc123").await.unwrap();
        assert!(store.get("abc123").await.unwrap().is_none());
        // Deleting a missing row is not an error.
        store.delete("abc123").await.unwrap();
    }

    #[tokio::test]
    async fn dir_store_rejects_path_like_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path()).unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn dir_store_reports_corrupt_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path()).unwrap();
        tokio::fs::write(tmp.path().join("deadbeef.json"), b"garbage")
            .await
            .unwrap();
        assert!(matches!(
            store.get("deadbeef").await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
