//! Response cache: eviction, expiry and the persistent tier.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use common::{MockTransport, builder, deepseek_ok, gemini_ok};
use huginn::cache::{
    CacheConfig, CacheStore, DirStore, MemoryStore, ResponseCache, StoreError, StoredEntry,
};
use huginn::fingerprint::Route;
use huginn::{CompletionRequest, CompletionResult, Fingerprint, FinishReason, ProviderKind};

fn result(text: &str) -> CompletionResult {
    CompletionResult {
        text: text.to_string(),
        finish_reason: FinishReason::Completed,
        provider: ProviderKind::Gemini,
        model: "gemini-1.5-flash-latest".to_string(),
        latency_ms: 10,
        metadata: serde_json::json!({"usage": {"totalTokenCount": 3}}),
    }
}

fn fp(n: u32) -> Fingerprint {
    Fingerprint::compute(
        Route::Default(ProviderKind::Gemini),
        "gemini-1.5-flash-latest",
        &CompletionRequest::new(format!("prompt {n}")),
    )
}

// ============================================================================
// Eviction and expiry
// ============================================================================

#[tokio::test]
async fn least_recently_used_entry_is_evicted() {
    let cache = ResponseCache::new(CacheConfig::new().max_entries(2));

    cache.insert(fp(1), result("one")).await;
    cache.insert(fp(2), result("two")).await;
    // Touch 1 so that 2 is the least recently used.
    assert!(cache.lookup(&fp(1)).await.is_some());
    cache.insert(fp(3), result("three")).await;

    assert_eq!(cache.len().await, 2);
    assert!(cache.lookup(&fp(2)).await.is_none());
    assert_eq!(cache.lookup(&fp(1)).await.unwrap().text, "one");
    assert_eq!(cache.lookup(&fp(3)).await.unwrap().text, "three");
}

#[tokio::test]
async fn zero_ttl_is_never_found() {
    let cache = ResponseCache::new(CacheConfig::default());
    cache.store(fp(1), result("gone"), Duration::ZERO).await;
    assert!(cache.lookup(&fp(1)).await.is_none());
}

#[tokio::test]
async fn entry_expires_after_ttl() {
    let cache = ResponseCache::new(CacheConfig::default());
    cache.store(fp(1), result("brief"), Duration::from_millis(50)).await;
    assert!(cache.lookup(&fp(1)).await.is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(cache.lookup(&fp(1)).await.is_none());
}

#[tokio::test]
async fn gateway_with_zero_ttl_calls_every_time() {
    let gemini = MockTransport::always(gemini_ok("fresh"));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .cache(CacheConfig::new().ttl(Duration::ZERO))
        .build()
        .unwrap();

    let request = CompletionRequest::new("describe image");
    gateway.submit(request.clone()).await.unwrap();
    gateway.submit(request).await.unwrap();
    assert_eq!(gemini.calls(), 2);
}

// ============================================================================
// Persistent tier
// ============================================================================

#[tokio::test]
async fn store_hit_is_promoted_to_memory() {
    let store = Arc::new(MemoryStore::new());
    let first = ResponseCache::new(CacheConfig::default()).with_store(store.clone());
    first.insert(fp(1), result("persisted")).await;
    assert_eq!(store.len().await, 1);

    // A fresh cache (new process) finds the row through the store.
    let second = ResponseCache::new(CacheConfig::default()).with_store(store.clone());
    assert_eq!(second.lookup(&fp(1)).await.unwrap().text, "persisted");
    assert_eq!(second.len().await, 1);
}

#[tokio::test]
async fn expired_store_rows_are_deleted() {
    let store = Arc::new(MemoryStore::new());
    let mut row = StoredEntry {
        fingerprint: fp(1).to_string(),
        payload: serde_json::to_string(&result("stale")).unwrap(),
        created_at_unix_ms: 1_000,
        ttl_ms: 1_000,
    };
    store.put(fp(1).as_str(), row.clone()).await.unwrap();

    let cache = ResponseCache::new(CacheConfig::default()).with_store(store.clone());
    assert!(cache.lookup(&fp(1)).await.is_none());
    assert!(store.is_empty().await);

    // Corrupt rows go the same way.
    row.payload = "{broken".to_string();
    store.put(fp(1).as_str(), row).await.unwrap();
    assert!(cache.lookup(&fp(1)).await.is_none());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn store_row_expiry_is_checked_before_decoding() {
    let store = Arc::new(MemoryStore::new());
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;
    let fresh = StoredEntry {
        fingerprint: fp(1).to_string(),
        payload: serde_json::to_string(&result("fresh")).unwrap(),
        created_at_unix_ms: now_ms,
        ttl_ms: 60_000,
    };
    // Undecodable payload, but already expired: dropped as expired.
    let stale = StoredEntry {
        fingerprint: fp(2).to_string(),
        payload: "{broken".to_string(),
        created_at_unix_ms: now_ms.saturating_sub(120_000),
        ttl_ms: 60_000,
    };
    // Row filed under the wrong key.
    let misfiled = StoredEntry {
        fingerprint: fp(4).to_string(),
        ..fresh.clone()
    };
    store.put(fp(1).as_str(), fresh).await.unwrap();
    store.put(fp(2).as_str(), stale).await.unwrap();
    store.put(fp(3).as_str(), misfiled).await.unwrap();

    let cache = ResponseCache::new(CacheConfig::default()).with_store(store.clone());
    assert_eq!(cache.lookup(&fp(1)).await.unwrap().text, "fresh");
    assert!(cache.lookup(&fp(2)).await.is_none());
    assert!(cache.lookup(&fp(3)).await.is_none());
    assert_eq!(store.len().await, 1);
}

struct BrokenStore {
    calls: AtomicU32,
}

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("database is locked".into()))
    }

    async fn put(&self, _key: &str, _entry: StoredEntry) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("database is locked".into()))
    }
}

#[tokio::test]
async fn store_failures_fail_open() {
    let store = Arc::new(BrokenStore {
        calls: AtomicU32::new(0),
    });
    let gemini = MockTransport::always(gemini_ok("still works"));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .cache_store(store.clone())
        .build()
        .unwrap();

    let request = CompletionRequest::new("describe image");
    assert_eq!(gateway.submit(request.clone()).await.unwrap().text, "still works");
    // The memory tier still serves the repeat.
    assert_eq!(gateway.submit(request).await.unwrap().text, "still works");
    assert_eq!(gemini.calls(), 1);
    assert!(store.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn dir_store_survives_gateway_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let request = CompletionRequest::new("describe image");

    let gemini = MockTransport::always(gemini_ok("from disk"));
    let gateway = builder(gemini.clone(), MockTransport::always(deepseek_ok("unused")))
        .cache_store(Arc::new(DirStore::open(tmp.path()).unwrap()))
        .build()
        .unwrap();
    let first = gateway.submit(request.clone()).await.unwrap();
    gateway.shutdown().await;

    let restarted_transport = MockTransport::always(gemini_ok("should not be called"));
    let restarted = builder(
        restarted_transport.clone(),
        MockTransport::always(deepseek_ok("unused")),
    )
    .cache_store(Arc::new(DirStore::open(tmp.path()).unwrap()))
    .build()
    .unwrap();

    let second = restarted.submit(request).await.unwrap();
    assert_eq!(second.text, first.text);
    assert_eq!(restarted_transport.calls(), 0);
}
