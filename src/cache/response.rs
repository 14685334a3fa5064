//! Fingerprint-keyed response cache.
//!
//! [`ResponseCache`] keeps successful [`CompletionResult`]s in a bounded
//! in-memory LRU (moka) with a per-entry TTL, optionally backed by a
//! durable [`CacheStore`].
//!
//! # Expiry
//!
//! Expiry is checked on every lookup against the entry's own `created_at`
//! and `ttl`; moka's expiration and eviction are housekeeping on top. An
//! entry past its TTL is reported absent, never returned stale. A zero TTL
//! is never stored.
//!
//! # Persistent tier
//!
//! With a store attached, writes go to both tiers and memory misses fall
//! through to the store. Store failures are logged, counted under
//! [`CACHE_STORE_ERRORS_TOTAL`](crate::telemetry::CACHE_STORE_ERRORS_TOTAL)
//! and treated as a miss; they never fail the request. Expired or corrupt
//! rows are deleted on sight, and store hits are promoted to memory for
//! their remaining TTL.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use moka::Expiry;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tracing::{debug, warn};

use super::store::{CacheStore, StoreError, StoredEntry};
use crate::fingerprint::Fingerprint;
use crate::telemetry;
use crate::types::CompletionResult;

/// Configuration for the response cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of in-memory entries. Default: 10,000.
    pub max_entries: u64,
    /// Default time-to-live. Default: 1 hour.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// One cached result. Immutable once inserted; replaced, never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: CompletionResult,
    pub created_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, result: CompletionResult, ttl: Duration) -> Self {
        Self {
            fingerprint,
            result,
            created_at: SystemTime::now(),
            ttl,
        }
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining_ttl(&self) -> Duration {
        // A clock that went backwards counts as zero age.
        let age = self.created_at.elapsed().unwrap_or_default();
        self.ttl.saturating_sub(age)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ttl().is_zero()
    }
}

struct EntryExpiry;

impl Expiry<Fingerprint, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &Arc<CacheEntry>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.remaining_ttl())
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &Arc<CacheEntry>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_ttl())
    }
}

/// In-memory LRU + TTL cache of completion results, with an optional
/// persistent tier.
pub struct ResponseCache {
    entries: Cache<Fingerprint, Arc<CacheEntry>>,
    config: CacheConfig,
    store: Option<Arc<dyn CacheStore>>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self {
            entries,
            config,
            store: None,
        }
    }

    /// Attach a persistent tier.
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The cached result for `fingerprint`, if present and unexpired.
    ///
    /// Callers receive their own copy.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CompletionResult> {
        let found = self.peek(fingerprint).await;
        if found.is_some() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }
        found
    }

    /// [`lookup`](Self::lookup) without hit/miss accounting.
    pub(crate) async fn peek(&self, fingerprint: &Fingerprint) -> Option<CompletionResult> {
        match self.entries.get(fingerprint).await {
            Some(entry) if !entry.is_expired() => Some(entry.result.clone()),
            Some(_) => {
                self.entries.invalidate(fingerprint).await;
                None
            }
            None => self.lookup_store(fingerprint).await,
        }
    }

    /// Cache `result` under `fingerprint` with the configured default TTL.
    pub async fn insert(&self, fingerprint: Fingerprint, result: CompletionResult) {
        self.store(fingerprint, result, self.config.ttl).await;
    }

    /// Cache `result` under `fingerprint` for `ttl`, replacing any previous
    /// entry. A zero `ttl` stores nothing.
    pub async fn store(&self, fingerprint: Fingerprint, result: CompletionResult, ttl: Duration) {
        if ttl.is_zero() {
            debug!(%fingerprint, "zero ttl, not caching");
            return;
        }
        let entry = Arc::new(CacheEntry::new(fingerprint.clone(), result, ttl));

        if let Some(store) = &self.store {
            match StoredEntry::from_entry(&entry) {
                Ok(row) => {
                    if let Err(e) = store.put(fingerprint.as_str(), row).await {
                        record_store_error("put", &fingerprint, &e);
                    }
                }
                Err(e) => record_store_error("put", &fingerprint, &e),
            }
        }

        self.entries.insert(fingerprint, entry).await;
        // Apply LRU eviction now rather than on a later access.
        self.entries.run_pending_tasks().await;
    }

    /// Drop `fingerprint` from both tiers.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.invalidate(fingerprint).await;
        if let Some(store) = &self.store
            && let Err(e) = store.delete(fingerprint.as_str()).await
        {
            record_store_error("delete", fingerprint, &e);
        }
    }

    /// Number of live in-memory entries.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every in-memory entry. The persistent tier is left untouched.
    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    async fn lookup_store(&self, fingerprint: &Fingerprint) -> Option<CompletionResult> {
        let store = self.store.as_ref()?;
        let row = match store.get(fingerprint.as_str()).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                record_store_error("get", fingerprint, &e);
                return None;
            }
        };

        if row.fingerprint != fingerprint.as_str() || row.is_expired_at(SystemTime::now()) {
            self.delete_row(store.as_ref(), fingerprint).await;
            return None;
        }

        let entry = match row.into_entry() {
            Ok(entry) => entry,
            Err(e) => {
                record_store_error("get", fingerprint, &e);
                self.delete_row(store.as_ref(), fingerprint).await;
                return None;
            }
        };

        let result = entry.result.clone();
        self.entries
            .insert(fingerprint.clone(), Arc::new(entry))
            .await;
        Some(result)
    }

    async fn delete_row(&self, store: &dyn CacheStore, fingerprint: &Fingerprint) {
        if let Err(e) = store.delete(fingerprint.as_str()).await {
            record_store_error("delete", fingerprint, &e);
        }
    }
}

fn record_store_error(operation: &'static str, fingerprint: &Fingerprint, err: &StoreError) {
    metrics::counter!(telemetry::CACHE_STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
    warn!(%fingerprint, operation, error = %err, "cache store failed, continuing without it");
}
