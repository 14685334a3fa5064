//! Caching and request deduplication.
//!
//! - [`ResponseCache`]: fingerprint-keyed LRU + TTL store of successful
//!   results, with an optional durable [`CacheStore`] tier
//! - [`InFlightRegistry`]: guarantees at most one live provider call per
//!   fingerprint and fans its outcome out to concurrent joiners

pub mod inflight;
pub mod response;
pub mod store;

pub use inflight::{Claim, InFlightGuard, InFlightRegistry, JoinHandle, JoinOutcome, Outcome};
pub use response::{CacheConfig, CacheEntry, ResponseCache};
pub use store::{CacheStore, DirStore, MemoryStore, StoreError, StoredEntry};
