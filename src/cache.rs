//! The shared LRU cache: keyed by the raw request bytes, bounded by both a
//! per-entry size and a total-size budget.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Per-entry cap: responses larger than this are never cached.
pub const MAX_ENTRY_BYTES: usize = 10 * 1024;
/// Aggregate cap across all entries.
pub const MAX_TOTAL_BYTES: usize = 200 * 1024 * 1024;
/// Upper bound on the number of distinct fingerprints tracked by the LRU
/// structure itself; the byte budgets are the binding constraint in
/// practice, this just keeps the backing `LruCache` non-zero-sized.
const MAX_ENTRIES: usize = 100_000;

/// Fixed bookkeeping charged against the total-bytes budget per entry,
/// covering the `touched_at` timestamp and map overhead.
const ENTRY_OVERHEAD: usize = std::mem::size_of::<u64>();

/// An admitted cache entry. `body` is the complete captured response
/// (status line, headers, body) as a single opaque blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub body: Bytes,
    pub touched_at: u64,
}

fn entry_cost(key_len: usize, body_len: usize) -> usize {
    key_len + body_len + ENTRY_OVERHEAD
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Outcome of `ProxyCache::add`.
#[derive(Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Rejected(RejectReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// `entry_cost(key, body) >= max_entry_bytes`.
    TooLarge,
}

/// Thread-safe, process-wide cache of responses keyed by request fingerprint.
///
/// Cheap to clone: the backing map and size counter are `Arc`-shared, so
/// every accepted connection can hold its own handle.
#[derive(Clone)]
pub struct ProxyCache {
    entries: Arc<Mutex<LruCache<Bytes, CacheEntry>>>,
    total_bytes_used: Arc<AtomicUsize>,
    max_entry_bytes: usize,
    max_total_bytes: usize,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::with_limits(MAX_ENTRY_BYTES, MAX_TOTAL_BYTES)
    }

    /// Builds a cache with custom size budgets. Exposed beyond `#[cfg(test)]`
    /// only so callers embedding this crate can tune budgets; production
    /// code in this crate always goes through `new()`.
    pub fn with_limits(max_entry_bytes: usize, max_total_bytes: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_ENTRIES).expect("MAX_ENTRIES must be non-zero"),
            ))),
            total_bytes_used: Arc::new(AtomicUsize::new(0)),
            max_entry_bytes,
            max_total_bytes,
        }
    }

    /// Looks up `key`, refreshing its LRU position on a hit. Never fails.
    pub async fn find(&self, key: &Bytes) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.touched_at = now_secs();
            return Some(entry.clone());
        }
        None
    }

    /// Attempts to admit `body` under `key`, evicting least-recently-touched
    /// entries as needed to stay within the total-bytes budget. A duplicate
    /// key replaces the existing entry and touches its LRU position.
    pub async fn add(&self, key: Bytes, body: Bytes) -> AddOutcome {
        let cost = entry_cost(key.len(), body.len());
        if cost >= self.max_entry_bytes {
            return AddOutcome::Rejected(RejectReason::TooLarge);
        }

        let mut entries = self.entries.lock().await;

        // Remove the existing entry (if any) outright, not just peek-and-
        // subtract: leaving it in place would let the eviction loop below
        // select it again via `pop_lru()` when it's the least-recently-
        // touched entry, double-subtracting its cost from `total_bytes_used`.
        if let Some(old) = entries.pop(&key) {
            let old_cost = entry_cost(key.len(), old.body.len());
            self.total_bytes_used.fetch_sub(old_cost, Ordering::Relaxed);
        }

        while self.total_bytes_used.load(Ordering::Relaxed) + cost > self.max_total_bytes
            && !entries.is_empty()
        {
            Self::evict_one(&mut entries, &self.total_bytes_used);
        }

        entries.put(
            key,
            CacheEntry {
                body,
                touched_at: now_secs(),
            },
        );
        self.total_bytes_used.fetch_add(cost, Ordering::Relaxed);
        AddOutcome::Inserted
    }

    /// Removes the least-recently-touched entry. Caller guarantees the cache
    /// is non-empty; a no-op otherwise.
    fn evict_one(entries: &mut LruCache<Bytes, CacheEntry>, total_bytes_used: &AtomicUsize) {
        if let Some((key, evicted)) = entries.pop_lru() {
            let cost = entry_cost(key.len(), evicted.body.len());
            total_bytes_used.fetch_sub(cost, Ordering::Relaxed);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub fn total_bytes_used(&self) -> usize {
        self.total_bytes_used.load(Ordering::Relaxed)
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.total_bytes_used.store(0, Ordering::Relaxed);
    }
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new()
    }
}
