//! In-process cache tier
//!
//! Bounded TTL map used as the fallback tier behind the external store.
//!
//! Notes:
//!     - Expiry is computed on read (`now - written_at > ttl`), never by a timer.
//!       Expired entries are evicted lazily on read and proactively by `sweep`.
//!     - Capacity is enforced by insertion order, not recency: on overflow the
//!       oldest-inserted key goes first. Re-inserting a key counts as a new
//!       insertion.
//!     - Entries are immutable once written; a key is always replaced wholesale.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cached value plus its TTL bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub written_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, written_at: Instant, ttl: Duration) -> Self {
        Self {
            data,
            written_at,
            ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) > self.ttl
    }
}

/// Stored entry tagged with its insertion sequence number
#[derive(Debug)]
struct Slot {
    entry: CacheEntry<String>,
    seq: u64,
}

/// Thread-safe bounded TTL map (serialized values)
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, Arc<Slot>>,
    /// Insertion order as (key, seq). Stale pairs (key re-inserted or deleted
    /// since) are skipped on eviction.
    order: Mutex<VecDeque<(String, u64)>>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Read a live entry. An expired entry is removed and reported absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let slot = self.entries.get(key).map(|s| Arc::clone(s.value()))?;
        if slot.entry.is_expired_at(now) {
            // Only drop the exact slot we saw; a concurrent writer may have replaced it.
            self.entries
                .remove_if(key, |_, current| current.seq == slot.seq);
            debug!("Memory cache entry expired: {}", key);
            return None;
        }
        Some(slot.entry.data.clone())
    }

    /// Insert or replace `key`. `written_at` is supplied by the caller so the
    /// two-tier cache can mirror the external store's TTL clock.
    pub fn insert(&self, key: &str, data: String, written_at: Instant, ttl: Duration) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            entry: CacheEntry::new(data, written_at, ttl),
            seq,
        });
        self.entries.insert(key.to_string(), slot);

        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.push_back((key.to_string(), seq));

        while self.entries.len() > self.capacity {
            let Some((old_key, old_seq)) = order.pop_front() else {
                break;
            };
            if self
                .entries
                .remove_if(&old_key, |_, current| current.seq == old_seq)
                .is_some()
            {
                debug!("Memory cache full ({}), evicted oldest: {}", self.capacity, old_key);
            }
        }

        // Keep the order queue from growing without bound on hot-key rewrites
        if order.len() > self.capacity * 4 {
            order.retain(|(k, s)| {
                self.entries
                    .get(k)
                    .map(|slot| slot.seq == *s)
                    .unwrap_or(false)
            });
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key starting with `prefix`; returns the number removed
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries; returns the number removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
