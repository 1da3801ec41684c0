//! In-memory TTL cache for read-through API responses.
//!
//! - [`Cache`] is the handle callers hold. It is either a real
//!   [`MemoryCache`] or `Disabled`, so turning caching off is a construction
//!   choice, not a branch at every call site.
//! - Entries carry their own expiry; a read past `expires_at` is a miss even
//!   if the entry has not been swept yet.
//! - Entries are replaced wholesale on write, never mutated in place.
//! - Storage is a sharded [`DashMap`]: writers to different keys do not
//!   contend on a global lock, and a single key's read-check-remove is atomic.
//! - Optional entry bound: when full, expired entries are pruned first, then
//!   the entry closest to expiry is evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Resolved cache selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    Disabled,
    Enabled(CacheSettings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// TTL applied when a write does not specify one.
    pub ttl: Duration,
    /// Maximum number of live entries.
    pub max_entries: usize,
}

impl CacheSettings {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Self::DEFAULT_TTL,
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// A cached value and the instant after which it must not be served.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Expiry used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 86_400);

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE);
        Self { value, expires_at }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Concurrent TTL cache keyed by string.
#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: settings.ttl,
            max_entries: settings.max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live entry. Expired entries count as misses and are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        // The shard guard is released when the closure returns.
        let lookup = self.entries.get(key).map(|entry| {
            if entry.is_expired_at(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match lookup {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, "cache hit");
                Some(value)
            }
            Some(None) => {
                // Re-check under the shard lock: a concurrent writer may have
                // replaced the entry since we looked.
                self.entries.remove_if(key, |_, entry| entry.is_expired());
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, "cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key, "cache miss");
                None
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries.insert(key, entry);
    }

    /// Returns true if an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Eagerly remove every expired entry. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "pruned expired cache entries");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn make_room(&self) {
        if self.prune() > 0 && self.entries.len() < self.max_entries {
            return;
        }

        // Collect first: removing while an iterator holds a shard guard deadlocks.
        let victim = self
            .entries
            .iter()
            .min_by(|a, b| {
                a.value()
                    .expires_at
                    .cmp(&b.value().expires_at)
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::debug!(key = %key, max_entries = self.max_entries, "evicted cache entry");
        }
    }
}

/// Cache handle: a real store or a no-op.
///
/// `Disabled` always misses and silently discards writes.
#[derive(Debug)]
pub enum Cache<V> {
    Memory(MemoryCache<V>),
    Disabled,
}

impl<V: Clone> Cache<V> {
    pub fn from_policy(policy: &CachePolicy) -> Self {
        match policy {
            CachePolicy::Disabled => Self::Disabled,
            CachePolicy::Enabled(settings) => Self::Memory(MemoryCache::new(settings)),
        }
    }

    #[must_use]
    pub fn memory(settings: &CacheSettings) -> Self {
        Self::Memory(MemoryCache::new(settings))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        match self {
            Self::Memory(cache) => cache.get(key),
            Self::Disabled => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        match self {
            Self::Memory(cache) => cache.set(key, value, ttl),
            Self::Disabled => {}
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        match self {
            Self::Memory(cache) => cache.delete(key),
            Self::Disabled => false,
        }
    }

    pub fn clear(&self) {
        if let Self::Memory(cache) = self {
            cache.clear();
        }
    }

    pub fn prune(&self) -> usize {
        match self {
            Self::Memory(cache) => cache.prune(),
            Self::Disabled => 0,
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self {
            Self::Memory(cache) => cache.stats(),
            Self::Disabled => CacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Memory(_))
    }
}
