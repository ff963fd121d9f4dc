//! Cache for a single (tool, server) pair.
//!
//! Entries expire lazily on read and proactively on `cleanup`. Capacity is
//! bounded by both key count and summed entry size; the least recently used
//! entry goes first when either bound would be exceeded.
//!
//! Time comes from `tokio::time::Instant`, so a paused test clock drives expiry.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::types::ToolResult;

/// Stand-in expiry for TTLs too large to add to the clock (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ToolResult,
    expires_at: Instant,
    size_bytes: u64,
    last_accessed: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    total_size: u64,
    last_cleanup: Option<DateTime<Utc>>,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

/// Counters and gauges for one cache, or an aggregate of many.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub total_keys: usize,
    pub total_size: u64,
    pub hit_rate: f64,
    /// Mean executor latency of the misses that filled this cache.
    pub average_latency_ms: f64,
    pub latency_samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Fold `other` into `self`, recomputing derived rates.
    pub fn merge(&mut self, other: &CacheStats) {
        let latency_total = self.average_latency_ms * self.latency_samples as f64
            + other.average_latency_ms * other.latency_samples as f64;

        self.hit_count += other.hit_count;
        self.miss_count += other.miss_count;
        self.eviction_count += other.eviction_count;
        self.total_keys += other.total_keys;
        self.total_size += other.total_size;
        self.latency_samples += other.latency_samples;
        self.last_cleanup = match (self.last_cleanup, other.last_cleanup) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        self.hit_rate = hit_rate(self.hit_count, self.miss_count);
        self.average_latency_ms = if self.latency_samples > 0 {
            latency_total / self.latency_samples as f64
        } else {
            0.0
        };
    }
}

/// Read-only view of one entry, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMetadata {
    pub size_bytes: u64,
    pub access_count: u64,
    pub ttl_remaining: Duration,
    pub idle: Duration,
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

pub struct ToolCache {
    state: RwLock<CacheState>,
    max_keys: usize,
    max_size_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
}

impl ToolCache {
    pub fn new(max_keys: usize, max_size_bytes: u64) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::unbounded(),
                total_size: 0,
                last_cleanup: None,
            }),
            max_keys: max_keys.max(1),
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            latency_total_ms: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    /// Fetch a live entry and mark it most recently used.
    ///
    /// An expired entry counts as a miss and is dropped on the spot.
    pub fn get(&self, key: &str) -> Option<ToolResult> {
        let now = Instant::now();
        let mut state = self.state.write();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.remove(key);
            debug!(key, "Expired cache entry dropped on read");
        }
        drop(state);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite, evicting least recently used entries until it fits.
    ///
    /// Returns false when the value is larger than the whole cache and was not
    /// stored.
    pub fn set(&self, key: &str, value: ToolResult, ttl: Duration) -> bool {
        let size_bytes = value.size_bytes();
        if size_bytes > self.max_size_bytes {
            warn!(
                key,
                size_bytes,
                max_size_bytes = self.max_size_bytes,
                "Result larger than cache capacity, not cached"
            );
            return false;
        }

        let now = Instant::now();
        let mut state = self.state.write();
        state.remove(key);

        let mut evicted = 0u64;
        while state.entries.len() >= self.max_keys
            || state.total_size + size_bytes > self.max_size_bytes
        {
            let Some((victim, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.total_size = state.total_size.saturating_sub(entry.size_bytes);
            evicted += 1;
            debug!(key = %victim, "Evicted least recently used cache entry");
        }

        state.entries.put(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
                size_bytes,
                last_accessed: now,
                access_count: 0,
            },
        );
        state.total_size += size_bytes;
        drop(state);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        true
    }

    /// Existence check that leaves recency untouched.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .read()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn entry_metadata(&self, key: &str) -> Option<EntryMetadata> {
        let now = Instant::now();
        let state = self.state.read();
        let entry = state.entries.peek(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(EntryMetadata {
            size_bytes: entry.size_bytes,
            access_count: entry.access_count,
            ttl_remaining: entry.expires_at.saturating_duration_since(now),
            idle: now.saturating_duration_since(entry.last_accessed),
        })
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.total_size = 0;
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        state.last_cleanup = Some(Utc::now());
        expired.len()
    }

    /// Drop every entry whose key contains `pattern`.
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut state = self.state.write();
        let matching: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            state.remove(key);
        }
        matching.len()
    }

    pub fn record_latency(&self, duration_ms: u64) {
        self.latency_total_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (total_keys, total_size, last_cleanup) = {
            let state = self.state.read();
            (state.entries.len(), state.total_size, state.last_cleanup)
        };
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let latency_samples = self.latency_samples.load(Ordering::Relaxed);
        let latency_total = self.latency_total_ms.load(Ordering::Relaxed);

        CacheStats {
            hit_count,
            miss_count,
            eviction_count: self.evictions.load(Ordering::Relaxed),
            total_keys,
            total_size,
            hit_rate: hit_rate(hit_count, miss_count),
            average_latency_ms: if latency_samples > 0 {
                latency_total as f64 / latency_samples as f64
            } else {
                0.0
            },
            latency_samples,
            last_cleanup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ToolContent, ToolExecution};

    const TTL: Duration = Duration::from_secs(60);

    fn result(text: &str) -> ToolResult {
        ToolResult::success(
            &ToolExecution::new("echo", "local"),
            vec![ToolContent::text(text)],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_hit_and_miss() {
        let cache = ToolCache::new(10, 1 << 20);
        assert!(cache.get("k1").is_none());

        cache.set("k1", result("one"), TTL);
        let hit = cache.get("k1").unwrap();
        assert_eq!(hit.content[0].text.as_deref(), Some("one"));

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.total_keys, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_without_cleanup() {
        let cache = ToolCache::new(10, 1 << 20);
        cache.set("k1", result("one"), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.exists("k1"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.exists("k1"));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().total_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_respects_reads() {
        let cache = ToolCache::new(2, 1 << 20);
        cache.set("a", result("a"), TTL);
        cache.set("b", result("b"), TTL);

        // Touch "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").is_some());
        cache.set("c", result("c"), TTL);

        assert!(cache.exists("a"));
        assert!(!cache.exists("b"));
        assert!(cache.exists("c"));
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exists_does_not_refresh_recency() {
        let cache = ToolCache::new(2, 1 << 20);
        cache.set("a", result("a"), TTL);
        cache.set("b", result("b"), TTL);

        assert!(cache.exists("a"));
        cache.set("c", result("c"), TTL);

        assert!(!cache.exists("a"));
        assert!(cache.exists("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_bound_evicts_until_fit() {
        let entry_size = result("x").size_bytes();
        let cache = ToolCache::new(100, entry_size * 2);
        cache.set("a", result("x"), TTL);
        cache.set("b", result("x"), TTL);
        cache.set("c", result("x"), TTL);

        assert_eq!(cache.len(), 2);
        assert!(!cache.exists("a"));
        assert!(cache.stats().total_size <= entry_size * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_entry_rejected() {
        let cache = ToolCache::new(10, 8);
        assert!(!cache.set("big", result("far too large for eight bytes"), TTL));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().eviction_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_replaces_size() {
        let cache = ToolCache::new(10, 1 << 20);
        cache.set("k", result("short"), TTL);
        cache.set("k", result("a somewhat longer value"), TTL);

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.stats().total_size,
            result("a somewhat longer value").size_bytes()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_sweeps_expired() {
        let cache = ToolCache::new(10, 1 << 20);
        cache.set("short", result("s"), Duration::from_secs(1));
        cache.set("long", result("l"), Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.stats().last_cleanup.is_some());
        // Sweeping is not a lookup
        assert_eq!(cache.stats().miss_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_matching_and_delete() {
        let cache = ToolCache::new(10, 1 << 20);
        cache.set("srvA:search:1", result("1"), TTL);
        cache.set("srvA:search:2", result("2"), TTL);
        cache.set("srvB:search:1", result("3"), TTL);

        assert_eq!(cache.remove_matching("srvA"), 2);
        assert_eq!(cache.remove_matching("nothing"), 0);
        assert!(cache.delete("srvB:search:1"));
        assert!(!cache.delete("srvB:search:1"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_metadata_tracks_access() {
        let cache = ToolCache::new(10, 1 << 20);
        cache.set("k", result("v"), TTL);
        cache.get("k");
        cache.get("k");

        tokio::time::advance(Duration::from_secs(10)).await;
        let meta = cache.entry_metadata("k").unwrap();
        assert_eq!(meta.access_count, 2);
        assert_eq!(meta.ttl_remaining, Duration::from_secs(50));
        assert_eq!(meta.idle, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_is_clamped() {
        let cache = ToolCache::new(10, 1 << 20);
        assert!(cache.set("k", result("v"), Duration::MAX));

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(cache.get("k").is_some());
        assert!(cache.entry_metadata("k").unwrap().ttl_remaining > Duration::ZERO);
    }

    #[test]
    fn test_stats_merge() {
        let mut total = CacheStats::default();
        total.merge(&CacheStats {
            hit_count: 3,
            miss_count: 1,
            total_keys: 2,
            average_latency_ms: 10.0,
            latency_samples: 1,
            ..Default::default()
        });
        total.merge(&CacheStats {
            hit_count: 1,
            miss_count: 3,
            total_keys: 1,
            average_latency_ms: 30.0,
            latency_samples: 1,
            ..Default::default()
        });

        assert_eq!(total.hit_count, 4);
        assert_eq!(total.total_keys, 3);
        assert!((total.hit_rate - 0.5).abs() < f64::EPSILON);
        assert!((total.average_latency_ms - 20.0).abs() < f64::EPSILON);
    }
}
