//! Execution and cache metrics for the gateway.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use serde::Serialize;

use crate::cache::{hit_rate, CacheStats};

/// Counters for everything that flows through the cache manager.
///
/// A request is one call to the manager. An execution is one call that reached
/// the underlying executor; cache hits are requests without an execution.
pub struct GatewayMetrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    successful_executions: AtomicU64,
    failed_executions: AtomicU64,
    active_executions: Arc<AtomicU64>,
    latency: LatencyStats,
    per_server: DashMap<String, GroupStats>,
    per_tool: DashMap<String, GroupStats>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            successful_executions: AtomicU64::new(0),
            failed_executions: AtomicU64::new(0),
            active_executions: Arc::new(AtomicU64::new(0)),
            latency: LatencyStats::new(),
            per_server: DashMap::new(),
            per_tool: DashMap::new(),
        }
    }

    pub fn record_cache_hit(&self, server: &str, tool: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.with_groups(server, tool, |group| {
            group.cache_hits.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_cache_miss(&self, server: &str, tool: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.with_groups(server, tool, |group| {
            group.cache_misses.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// A request that bypassed the cache entirely.
    pub fn record_uncached_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark an execution in flight until the returned guard drops.
    ///
    /// The guard also covers cancellation: a dropped call still leaves the
    /// active count correct.
    pub fn track_active(&self) -> scopeguard::ScopeGuard<Arc<AtomicU64>, fn(Arc<AtomicU64>)> {
        self.active_executions.fetch_add(1, Ordering::Relaxed);
        scopeguard::guard(
            Arc::clone(&self.active_executions),
            release_active as fn(Arc<AtomicU64>),
        )
    }

    /// Record a completed executor call.
    pub fn record_execution(&self, server: &str, tool: &str, success: bool, duration_ms: u64) {
        if success {
            self.successful_executions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_executions.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.record(duration_ms);
        self.with_groups(server, tool, |group| {
            group.executions.fetch_add(1, Ordering::Relaxed);
            if !success {
                group.failures.fetch_add(1, Ordering::Relaxed);
            }
            group.latency.record(duration_ms);
        });
    }

    fn with_groups(&self, server: &str, tool: &str, update: impl Fn(&GroupStats)) {
        update(self.per_server.entry(server.to_string()).or_default().value());
        update(self.per_tool.entry(tool.to_string()).or_default().value());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let successful = self.successful_executions.load(Ordering::Relaxed);
        let failed = self.failed_executions.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_executions: successful + failed,
            successful_executions: successful,
            failed_executions: failed,
            active_executions: self.active_executions.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: hit_rate(hits, misses),
            error_rate: ratio(failed, successful + failed),
            latency: self.latency.snapshot(),
            per_server: collect_groups(&self.per_server),
            per_tool: collect_groups(&self.per_tool),
            cache: None,
        }
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.successful_executions.store(0, Ordering::Relaxed);
        self.failed_executions.store(0, Ordering::Relaxed);
        // In-flight work is still in flight
        self.latency.reset();
        self.per_server.clear();
        self.per_tool.clear();
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn release_active(count: Arc<AtomicU64>) {
    count.fetch_sub(1, Ordering::Relaxed);
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn collect_groups(groups: &DashMap<String, GroupStats>) -> BTreeMap<String, GroupSnapshot> {
    groups
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().snapshot()))
        .collect()
}

#[derive(Default)]
struct GroupStats {
    executions: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latency: LatencyStats,
}

impl GroupStats {
    fn snapshot(&self) -> GroupSnapshot {
        let executions = self.executions.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        GroupSnapshot {
            executions,
            failures,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: hit_rate(hits, misses),
            error_rate: ratio(failures, executions),
            latency: self.latency.snapshot(),
        }
    }
}

/// Latency accumulator; min and max use CAS loops.
struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);

        let mut current = self.min_ms.load(Ordering::Relaxed);
        while ms < current {
            match self.min_ms.compare_exchange_weak(
                current,
                ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut current = self.max_ms.load(Ordering::Relaxed);
        while ms > current {
            match self.max_ms.compare_exchange_weak(
                current,
                ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_ms.store(0, Ordering::Relaxed);
        self.min_ms.store(u64::MAX, Ordering::Relaxed);
        self.max_ms.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        LatencySnapshot {
            count,
            avg_ms: if count > 0 {
                total as f64 / count as f64
            } else {
                0.0
            },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub latency: LatencySnapshot,
}

/// Point-in-time view for an external exposition layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub active_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub latency: LatencySnapshot,
    pub per_server: BTreeMap<String, GroupSnapshot>,
    pub per_tool: BTreeMap<String, GroupSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

impl MetricsSnapshot {
    /// Percentage of executions that succeeded; 100 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            100.0
        } else {
            (self.successful_executions as f64 / self.total_executions as f64) * 100.0
        }
    }
}
