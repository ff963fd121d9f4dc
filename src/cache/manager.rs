//! Tool-result cache manager.
//!
//! Wraps a [`ToolExecutor`] with one [`ToolCache`] per (tool, server) pair.
//! Only successful results are stored; errors and tool-level failures always
//! reach the executor again on the next call.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    key::CacheKey,
    store::{CacheStats, ToolCache},
};
use crate::{
    core::{
        client::ToolExecutor,
        config::CacheConfig,
        metrics::GatewayMetrics,
        schedule::PeriodicTask,
        types::{ToolExecution, ToolResult},
    },
    error::{GatewayError, GatewayResult},
};

pub struct CacheManager {
    config: CacheConfig,
    /// Keyed by (server, tool).
    caches: DashMap<(String, String), Arc<ToolCache>>,
    executor: Arc<dyn ToolExecutor>,
    metrics: Arc<GatewayMetrics>,
    cleanup_task: Mutex<Option<PeriodicTask>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig, executor: Arc<dyn ToolExecutor>) -> GatewayResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            caches: DashMap::new(),
            executor,
            metrics: Arc::new(GatewayMetrics::new()),
            cleanup_task: Mutex::new(None),
        })
    }

    /// Share a metrics collector with other components.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Return a cached result or run the executor and cache a success.
    ///
    /// Dropping the returned future cancels the executor call; nothing is
    /// cached in that case.
    pub async fn execute_with_cache(&self, execution: &ToolExecution) -> GatewayResult<ToolResult> {
        if !self.config.enabled {
            self.metrics.record_uncached_request();
            return self.execute_uncached(execution).await;
        }

        let key = CacheKey::for_execution(execution).to_string();
        let cache = self.get_cache(&execution.tool_name, &execution.server_name);

        if let Some(hit) = cache.get(&key) {
            self.metrics
                .record_cache_hit(&execution.server_name, &execution.tool_name);
            debug!(
                server = %execution.server_name,
                tool = %execution.tool_name,
                "Cache hit"
            );
            return Ok(hit);
        }

        self.metrics
            .record_cache_miss(&execution.server_name, &execution.tool_name);
        debug!(
            server = %execution.server_name,
            tool = %execution.tool_name,
            "Cache miss"
        );

        let started = Instant::now();
        let result = self.execute_uncached(execution).await?;
        if !result.success {
            return Ok(result);
        }

        cache.record_latency(started.elapsed().as_millis() as u64);
        let ttl = self.config.ttl_for_tool(&execution.tool_name);
        if cache.set(&key, result.clone(), ttl) {
            debug!(
                server = %execution.server_name,
                tool = %execution.tool_name,
                ttl_secs = ttl.as_secs(),
                "Cached result"
            );
        }
        Ok(result)
    }

    async fn execute_uncached(&self, execution: &ToolExecution) -> GatewayResult<ToolResult> {
        let _active = self.metrics.track_active();
        let started = Instant::now();
        let result = self.executor.execute_tool(execution).await;
        let success = matches!(&result, Ok(r) if r.success);
        self.metrics.record_execution(
            &execution.server_name,
            &execution.tool_name,
            success,
            started.elapsed().as_millis() as u64,
        );
        result
    }

    /// The cache for one (tool, server) pair, created on first use.
    pub fn get_cache(&self, tool_name: &str, server_name: &str) -> Arc<ToolCache> {
        let pair = (server_name.to_string(), tool_name.to_string());
        Arc::clone(
            self.caches
                .entry(pair)
                .or_insert_with(|| {
                    Arc::new(ToolCache::new(
                        self.config.max_keys,
                        self.config.max_size_bytes,
                    ))
                })
                .value(),
        )
    }

    pub fn ttl_for_tool(&self, tool_name: &str) -> Duration {
        self.config.ttl_for_tool(tool_name)
    }

    /// Remove every entry whose key contains `pattern`. Matching nothing is fine.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let removed: usize = self
            .caches
            .iter()
            .map(|entry| entry.value().remove_matching(pattern))
            .sum();
        info!(pattern, removed, "Invalidated cache entries");
        removed
    }

    /// Sum of every pair's stats.
    pub fn get_global_stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for entry in self.caches.iter() {
            total.merge(&entry.value().stats());
        }
        total
    }

    /// Sweep expired entries from every pair. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let caches: Vec<Arc<ToolCache>> =
            self.caches.iter().map(|e| Arc::clone(e.value())).collect();
        let removed: usize = caches.iter().map(|cache| cache.cleanup()).sum();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Run `cleanup_expired` every `cleanup_interval` until `parent` is cancelled.
    pub fn start_cleanup(self: &Arc<Self>, parent: &CancellationToken) -> GatewayResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut slot = self.cleanup_task.lock();
        if slot.as_ref().is_some_and(|task| task.is_alive()) {
            return Err(GatewayError::AlreadyRunning("cache cleanup".into()));
        }

        let manager = Arc::downgrade(self);
        *slot = Some(PeriodicTask::spawn(
            "cache-cleanup",
            self.config.cleanup_interval_duration(),
            parent,
            move || {
                let manager = manager.clone();
                async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.cleanup_expired();
                    }
                }
            },
        ));
        Ok(())
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .as_ref()
            .is_some_and(|task| task.is_alive())
    }

    /// Stop the cleanup task and drop every cached entry.
    pub async fn shutdown(&self) {
        let task = self.cleanup_task.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
        for entry in self.caches.iter() {
            entry.value().clear();
        }
        self.caches.clear();
        info!("Cache manager shut down");
    }
}
