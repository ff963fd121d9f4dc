//! Top-level wiring of registry, cache manager, metrics and health.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cache::CacheManager,
    core::{
        client::ToolExecutor,
        config::GatewayConfig,
        factory::ClientFactory,
        health::{HealthChecker, HealthReport},
        metrics::{GatewayMetrics, MetricsSnapshot},
        registry::ServerRegistry,
        types::{ToolExecution, ToolResult},
    },
    error::GatewayResult,
};

/// A configured gateway. Background loops run between [`start`](Self::start)
/// and [`shutdown`](Self::shutdown).
pub struct ToolGateway {
    config: GatewayConfig,
    registry: Arc<ServerRegistry>,
    cache: Arc<CacheManager>,
    metrics: Arc<GatewayMetrics>,
    health: HealthChecker,
    shutdown: CancellationToken,
}

impl ToolGateway {
    /// Register configured servers and build the cache around the registry.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: GatewayConfig, factory: Arc<ClientFactory>) -> GatewayResult<Self> {
        let registry = ServerRegistry::from_config(&config, factory)?;
        Self::with_registry(config, registry)
    }

    pub fn with_registry(
        config: GatewayConfig,
        registry: Arc<ServerRegistry>,
    ) -> GatewayResult<Self> {
        let metrics = Arc::new(GatewayMetrics::new());
        let executor: Arc<dyn ToolExecutor> = registry.clone();
        let cache = Arc::new(
            CacheManager::new(config.cache.clone(), executor)?.with_metrics(Arc::clone(&metrics)),
        );
        let health = HealthChecker::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            registry,
            cache,
            metrics,
            health,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start health checking, cache cleanup and, if configured, auto-discovery.
    pub fn start(&self) -> GatewayResult<()> {
        self.registry.start_health_checking(&self.shutdown)?;
        self.cache.start_cleanup(&self.shutdown)?;
        if self.config.discovery.enabled {
            self.registry.start_auto_discovery(
                &self.shutdown,
                Duration::from_secs(self.config.discovery.interval),
            )?;
        }
        info!(
            servers = self.registry.len(),
            cache_enabled = self.cache.is_enabled(),
            discovery = self.config.discovery.enabled,
            "Tool gateway started"
        );
        Ok(())
    }

    pub async fn execute(&self, execution: &ToolExecution) -> GatewayResult<ToolResult> {
        self.cache.execute_with_cache(execution).await
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub async fn check_health(&self) -> HealthReport {
        self.health.check_health().await
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.health.get_metrics()
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.cache.shutdown().await;
        self.registry.shutdown().await;
        info!("Tool gateway shut down");
    }
}
