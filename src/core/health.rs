//! Aggregate health and metrics for external consumers.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    metrics::{GatewayMetrics, MetricsSnapshot},
    registry::ServerRegistry,
    types::{ConnectionStatus, HealthStatus},
};
use crate::cache::CacheManager;

/// Executions needed before the error rate can mark metrics degraded.
const MIN_EXECUTIONS_FOR_ERROR_RATE: u64 = 10;
const MAX_HEALTHY_ERROR_RATE: f64 = 0.5;

/// Ordered from best to worst so the overall status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub checked_at: DateTime<Utc>,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, details: Value, error: Option<String>) -> Self {
        Self {
            status,
            checked_at: Utc::now(),
            details,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: ComponentStatus,
    pub checked_at: DateTime<Utc>,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == ComponentStatus::Healthy
    }
}

pub struct HealthChecker {
    registry: Arc<ServerRegistry>,
    cache_manager: Arc<CacheManager>,
    metrics: Arc<GatewayMetrics>,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<ServerRegistry>,
        cache_manager: Arc<CacheManager>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            registry,
            cache_manager,
            metrics,
        }
    }

    /// Ping every server, then classify registry, cache and metrics.
    pub async fn check_health(&self) -> HealthReport {
        let statuses = self.registry.health_check().await;
        let enabled: Vec<HealthStatus> = self
            .registry
            .list_servers()
            .into_iter()
            .filter(|info| info.enabled)
            .filter_map(|info| statuses.get(&info.id).cloned())
            .collect();

        let mut components = BTreeMap::new();
        components.insert(
            "registry".to_string(),
            registry_health(statuses.len(), &enabled),
        );
        components.insert("cache".to_string(), self.cache_health());
        components.insert(
            "metrics".to_string(),
            metrics_health(&self.metrics.snapshot()),
        );

        let overall = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        debug!(?overall, "Health check complete");

        HealthReport {
            overall,
            checked_at: Utc::now(),
            components,
        }
    }

    /// Metrics snapshot including aggregated cache stats. Never mutates state.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.cache = Some(self.cache_manager.get_global_stats());
        snapshot
    }

    fn cache_health(&self) -> ComponentHealth {
        if !self.cache_manager.is_enabled() {
            return ComponentHealth::new(
                ComponentStatus::Healthy,
                json!({ "enabled": false }),
                None,
            );
        }

        let stats = self.cache_manager.get_global_stats();
        let cleanup_running = self.cache_manager.is_cleanup_running();
        let details = json!({
            "enabled": true,
            "cleanup_running": cleanup_running,
            "total_keys": stats.total_keys,
            "total_size": stats.total_size,
            "hit_rate": stats.hit_rate,
        });

        if cleanup_running {
            ComponentHealth::new(ComponentStatus::Healthy, details, None)
        } else {
            ComponentHealth::new(
                ComponentStatus::Degraded,
                details,
                Some("cache cleanup task is not running".to_string()),
            )
        }
    }
}

/// `enabled` holds the health of enabled servers only; disabled ones are
/// counted in `total` but never expected to connect.
fn registry_health(total: usize, enabled: &[HealthStatus]) -> ComponentHealth {
    let connected = enabled
        .iter()
        .filter(|h| h.status == ConnectionStatus::Connected)
        .count();
    let failing = enabled.len() - connected;
    let details = json!({
        "total_servers": total,
        "enabled_servers": enabled.len(),
        "connected": connected,
        "failing": failing,
    });

    if enabled.is_empty() {
        return ComponentHealth::new(
            ComponentStatus::Degraded,
            details,
            Some("no enabled servers".to_string()),
        );
    }
    match (connected, failing) {
        (_, 0) => ComponentHealth::new(ComponentStatus::Healthy, details, None),
        (0, _) => ComponentHealth::new(
            ComponentStatus::Error,
            details,
            Some("all servers are failing".to_string()),
        ),
        (_, n) => ComponentHealth::new(
            ComponentStatus::Degraded,
            details,
            Some(format!("{} server(s) failing", n)),
        ),
    }
}

fn metrics_health(snapshot: &MetricsSnapshot) -> ComponentHealth {
    let details = json!({
        "total_executions": snapshot.total_executions,
        "error_rate": snapshot.error_rate,
        "hit_rate": snapshot.hit_rate,
        "active_executions": snapshot.active_executions,
    });

    if snapshot.total_executions >= MIN_EXECUTIONS_FOR_ERROR_RATE
        && snapshot.error_rate > MAX_HEALTHY_ERROR_RATE
    {
        ComponentHealth::new(
            ComponentStatus::Degraded,
            details,
            Some(format!(
                "error rate {:.0}% over {} executions",
                snapshot.error_rate * 100.0,
                snapshot.total_executions
            )),
        )
    } else {
        ComponentHealth::new(ComponentStatus::Healthy, details, None)
    }
}
