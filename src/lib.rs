//! Tool gateway: connection registry, result cache and health metrics for
//! tool-providing servers.
//!
//! ## Modules
//!
//! - [`core`]: server registry, client factory, configuration, events, metrics, health
//! - [`cache`]: per-(tool, server) result caches and the cache manager
//! - [`client`]: concrete transports, currently the `rmcp` bridge
//! - [`gateway`]: [`ToolGateway`] wiring everything together
//!
//! The library emits `tracing` events and never installs a subscriber.

pub mod error;

// Subsystems
pub mod cache;
pub mod client;
pub mod core;
pub mod gateway;

pub use cache::{CacheKey, CacheManager, CacheStats, ToolCache};
pub use client::{McpTransport, RmcpClient};
// Re-export from core
pub use core::{
    channel_handler, CacheBackend, CacheConfig, ClientFactory, ComponentHealth, ComponentStatus,
    ConnectionStatus, DiscoveryConfig, EvictionPolicy, GatewayConfig, GatewayMetrics,
    HealthChecker, HealthReport, HealthStatus, MetricsSnapshot, PathDiscovery, ServerConfig,
    ServerDiscovery, ServerEvent, ServerEventHandler, ServerEventKind, ServerInfo, ServerRegistry,
    StaticDiscovery, ToolClient, ToolContent, ToolExecution, ToolExecutor, ToolResult,
};
pub use error::{GatewayError, GatewayResult};
pub use gateway::ToolGateway;
