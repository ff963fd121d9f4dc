//! Core gateway infrastructure.

pub mod client;
pub mod config;
pub mod discovery;
pub mod events;
pub mod factory;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod schedule;
pub mod types;

pub use client::{ToolClient, ToolExecutor};
pub use config::{
    CacheBackend, CacheConfig, DiscoveryConfig, EvictionPolicy, GatewayConfig, ServerConfig,
};
pub use discovery::{PathDiscovery, ServerDiscovery, StaticDiscovery};
pub use events::{channel_handler, ServerEvent, ServerEventHandler, ServerEventKind};
pub use factory::{ClientConstructor, ClientFactory, DEFAULT_CLIENT_TYPE};
pub use health::{ComponentHealth, ComponentStatus, HealthChecker, HealthReport};
pub use metrics::{GatewayMetrics, GroupSnapshot, LatencySnapshot, MetricsSnapshot};
pub use registry::ServerRegistry;
pub use schedule::PeriodicTask;
pub use types::{
    ConnectionStatus, HealthStatus, ServerCapabilities, ServerInfo, ToolContent, ToolExecution,
    ToolResult,
};
