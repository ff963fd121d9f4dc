//! Gateway configuration types.
//!
//! Defines server, cache and discovery configuration. Everything here is expected
//! to arrive fully populated from an external loader; `from_file` is a convenience
//! for embedding binaries.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Servers registered at startup
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Tool-result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background health check cadence (seconds)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,

    /// Auto-discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub id: String,
    pub name: String,

    /// Logical grouping, e.g. "local" or "remote"
    #[serde(rename = "type", default)]
    pub server_type: String,

    /// Factory-registered client implementation to instantiate
    #[serde(default = "default_client_type")]
    pub client_type: String,

    /// Transport-specific connection descriptor, interpreted by the client
    #[serde(default)]
    pub connection: Map<String, Value>,

    #[serde(default)]
    pub enabled: bool,

    /// Connect and ping timeout (seconds)
    #[serde(default = "default_server_timeout")]
    pub timeout: u64,

    /// Declared feature strings surfaced in `ServerInfo`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ServerConfig {
    pub fn new(id: impl Into<String>, client_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            server_type: String::new(),
            client_type: client_type.into(),
            connection: Map::new(),
            enabled: false,
            timeout: default_server_timeout(),
            capabilities: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_connection(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.connection.insert(key.into(), value.into());
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
}

/// Storage medium for cached results. Only in-process memory exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL applied when no per-tool override exists (seconds)
    #[serde(default = "default_ttl")]
    pub default_ttl: u64,

    /// Upper bound on the summed entry size of one (tool, server) cache
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Upper bound on the entry count of one (tool, server) cache
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Expired-entry sweep cadence (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    #[serde(default)]
    pub backend: CacheBackend,

    /// Per-tool TTL overrides keyed by tool name (seconds)
    #[serde(default)]
    pub per_tool_ttl: HashMap<String, u64>,
}

impl CacheConfig {
    pub fn default_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn cleanup_interval_duration(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    /// Override for `tool_name` if present, otherwise the default TTL.
    pub fn ttl_for_tool(&self, tool_name: &str) -> Duration {
        self.per_tool_ttl
            .get(tool_name)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| self.default_ttl_duration())
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.default_ttl == 0 {
            return Err(GatewayError::Config("cache.default_ttl must be > 0".into()));
        }
        if self.max_keys == 0 {
            return Err(GatewayError::Config("cache.max_keys must be > 0".into()));
        }
        if self.max_size_bytes == 0 {
            return Err(GatewayError::Config(
                "cache.max_size_bytes must be > 0".into(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(GatewayError::Config(
                "cache.cleanup_interval must be > 0".into(),
            ));
        }
        if let Some((tool, _)) = self.per_tool_ttl.iter().find(|(_, ttl)| **ttl == 0) {
            return Err(GatewayError::Config(format!(
                "cache.per_tool_ttl.{} must be > 0",
                tool
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Start the auto-discovery loop with the registry
    #[serde(default)]
    pub enabled: bool,

    /// Discovery cadence (seconds)
    #[serde(default = "default_discovery_interval")]
    pub interval: u64,

    /// Directories to scan; empty means every `$PATH` entry
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Executable file-name prefix that marks a tool server
    #[serde(default = "default_discovery_prefix")]
    pub executable_prefix: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_client_type() -> String {
    "rmcp".to_string()
}

fn default_server_timeout() -> u64 {
    30
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_ttl() -> u64 {
    900 // 15 minutes
}

fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_keys() -> usize {
    10_000
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_discovery_interval() -> u64 {
    300
}

fn default_discovery_prefix() -> String {
    "mcp-server-".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: default_ttl(),
            max_size_bytes: default_max_size_bytes(),
            max_keys: default_max_keys(),
            eviction_policy: EvictionPolicy::Lru,
            cleanup_interval: default_cleanup_interval(),
            backend: CacheBackend::Memory,
            per_tool_ttl: HashMap::new(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            cache: CacheConfig::default(),
            health_check_interval: default_health_check_interval(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_discovery_interval(),
            search_paths: Vec::new(),
            executable_prefix: default_discovery_prefix(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn health_check_interval_duration(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(GatewayError::Config("server id must not be empty".into()));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate server id '{}'",
                    server.id
                )));
            }
            if server.timeout == 0 {
                return Err(GatewayError::Config(format!(
                    "server '{}' timeout must be > 0",
                    server.id
                )));
            }
        }
        if self.health_check_interval == 0 {
            return Err(GatewayError::Config(
                "health_check_interval must be > 0".into(),
            ));
        }
        if self.discovery.enabled && self.discovery.interval == 0 {
            return Err(GatewayError::Config(
                "discovery.interval must be > 0".into(),
            ));
        }
        self.cache.validate()
    }
}
