//! Request, result and status types shared by the registry, clients and cache.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single tool invocation routed to one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub server_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolExecution {
    pub fn new(tool_name: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            server_name: server_name.into(),
            arguments: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(
        default,
        alias = "mimeType",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            data: None,
            mime_type: None,
        }
    }
}

/// Outcome of a tool invocation.
///
/// `success == false` means the server answered with a tool-level error. Such
/// results reach the caller but are never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub server_name: String,
    pub success: bool,
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(execution: &ToolExecution, content: Vec<ToolContent>) -> Self {
        Self {
            tool_name: execution.tool_name.clone(),
            server_name: execution.server_name.clone(),
            success: true,
            content,
            structured_content: None,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(execution: &ToolExecution, error: impl Into<String>) -> Self {
        Self {
            tool_name: execution.tool_name.clone(),
            server_name: execution.server_name.clone(),
            success: false,
            content: Vec::new(),
            structured_content: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Approximate in-memory footprint used for cache size accounting.
    pub fn size_bytes(&self) -> u64 {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time reachability of one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ConnectionStatus,
    pub last_check: DateTime<Utc>,
    /// Only populated while `status == Connected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn not_connected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_check: Utc::now(),
            response_time_ms: None,
            error: Some("not connected".to_string()),
        }
    }

    pub fn connected(response_time_ms: u64) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            last_check: Utc::now(),
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Error,
            last_check: Utc::now(),
            response_time_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
    pub logging: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl ServerCapabilities {
    /// Every server can run tools; the rest comes from declared feature strings.
    pub fn from_declared(features: &[String]) -> Self {
        let has = |name: &str| features.iter().any(|f| f.eq_ignore_ascii_case(name));
        Self {
            tools: true,
            resources: has("resources"),
            prompts: has("prompts"),
            logging: has("logging"),
            features: features.to_vec(),
        }
    }
}

/// Point-in-time copy of one registry entry, as returned by listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub server_type: String,
    pub client_type: String,
    pub enabled: bool,
    pub status: ConnectionStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
