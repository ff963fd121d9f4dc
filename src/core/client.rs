//! Seams between the gateway and concrete transports.

use async_trait::async_trait;

use super::{
    config::ServerConfig,
    types::{ToolExecution, ToolResult},
};
use crate::error::GatewayResult;

/// A connection to one tool server.
///
/// Implementations own their transport state behind interior mutability so the
/// registry can share a client between its connect task, health pings and
/// tool calls.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> GatewayResult<()>;

    async fn disconnect(&self) -> GatewayResult<()>;

    fn is_connected(&self) -> bool;

    /// Cheap round trip proving the server is responsive.
    async fn ping(&self) -> GatewayResult<()>;

    async fn execute_tool(&self, execution: &ToolExecution) -> GatewayResult<ToolResult>;
}

/// Anything that can run a tool call, typically the registry routing by server.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(&self, execution: &ToolExecution) -> GatewayResult<ToolResult>;
}
