//! Concrete tool clients registered with the factory.

pub mod mcp;

pub use mcp::{McpTransport, RmcpClient};
