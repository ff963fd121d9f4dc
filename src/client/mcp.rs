//! Tool client backed by the `rmcp` SDK.
//!
//! The connection map of a [`ServerConfig`] selects the transport:
//!
//! ```yaml
//! connection:
//!   transport: stdio          # or sse / streamable
//!   command: mcp-server-files
//!   args: ["--root", "/srv"]
//! ```

use std::{borrow::Cow, collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult},
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    core::{
        client::ToolClient,
        config::ServerConfig,
        types::{ToolContent, ToolExecution, ToolResult},
    },
    error::{GatewayError, GatewayResult},
};

type McpClient = RunningService<RoleClient, ()>;

/// Transport descriptor parsed from a server's connection map.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Streamable {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl McpTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            McpTransport::Stdio { .. } => "stdio",
            McpTransport::Sse { .. } => "sse",
            McpTransport::Streamable { .. } => "streamable",
        }
    }

    pub fn from_connection(connection: &Map<String, Value>) -> GatewayResult<Self> {
        let transport: Self = serde_json::from_value(Value::Object(connection.clone()))
            .map_err(|e| GatewayError::Config(format!("invalid connection descriptor: {}", e)))?;

        match &transport {
            McpTransport::Stdio { command, .. } if command.trim().is_empty() => {
                return Err(GatewayError::Config("stdio command must not be empty".into()));
            }
            McpTransport::Sse { url, .. } | McpTransport::Streamable { url, .. } => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| GatewayError::Config(format!("invalid url '{}': {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(GatewayError::Config(format!(
                        "unsupported url scheme '{}'",
                        parsed.scheme()
                    )));
                }
            }
            _ => {}
        }
        Ok(transport)
    }
}

pub struct RmcpClient {
    server_id: String,
    service: RwLock<Option<Arc<McpClient>>>,
}

impl RmcpClient {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            service: RwLock::new(None),
        }
    }

    fn service(&self) -> GatewayResult<Arc<McpClient>> {
        self.service.read().clone().ok_or_else(|| {
            GatewayError::ConnectionFailed(format!("server '{}' is not connected", self.server_id))
        })
    }

    async fn open(&self, transport: &McpTransport) -> GatewayResult<McpClient> {
        match transport {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(command).configure(|cmd| {
                        cmd.args(args)
                            .envs(envs.iter())
                            .stderr(std::process::Stdio::inherit());
                    }),
                )
                .map_err(|e| GatewayError::Transport(format!("create stdio transport: {}", e)))?;

                ().serve(transport).await.map_err(|e| {
                    GatewayError::ConnectionFailed(format!("initialize stdio client: {}", e))
                })
            }

            McpTransport::Sse {
                url,
                token,
                headers,
            } => {
                let http = build_http_client(token.as_deref(), headers)?;
                let cfg = SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };
                let transport = SseClientTransport::start_with_client(http, cfg)
                    .await
                    .map_err(|e| GatewayError::Transport(format!("create SSE transport: {}", e)))?;

                ().serve(transport).await.map_err(|e| {
                    GatewayError::ConnectionFailed(format!("initialize SSE client: {}", e))
                })
            }

            McpTransport::Streamable {
                url,
                token,
                headers,
            } => {
                let http = build_http_client(token.as_deref(), headers)?;
                let cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                let transport = StreamableHttpClientTransport::with_client(http, cfg);

                ().serve(transport).await.map_err(|e| {
                    GatewayError::ConnectionFailed(format!("initialize streamable client: {}", e))
                })
            }
        }
    }
}

#[async_trait]
impl ToolClient for RmcpClient {
    async fn connect(&self, config: &ServerConfig) -> GatewayResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let transport = McpTransport::from_connection(&config.connection)?;
        info!(
            server_id = %self.server_id,
            transport = transport.kind(),
            "Connecting to tool server"
        );

        let client = self.open(&transport).await?;
        let previous = self.service.write().replace(Arc::new(client));
        if previous.is_some() {
            // A concurrent connect won the race; its session is dropped here
            debug!(server_id = %self.server_id, "Replaced existing session");
        }
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        let taken = self.service.write().take();
        let Some(client) = taken else {
            return Ok(());
        };

        match Arc::try_unwrap(client) {
            Ok(client) => client
                .cancel()
                .await
                .map(|_| ())
                .map_err(|e| GatewayError::Transport(format!("disconnect: {}", e))),
            Err(_) => {
                // In-flight calls hold the last references; the session closes
                // when they finish
                warn!(
                    server_id = %self.server_id,
                    "Session still in use, closing after in-flight calls finish"
                );
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.service.read().is_some()
    }

    async fn ping(&self) -> GatewayResult<()> {
        let client = self.service()?;
        client
            .peer()
            .list_all_tools()
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::ConnectionFailed(format!("ping: {}", e)))
    }

    async fn execute_tool(&self, execution: &ToolExecution) -> GatewayResult<ToolResult> {
        let client = self.service()?;
        let request = CallToolRequestParam {
            name: Cow::Owned(execution.tool_name.clone()),
            arguments: Some(execution.arguments.clone()),
        };

        let started = tokio::time::Instant::now();
        let raw = client.call_tool(request).await.map_err(|e| {
            GatewayError::ExecutionFailed(format!("{}: {}", execution.tool_name, e))
        })?;

        let mut result = convert_result(execution, raw)?;
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

fn build_http_client(
    token: Option<&str>,
    headers: &HashMap<String, String>,
) -> GatewayResult<reqwest::Client> {
    let mut header_map = reqwest::header::HeaderMap::new();
    if let Some(token) = token {
        header_map.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", token)
                .parse()
                .map_err(|e| GatewayError::Transport(format!("auth token: {}", e)))?,
        );
    }
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GatewayError::Config(format!("header name '{}': {}", name, e)))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| GatewayError::Config(format!("header value for '{}': {}", name, e)))?;
        header_map.insert(name, value);
    }

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .default_headers(header_map)
        .build()
        .map_err(|e| GatewayError::Transport(format!("build HTTP client: {}", e)))
}

fn convert_result(execution: &ToolExecution, raw: CallToolResult) -> GatewayResult<ToolResult> {
    let content: Vec<ToolContent> = serde_json::from_value(serde_json::to_value(&raw.content)?)?;
    let success = !raw.is_error.unwrap_or(false);
    let error = if success {
        None
    } else {
        Some(
            content
                .iter()
                .find_map(|c| c.text.clone())
                .unwrap_or_else(|| "tool reported an error".to_string()),
        )
    };

    Ok(ToolResult {
        tool_name: execution.tool_name.clone(),
        server_name: execution.server_name.clone(),
        success,
        content,
        structured_content: raw.structured_content,
        error,
        duration_ms: 0,
    })
}
