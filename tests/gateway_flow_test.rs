//! End-to-end tests for the tool gateway
//!
//! These tests verify:
//! - Cached results are served without re-invoking the server
//! - Expiry, LRU eviction and failure handling of the cache
//! - Pattern invalidation across servers
//! - Registry lifecycle, health reporting and events

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tool_gateway::{
    channel_handler, CacheConfig, ClientFactory, ComponentStatus, ConnectionStatus, GatewayConfig,
    GatewayError, GatewayResult, ServerConfig, ServerEventKind, ToolClient, ToolContent,
    ToolExecution, ToolGateway, ToolResult,
};

/// Shared knobs and counters for every client the factory builds.
#[derive(Default)]
struct Backend {
    executions: AtomicUsize,
    fail_execution: AtomicBool,
    refuse_connect: AtomicBool,
}

struct ScriptedClient {
    backend: Arc<Backend>,
    connected: AtomicBool,
}

#[async_trait]
impl ToolClient for ScriptedClient {
    async fn connect(&self, _config: &ServerConfig) -> GatewayResult<()> {
        if self.backend.refuse_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectionFailed("connection refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> GatewayResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::ConnectionFailed("not connected".into()))
        }
    }

    async fn execute_tool(&self, execution: &ToolExecution) -> GatewayResult<ToolResult> {
        let n = self.backend.executions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.backend.fail_execution.load(Ordering::SeqCst) {
            return Err(GatewayError::ExecutionFailed("upstream timeout".into()));
        }
        Ok(ToolResult::success(
            execution,
            vec![ToolContent::text(format!(
                "{} from {} (#{})",
                execution.tool_name, execution.server_name, n
            ))],
        ))
    }
}

fn scripted_factory(backend: Arc<Backend>) -> Arc<ClientFactory> {
    let factory = ClientFactory::new();
    factory.register_client("scripted", move |_config: &ServerConfig| {
        let client: Arc<dyn ToolClient> = Arc::new(ScriptedClient {
            backend: Arc::clone(&backend),
            connected: AtomicBool::new(false),
        });
        Ok(client)
    });
    Arc::new(factory)
}

fn server(id: &str) -> ServerConfig {
    ServerConfig::new(id, "scripted").enabled(true)
}

fn gateway_with(cache: CacheConfig, servers: Vec<ServerConfig>) -> (ToolGateway, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let config = GatewayConfig {
        servers,
        cache,
        ..Default::default()
    };
    let gateway = ToolGateway::new(config, scripted_factory(Arc::clone(&backend)))
        .expect("gateway should build");
    (gateway, backend)
}

fn lookup(server: &str, id: i64) -> ToolExecution {
    ToolExecution::new("lookup", server).with_arg("id", id)
}

async fn wait_for_connect_outcome(gateway: &ToolGateway, id: &str) {
    for _ in 0..200 {
        let status = gateway.registry().get_server_info(id).unwrap().status;
        if status != ConnectionStatus::Disconnected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("server {} never finished connecting", id);
}

#[tokio::test]
async fn test_identical_calls_hit_cache() {
    let (gateway, backend) = gateway_with(CacheConfig::default(), vec![server("s1")]);

    let first = gateway
        .execute(&ToolExecution::new("search", "s1").with_arg("query", "rust").with_arg("limit", 3))
        .await
        .unwrap();
    let second = gateway
        .execute(&ToolExecution::new("search", "s1").with_arg("limit", 3).with_arg("query", "rust"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.executions.load(Ordering::SeqCst), 1);

    let metrics = gateway.get_metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.total_executions, 1);
    assert_eq!(metrics.cache.unwrap().hit_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_a_miss_without_cleanup() {
    let cache = CacheConfig {
        default_ttl: 30,
        ..Default::default()
    };
    let (gateway, backend) = gateway_with(cache, vec![server("s1")]);

    gateway.execute(&lookup("s1", 7)).await.unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    gateway.execute(&lookup("s1", 7)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let refreshed = gateway.execute(&lookup("s1", 7)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 2);
    assert!(refreshed.content[0].text.as_deref().unwrap().ends_with("(#2)"));
}

#[tokio::test]
async fn test_lru_eviction_follows_reads() {
    let cache = CacheConfig {
        max_keys: 2,
        ..Default::default()
    };
    let (gateway, backend) = gateway_with(cache, vec![server("s1")]);

    gateway.execute(&lookup("s1", 1)).await.unwrap();
    gateway.execute(&lookup("s1", 2)).await.unwrap();
    // Reading 1 makes 2 the least recently used
    gateway.execute(&lookup("s1", 1)).await.unwrap();
    gateway.execute(&lookup("s1", 3)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 3);

    gateway.execute(&lookup("s1", 1)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 3);
    gateway.execute(&lookup("s1", 2)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 4);

    assert!(gateway.cache_manager().get_global_stats().eviction_count >= 1);
}

#[tokio::test]
async fn test_failed_execution_not_cached() {
    let (gateway, backend) = gateway_with(CacheConfig::default(), vec![server("s1")]);
    backend.fail_execution.store(true, Ordering::SeqCst);

    let err = gateway.execute(&lookup("s1", 1)).await.unwrap_err();
    assert!(matches!(err, GatewayError::ExecutionFailed(ref msg) if msg == "upstream timeout"));
    assert_eq!(gateway.cache_manager().get_global_stats().total_keys, 0);

    backend.fail_execution.store(false, Ordering::SeqCst);
    gateway.execute(&lookup("s1", 1)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_server_is_not_found() {
    let (gateway, backend) = gateway_with(CacheConfig::default(), vec![server("s1")]);

    let err = gateway.execute(&lookup("ghost", 1)).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
    assert_eq!(backend.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalidate_by_pattern_scoped_to_server() {
    let (gateway, backend) =
        gateway_with(CacheConfig::default(), vec![server("serverX"), server("serverY")]);

    gateway.execute(&lookup("serverX", 1)).await.unwrap();
    gateway.execute(&lookup("serverX", 2)).await.unwrap();
    gateway.execute(&lookup("serverY", 1)).await.unwrap();

    assert_eq!(gateway.cache_manager().invalidate_by_pattern("serverX"), 2);
    assert_eq!(gateway.cache_manager().invalidate_by_pattern("serverZ"), 0);

    gateway.execute(&lookup("serverY", 1)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 3);
    gateway.execute(&lookup("serverX", 1)).await.unwrap();
    assert_eq!(backend.executions.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_remove_server_is_not_found_afterwards() {
    let (gateway, _) = gateway_with(CacheConfig::default(), vec![server("s1")]);
    let registry = gateway.registry();

    registry.remove_server("s1").await.unwrap();
    assert!(matches!(
        registry.get_server("s1").err(),
        Some(GatewayError::NotFound(_))
    ));
    assert!(matches!(
        registry.remove_server("s1").await,
        Err(GatewayError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_add_then_health_check_reports_definite_status() {
    let (gateway, _) = gateway_with(CacheConfig::default(), Vec::new());
    let registry = gateway.registry();

    registry.add_server(server("s1")).unwrap();
    let listed = registry.list_servers();
    assert_eq!(listed.len(), 1);
    assert!(matches!(
        listed[0].status,
        ConnectionStatus::Disconnected | ConnectionStatus::Connected
    ));

    wait_for_connect_outcome(&gateway, "s1").await;
    let statuses = registry.health_check().await;
    let status = &statuses["s1"];
    match status.status {
        ConnectionStatus::Connected => assert!(status.response_time_ms.is_some()),
        ConnectionStatus::Error => assert!(status.error.as_deref().is_some_and(|e| !e.is_empty())),
        ConnectionStatus::Disconnected => panic!("status still disconnected after connect"),
    }
}

#[tokio::test]
async fn test_refused_connection_surfaces_as_error_status() {
    let backend = Arc::new(Backend::default());
    backend.refuse_connect.store(true, Ordering::SeqCst);
    let gateway = ToolGateway::new(
        GatewayConfig::default(),
        scripted_factory(Arc::clone(&backend)),
    )
    .unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    gateway.registry().set_server_event_handler(channel_handler(tx));
    gateway.registry().add_server(server("s1")).unwrap();
    wait_for_connect_outcome(&gateway, "s1").await;

    let info = gateway.registry().get_server_info("s1").unwrap();
    assert_eq!(info.status, ConnectionStatus::Error);
    assert_eq!(info.error.as_deref(), Some("Connection failed: connection refused"));

    let added = rx.recv().await.unwrap();
    assert_eq!(added.kind, ServerEventKind::ServerAdded);
    let failed = rx.recv().await.unwrap();
    assert_eq!(failed.kind, ServerEventKind::ServerConnectionFailed);
    assert_eq!(failed.server_id, "s1");
    assert_eq!(failed.data["error"], json!("Connection failed: connection refused"));

    let report = gateway.check_health().await;
    assert_eq!(report.components["registry"].status, ComponentStatus::Error);
    assert_eq!(report.overall, ComponentStatus::Error);
}

#[tokio::test]
async fn test_started_gateway_reports_healthy() {
    let (gateway, _) = gateway_with(CacheConfig::default(), vec![server("s1")]);
    gateway.start().unwrap();
    wait_for_connect_outcome(&gateway, "s1").await;

    let report = gateway.check_health().await;
    assert_eq!(report.components["registry"].status, ComponentStatus::Healthy);
    assert_eq!(report.components["cache"].status, ComponentStatus::Healthy);
    assert_eq!(report.components["metrics"].status, ComponentStatus::Healthy);
    assert!(report.is_healthy());

    gateway.shutdown().await;
    assert!(gateway.registry().is_empty());
    assert!(!gateway.cache_manager().is_cleanup_running());
}

#[tokio::test]
async fn test_unstarted_cache_cleanup_is_degraded() {
    let (gateway, _) = gateway_with(CacheConfig::default(), vec![server("s1")]);
    wait_for_connect_outcome(&gateway, "s1").await;

    let report = gateway.check_health().await;
    assert_eq!(report.components["cache"].status, ComponentStatus::Degraded);
    assert_eq!(report.overall, ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_gateway_from_yaml() {
    let yaml = r#"
health_check_interval: 15
servers:
  - id: "notes"
    name: "Notes"
    client_type: "scripted"
    enabled: true
  - id: "archive"
    name: "Archive"
    client_type: "scripted"
cache:
  default_ttl: 120
  per_tool_ttl:
    lookup: 10
"#;
    let config = GatewayConfig::from_yaml_str(yaml).unwrap();
    let backend = Arc::new(Backend::default());
    let gateway = ToolGateway::new(config, scripted_factory(backend)).unwrap();

    let servers = gateway.registry().list_servers();
    let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["archive", "notes"]);
    assert!(!servers[0].enabled);
    assert_eq!(
        gateway.registry().health_check_interval(),
        Duration::from_secs(15)
    );
    assert_eq!(
        gateway.cache_manager().ttl_for_tool("lookup"),
        Duration::from_secs(10)
    );
}

#[tokio::test]
async fn test_unsupported_client_type_fails_fast() {
    let config = GatewayConfig {
        servers: vec![ServerConfig::new("s1", "websocket")],
        ..Default::default()
    };
    let err = ToolGateway::new(config, scripted_factory(Arc::new(Backend::default())))
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::UnsupportedClientType(ref t) if t == "websocket"));
    assert!(err.is_structural());
}
