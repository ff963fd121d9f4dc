//! Server connection registry.
//!
//! Owns configured servers, their live clients and per-server health. Connects
//! run as detached tasks so a slow backend never blocks registration of, or calls
//! to, another one. Health and discovery loops are optional and take a caller
//! cancellation token.
//!
//! Each server lives in one `DashMap` entry, so config, client and health are
//! inserted and removed together. No registry lock is held across an await or
//! while user callbacks run.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    client::{ToolClient, ToolExecutor},
    config::{GatewayConfig, ServerConfig},
    discovery::{PathDiscovery, ServerDiscovery},
    events::{ServerEvent, ServerEventHandler, ServerEventKind},
    factory::ClientFactory,
    schedule::PeriodicTask,
    types::{
        ConnectionStatus, HealthStatus, ServerCapabilities, ServerInfo, ToolExecution, ToolResult,
    },
};
use crate::error::{GatewayError, GatewayResult};

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCOVERY_PREFIX: &str = "mcp-server-";

struct ServerEntry {
    config: Arc<ServerConfig>,
    client: Arc<dyn ToolClient>,
    health: HealthStatus,
    /// Distinguishes this registration from a later one reusing the same id.
    generation: u64,
}

struct HealthLoop {
    task: PeriodicTask,
    parent: CancellationToken,
}

pub struct ServerRegistry {
    servers: DashMap<String, ServerEntry>,
    factory: Arc<ClientFactory>,
    discovery: Arc<dyn ServerDiscovery>,
    event_handler: RwLock<Option<ServerEventHandler>>,
    next_generation: AtomicU64,
    health_interval: Mutex<Duration>,
    health_loop: Mutex<Option<HealthLoop>>,
    discovery_loop: Mutex<Option<PeriodicTask>>,
    removal_timeout: Duration,
    /// Cancels in-flight connect tasks on shutdown.
    shutdown: CancellationToken,
}

impl ServerRegistry {
    pub fn new(factory: Arc<ClientFactory>) -> Self {
        Self {
            servers: DashMap::new(),
            factory,
            discovery: Arc::new(PathDiscovery::from_env(DEFAULT_DISCOVERY_PREFIX)),
            event_handler: RwLock::new(None),
            next_generation: AtomicU64::new(1),
            health_interval: Mutex::new(DEFAULT_HEALTH_CHECK_INTERVAL),
            health_loop: Mutex::new(None),
            discovery_loop: Mutex::new(None),
            removal_timeout: DEFAULT_REMOVAL_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ServerDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = timeout;
        self
    }

    /// Build a registry from configuration and register every configured server.
    ///
    /// Must be called inside a tokio runtime: enabled servers start connecting
    /// immediately.
    pub fn from_config(
        config: &GatewayConfig,
        factory: Arc<ClientFactory>,
    ) -> GatewayResult<Arc<Self>> {
        config.validate()?;

        let discovery: Arc<dyn ServerDiscovery> = if config.discovery.search_paths.is_empty() {
            Arc::new(PathDiscovery::from_env(
                config.discovery.executable_prefix.clone(),
            ))
        } else {
            Arc::new(PathDiscovery::new(
                config.discovery.search_paths.clone(),
                config.discovery.executable_prefix.clone(),
            ))
        };

        let registry = Arc::new(Self::new(factory).with_discovery(discovery));
        *registry.health_interval.lock() = config.health_check_interval_duration();

        for server in &config.servers {
            registry.add_server(server.clone())?;
        }
        Ok(registry)
    }

    // ========================================================================
    // Server CRUD
    // ========================================================================

    /// Register a server and, if enabled, start connecting in the background.
    pub fn add_server(self: &Arc<Self>, config: ServerConfig) -> GatewayResult<()> {
        if self.servers.contains_key(&config.id) {
            return Err(GatewayError::AlreadyExists(config.id));
        }

        let client = self.factory.create_client(&config.client_type, &config)?;
        let config = Arc::new(config);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.servers.entry(config.id.clone()) {
            Entry::Occupied(_) => return Err(GatewayError::AlreadyExists(config.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(ServerEntry {
                    config: Arc::clone(&config),
                    client: Arc::clone(&client),
                    health: HealthStatus::not_connected(),
                    generation,
                });
            }
        }

        info!(
            server_id = %config.id,
            client_type = %config.client_type,
            enabled = config.enabled,
            "Server added"
        );
        self.emit(
            ServerEventKind::ServerAdded,
            &config.id,
            json!({
                "name": config.name,
                "type": config.server_type,
                "client_type": config.client_type,
                "enabled": config.enabled,
            }),
        );

        if config.enabled {
            self.spawn_connect(config, client, generation);
        }
        Ok(())
    }

    /// Detach a server and disconnect its client.
    ///
    /// The entry leaves the table before the disconnect starts, so a failed or
    /// slow disconnect never leaves a half-removed server behind.
    pub async fn remove_server(&self, id: &str) -> GatewayResult<()> {
        let (_, entry) = self
            .servers
            .remove(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;

        match tokio::time::timeout(self.removal_timeout, entry.client.disconnect()).await {
            Ok(Ok(())) => debug!(server_id = %id, "Client disconnected"),
            Ok(Err(e)) => warn!(server_id = %id, error = %e, "Disconnect failed during removal"),
            Err(_) => warn!(
                server_id = %id,
                timeout_ms = self.removal_timeout.as_millis() as u64,
                "Disconnect timed out during removal"
            ),
        }

        info!(server_id = %id, "Server removed");
        self.emit(ServerEventKind::ServerRemoved, id, json!({}));
        Ok(())
    }

    /// Live client for `id`.
    pub fn get_server(&self, id: &str) -> GatewayResult<Arc<dyn ToolClient>> {
        self.servers
            .get(id)
            .map(|entry| Arc::clone(&entry.client))
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    pub fn get_server_info(&self, id: &str) -> GatewayResult<ServerInfo> {
        self.servers
            .get(id)
            .map(|entry| server_info(&entry))
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    /// Snapshot of every server, sorted by id.
    pub fn list_servers(&self) -> Vec<ServerInfo> {
        let mut servers: Vec<ServerInfo> = self
            .servers
            .iter()
            .map(|entry| server_info(entry.value()))
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    pub fn health_status(&self, id: &str) -> Option<HealthStatus> {
        self.servers.get(id).map(|entry| entry.health.clone())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Replace the single event subscriber.
    pub fn set_server_event_handler(&self, handler: ServerEventHandler) {
        *self.event_handler.write() = Some(handler);
    }

    pub fn clear_server_event_handler(&self) {
        *self.event_handler.write() = None;
    }

    fn emit(&self, kind: ServerEventKind, server_id: &str, data: serde_json::Value) {
        // Clone out so the handler runs without our lock
        let handler = self.event_handler.read().clone();
        if let Some(handler) = handler {
            handler(ServerEvent::new(kind, server_id, data));
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    fn spawn_connect(
        self: &Arc<Self>,
        config: Arc<ServerConfig>,
        client: Arc<dyn ToolClient>,
        generation: u64,
    ) {
        let registry = Arc::downgrade(self);
        let shutdown = self.shutdown.child_token();

        tokio::spawn(async move {
            debug!(server_id = %config.id, "Connecting");
            let started = Instant::now();
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return,
                outcome = tokio::time::timeout(config.timeout_duration(), client.connect(&config)) => outcome,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let result = outcome.unwrap_or_else(|_| {
                Err(GatewayError::Timeout(format!(
                    "connect to '{}' after {}s",
                    config.id, config.timeout
                )))
            });

            let Some(registry) = registry.upgrade() else {
                return;
            };
            if !registry.finish_connect(&config.id, generation, &result, elapsed_ms) {
                // Removed while connecting; nobody else will close this client
                if result.is_ok() {
                    if let Err(e) = client.disconnect().await {
                        debug!(server_id = %config.id, error = %e, "Disconnect of orphaned client failed");
                    }
                }
            }
        });
    }

    /// Record a connect outcome. Returns false if the registration is gone.
    fn finish_connect(
        &self,
        id: &str,
        generation: u64,
        result: &GatewayResult<()>,
        elapsed_ms: u64,
    ) -> bool {
        let status = match result {
            Ok(()) => HealthStatus::connected(elapsed_ms),
            Err(e) => HealthStatus::failed(e.to_string()),
        };

        {
            let Some(mut entry) = self.servers.get_mut(id) else {
                return false;
            };
            if entry.generation != generation {
                return false;
            }
            entry.health = status;
        }

        match result {
            Ok(()) => {
                info!(server_id = %id, response_time_ms = elapsed_ms, "Server connected");
                self.emit(
                    ServerEventKind::ServerConnected,
                    id,
                    json!({ "error": null, "response_time_ms": elapsed_ms }),
                );
            }
            Err(e) => {
                error!(server_id = %id, error = %e, "Server connection failed");
                self.emit(
                    ServerEventKind::ServerConnectionFailed,
                    id,
                    json!({ "error": e.to_string(), "response_time_ms": elapsed_ms }),
                );
            }
        }
        true
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Ping every tracked client concurrently and persist the outcome.
    ///
    /// Clients are re-pinged, never recreated, so a disabled server that was
    /// never connected reports `error`.
    pub async fn health_check(&self) -> HashMap<String, HealthStatus> {
        let targets: Vec<(String, u64, Arc<dyn ToolClient>, Duration)> = self
            .servers
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.generation,
                    Arc::clone(&entry.client),
                    entry.config.timeout_duration(),
                )
            })
            .collect();

        let pings = targets
            .into_iter()
            .map(|(id, generation, client, timeout)| async move {
                let status = ping_with_timeout(client.as_ref(), timeout).await;
                (id, generation, status)
            });

        for (id, generation, status) in join_all(pings).await {
            if let Some(mut entry) = self.servers.get_mut(&id) {
                if entry.generation != generation {
                    continue;
                }
                if entry.health.status != status.status {
                    info!(
                        server_id = %id,
                        from = %entry.health.status,
                        to = %status.status,
                        "Server health changed"
                    );
                }
                entry.health = status;
            }
        }

        self.servers
            .iter()
            .map(|entry| (entry.key().clone(), entry.health.clone()))
            .collect()
    }

    pub fn health_check_interval(&self) -> Duration {
        *self.health_interval.lock()
    }

    /// Change the health cadence, restarting the loop if it is running.
    pub fn set_health_check_interval(self: &Arc<Self>, interval: Duration) -> GatewayResult<()> {
        if interval.is_zero() {
            return Err(GatewayError::Config(
                "health check interval must be > 0".into(),
            ));
        }
        *self.health_interval.lock() = interval;

        let mut slot = self.health_loop.lock();
        if let Some(current) = slot.take() {
            current.task.stop();
            info!(interval_ms = interval.as_millis() as u64, "Restarting health checks");
            *slot = Some(self.spawn_health_loop(current.parent, interval));
        }
        Ok(())
    }

    pub fn start_health_checking(self: &Arc<Self>, parent: &CancellationToken) -> GatewayResult<()> {
        let mut slot = self.health_loop.lock();
        if slot.as_ref().is_some_and(|l| l.task.is_alive()) {
            return Err(GatewayError::AlreadyRunning("health checking".into()));
        }
        let interval = *self.health_interval.lock();
        *slot = Some(self.spawn_health_loop(parent.clone(), interval));
        Ok(())
    }

    /// Returns whether a loop was running.
    pub fn stop_health_checking(&self) -> bool {
        match self.health_loop.lock().take() {
            Some(current) => {
                current.task.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_health_checking(&self) -> bool {
        self.health_loop
            .lock()
            .as_ref()
            .is_some_and(|l| l.task.is_alive())
    }

    fn spawn_health_loop(self: &Arc<Self>, parent: CancellationToken, interval: Duration) -> HealthLoop {
        let registry: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("health-check", interval, &parent, move || {
            let registry = registry.clone();
            async move {
                if let Some(registry) = registry.upgrade() {
                    let statuses = registry.health_check().await;
                    debug!(servers = statuses.len(), "Health sweep complete");
                }
            }
        });
        HealthLoop { task, parent }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Candidate configs from the discovery source. Nothing is registered.
    pub async fn discover_servers(&self) -> GatewayResult<Vec<ServerConfig>> {
        let mut found = self.discovery.discover().await?;
        for config in &mut found {
            config.enabled = false;
        }
        Ok(found)
    }

    /// One discovery pass: register every candidate not already tracked.
    pub async fn run_discovery(self: &Arc<Self>) -> GatewayResult<usize> {
        let found = self.discover_servers().await?;
        let mut added = 0;
        for config in found {
            if self.servers.contains_key(&config.id) {
                continue;
            }
            let id = config.id.clone();
            match self.add_server(config) {
                Ok(()) => {
                    info!(server_id = %id, "Discovered server registered");
                    added += 1;
                }
                // Raced with a manual registration
                Err(GatewayError::AlreadyExists(_)) => {}
                Err(e) => warn!(server_id = %id, error = %e, "Failed to register discovered server"),
            }
        }
        Ok(added)
    }

    pub fn start_auto_discovery(
        self: &Arc<Self>,
        parent: &CancellationToken,
        interval: Duration,
    ) -> GatewayResult<()> {
        if interval.is_zero() {
            return Err(GatewayError::Config("discovery interval must be > 0".into()));
        }

        let mut slot = self.discovery_loop.lock();
        if slot.as_ref().is_some_and(|task| task.is_alive()) {
            return Err(GatewayError::AlreadyRunning("auto-discovery".into()));
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        *slot = Some(PeriodicTask::spawn(
            "auto-discovery",
            interval,
            parent,
            move || {
                let registry = registry.clone();
                async move {
                    let Some(registry) = registry.upgrade() else {
                        return;
                    };
                    if let Err(e) = registry.run_discovery().await {
                        warn!(error = %e, "Discovery pass failed");
                    }
                }
            },
        ));
        Ok(())
    }

    pub fn stop_auto_discovery(&self) -> GatewayResult<()> {
        match self.discovery_loop.lock().take() {
            Some(task) if task.is_alive() => {
                task.stop();
                Ok(())
            }
            _ => Err(GatewayError::NotRunning("auto-discovery".into())),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop every loop and connect task, then disconnect and drop all servers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(current) = self.health_loop.lock().take() {
            current.task.stop();
        }
        if let Some(task) = self.discovery_loop.lock().take() {
            task.stop();
        }

        let ids: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        let timeout = self.removal_timeout;
        let disconnects = ids.into_iter().filter_map(|id| {
            let (_, entry) = self.servers.remove(&id)?;
            Some(async move {
                match tokio::time::timeout(timeout, entry.client.disconnect()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(server_id = %id, error = %e, "Disconnect failed during shutdown"),
                    Err(_) => warn!(server_id = %id, "Disconnect timed out during shutdown"),
                }
            })
        });
        join_all(disconnects).await;
        info!("Server registry shut down");
    }
}

#[async_trait]
impl ToolExecutor for ServerRegistry {
    async fn execute_tool(&self, execution: &ToolExecution) -> GatewayResult<ToolResult> {
        let client = self.get_server(&execution.server_name)?;
        let started = Instant::now();
        let mut result = client.execute_tool(execution).await?;
        if result.duration_ms == 0 {
            result.duration_ms = started.elapsed().as_millis() as u64;
        }
        Ok(result)
    }
}

async fn ping_with_timeout(client: &dyn ToolClient, timeout: Duration) -> HealthStatus {
    let started = Instant::now();
    match tokio::time::timeout(timeout, client.ping()).await {
        Ok(Ok(())) => HealthStatus::connected(started.elapsed().as_millis() as u64),
        Ok(Err(e)) => HealthStatus::failed(e.to_string()),
        Err(_) => HealthStatus::failed(format!("ping timed out after {}ms", timeout.as_millis())),
    }
}

fn server_info(entry: &ServerEntry) -> ServerInfo {
    let config = &entry.config;
    let mut metadata = BTreeMap::new();
    metadata.insert("timeout_secs".to_string(), config.timeout.to_string());
    if !config.tags.is_empty() {
        metadata.insert("tags".to_string(), config.tags.join(","));
    }

    ServerInfo {
        id: config.id.clone(),
        name: config.name.clone(),
        server_type: config.server_type.clone(),
        client_type: config.client_type.clone(),
        enabled: config.enabled,
        status: entry.health.status,
        last_seen: entry.health.last_check,
        response_time_ms: entry
            .health
            .response_time_ms
            .filter(|_| entry.health.status == ConnectionStatus::Connected),
        error: entry.health.error.clone(),
        capabilities: ServerCapabilities::from_declared(&config.capabilities),
        metadata,
    }
}
