//! Named constructors for pluggable tool clients.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use super::{client::ToolClient, config::ServerConfig};
use crate::{
    client::RmcpClient,
    error::{GatewayError, GatewayResult},
};

pub type ClientConstructor =
    Arc<dyn Fn(&ServerConfig) -> GatewayResult<Arc<dyn ToolClient>> + Send + Sync>;

/// Client type used when a config does not name one.
pub const DEFAULT_CLIENT_TYPE: &str = "rmcp";

pub struct ClientFactory {
    constructors: RwLock<HashMap<String, ClientConstructor>>,
}

impl ClientFactory {
    /// Empty factory with no registered client types.
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Factory with the built-in `rmcp` bridge registered.
    pub fn with_defaults() -> Self {
        let factory = Self::new();
        factory.register_client(DEFAULT_CLIENT_TYPE, |config: &ServerConfig| {
            let client: Arc<dyn ToolClient> = Arc::new(RmcpClient::new(config.id.clone()));
            Ok(client)
        });
        factory
    }

    /// Register a constructor. A later registration for the same type replaces
    /// the earlier one.
    pub fn register_client<F>(&self, client_type: impl Into<String>, constructor: F)
    where
        F: Fn(&ServerConfig) -> GatewayResult<Arc<dyn ToolClient>> + Send + Sync + 'static,
    {
        let client_type = client_type.into();
        let replaced = self
            .constructors
            .write()
            .insert(client_type.clone(), Arc::new(constructor))
            .is_some();
        debug!(client_type = %client_type, replaced, "Registered client constructor");
    }

    /// Build a client for `config`. Constructor errors are returned unchanged.
    pub fn create_client(
        &self,
        client_type: &str,
        config: &ServerConfig,
    ) -> GatewayResult<Arc<dyn ToolClient>> {
        // Clone the constructor out so user code never runs under our lock
        let constructor = self
            .constructors
            .read()
            .get(client_type)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedClientType(client_type.to_string()))?;
        constructor(config)
    }

    /// Registered client types, sorted.
    pub fn supported_clients(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn default_client(&self) -> &'static str {
        DEFAULT_CLIENT_TYPE
    }

    pub fn is_supported(&self, client_type: &str) -> bool {
        self.constructors.read().contains_key(client_type)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}
