//! Candidate server discovery.
//!
//! Discovery only proposes configs. Everything it returns is disabled so that
//! nothing is spawned until an operator turns it on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{config::ServerConfig, factory::DEFAULT_CLIENT_TYPE};
use crate::error::GatewayResult;

#[async_trait]
pub trait ServerDiscovery: Send + Sync {
    async fn discover(&self) -> GatewayResult<Vec<ServerConfig>>;
}

/// Scans directories for executables whose file name starts with a prefix.
#[derive(Debug, Clone)]
pub struct PathDiscovery {
    dirs: Vec<PathBuf>,
    prefix: String,
}

impl PathDiscovery {
    pub fn new(dirs: Vec<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dirs,
            prefix: prefix.into(),
        }
    }

    /// Scan every `$PATH` entry.
    pub fn from_env(prefix: impl Into<String>) -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        Self::new(dirs, prefix)
    }

    async fn scan_dir(&self, dir: &Path, found: &mut Vec<ServerConfig>) {
        // Missing or unreadable PATH entries are common and not an error
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping discovery directory");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(&self.prefix) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() || !is_executable(&metadata) {
                continue;
            }
            if found.iter().any(|c| c.name == file_name) {
                // Earlier PATH entries shadow later ones
                continue;
            }
            found.push(stdio_candidate(&file_name, &entry.path()));
        }
    }
}

#[async_trait]
impl ServerDiscovery for PathDiscovery {
    async fn discover(&self) -> GatewayResult<Vec<ServerConfig>> {
        let mut found = Vec::new();
        for dir in &self.dirs {
            self.scan_dir(dir, &mut found).await;
        }
        debug!(count = found.len(), "Path discovery finished");
        Ok(found)
    }
}

/// Fixed candidate list, handy for embedding a static catalogue.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    candidates: Vec<ServerConfig>,
}

impl StaticDiscovery {
    pub fn new(candidates: Vec<ServerConfig>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl ServerDiscovery for StaticDiscovery {
    async fn discover(&self) -> GatewayResult<Vec<ServerConfig>> {
        Ok(self
            .candidates
            .iter()
            .cloned()
            .map(|config| config.enabled(false))
            .collect())
    }
}

fn stdio_candidate(file_name: &str, path: &Path) -> ServerConfig {
    let mut connection = Map::new();
    connection.insert("transport".to_string(), json!("stdio"));
    connection.insert(
        "command".to_string(),
        Value::String(path.to_string_lossy().into_owned()),
    );

    ServerConfig {
        id: format!("discovered-{}", file_name),
        name: file_name.to_string(),
        server_type: "local".to_string(),
        client_type: DEFAULT_CLIENT_TYPE.to_string(),
        connection,
        enabled: false,
        tags: vec!["discovered".to_string()],
        ..ServerConfig::new(file_name, DEFAULT_CLIENT_TYPE)
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}
