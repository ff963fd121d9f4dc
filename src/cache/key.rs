//! Deterministic cache keys for tool executions.

use std::fmt;

use serde_json::{Map, Value};

use crate::core::types::ToolExecution;

/// Hex characters of the argument digest kept in the key.
const HASH_LEN: usize = 16;

/// Identity of one cached result: (tool, server, canonical arguments).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tool_name: String,
    pub server_name: String,
    pub hash: String,
}

impl CacheKey {
    /// The digest covers server and tool as well as the arguments, so the key
    /// text stays unique even when names contain the `:` separator.
    pub fn new(tool_name: &str, server_name: &str, arguments: &Map<String, Value>) -> Self {
        let canonical = canonicalize_arguments(arguments).to_string();

        let mut hasher = blake3::Hasher::new();
        for part in [server_name, tool_name] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize().to_hex();

        Self {
            tool_name: tool_name.to_string(),
            server_name: server_name.to_string(),
            hash: digest.as_str()[..HASH_LEN].to_string(),
        }
    }

    pub fn for_execution(execution: &ToolExecution) -> Self {
        Self::new(
            &execution.tool_name,
            &execution.server_name,
            &execution.arguments,
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.server_name, self.tool_name, self.hash)
    }
}

/// Normalize top-level argument names and order every object's keys.
///
/// Names are trimmed and lower-cased at the top level only; nested values are
/// data and keep their spelling.
pub fn canonicalize_arguments(arguments: &Map<String, Value>) -> Value {
    let mut entries: Vec<(String, Value)> = arguments
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), canonicalize_value(v)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Object(entries.into_iter().collect())
}

fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize_value(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}
