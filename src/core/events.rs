//! Server lifecycle events delivered to a single subscriber.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEventKind {
    ServerAdded,
    ServerRemoved,
    ServerConnected,
    ServerConnectionFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: ServerEventKind,
    pub server_id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    pub fn new(kind: ServerEventKind, server_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            server_id: server_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Callback invoked outside every registry lock.
pub type ServerEventHandler = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// Adapt a bounded channel into a handler that never blocks the emitter.
///
/// Events that do not fit are dropped with a warning.
pub fn channel_handler(sender: mpsc::Sender<ServerEvent>) -> ServerEventHandler {
    Arc::new(move |event: ServerEvent| {
        if let Err(err) = sender.try_send(event) {
            match err {
                mpsc::error::TrySendError::Full(event) => warn!(
                    server_id = %event.server_id,
                    kind = ?event.kind,
                    "Event channel full, dropping server event"
                ),
                mpsc::error::TrySendError::Closed(event) => warn!(
                    server_id = %event.server_id,
                    kind = ?event.kind,
                    "Event channel closed, dropping server event"
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_channel_handler_delivers_and_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handler = channel_handler(tx);

        handler(ServerEvent::new(ServerEventKind::ServerAdded, "s1", json!({})));
        handler(ServerEvent::new(ServerEventKind::ServerRemoved, "s1", json!({})));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ServerEventKind::ServerAdded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serialization() {
        let event = ServerEvent::new(
            ServerEventKind::ServerConnectionFailed,
            "s2",
            json!({"error": "refused"}),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "server_connection_failed");
        assert_eq!(value["server_id"], "s2");
        assert_eq!(value["data"]["error"], "refused");
    }
}
