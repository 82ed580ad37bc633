//! Per-user fan-out of [`ClientEvent`]s to live client connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::ClientEvent;

const DEFAULT_BUFFER: usize = 256;

/// One live connection's share of the fan-out.
pub struct Subscription {
    pub conn_id: String,
    pub user_id: String,
    /// Serialized events, ready to be written to the socket.
    pub events: mpsc::Receiver<Arc<String>>,
}

/// Maps user ids to the outbound queues of their open connections.
pub struct Fanout {
    users: RwLock<HashMap<String, HashMap<String, mpsc::Sender<Arc<String>>>>>,
    buffer: usize,
}

impl Fanout {
    pub fn new(buffer: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Adds a connection for an already authenticated user.
    pub async fn register(&self, user_id: &str) -> Subscription {
        let conn_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut users = self.users.write().await;
        let conns = users.entry(user_id.to_string()).or_default();
        conns.insert(conn_id.clone(), tx);
        debug!(user_id, conn_id = %conn_id, connections = conns.len(), "Client connected");

        Subscription {
            conn_id,
            user_id: user_id.to_string(),
            events: rx,
        }
    }

    /// Removes a connection from whichever user owns it. Returns that user.
    pub async fn unregister(&self, conn_id: &str) -> Option<String> {
        let mut users = self.users.write().await;
        let user_id = users
            .iter()
            .find(|(_, conns)| conns.contains_key(conn_id))
            .map(|(user_id, _)| user_id.clone())?;

        if let Some(conns) = users.get_mut(&user_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                users.remove(&user_id);
            }
        }

        debug!(user_id = %user_id, conn_id, "Client disconnected");
        Some(user_id)
    }

    /// Delivers `event` to every connection of `user_id`. Returns how many
    /// queues accepted it.
    pub async fn emit(&self, user_id: &str, event: ClientEvent) -> usize {
        let users = self.users.read().await;
        let Some(conns) = users.get(user_id) else {
            return 0;
        };

        let json = match serde_json::to_string(&event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to serialize client event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (conn_id, tx) in conns {
            match tx.try_send(Arc::clone(&json)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(user_id, conn_id = %conn_id, event = event.name(), "Client queue full, event dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(user_id, conn_id = %conn_id, "Client queue closed")
                }
            }
        }

        debug!(
            user_id,
            event = event.name(),
            instance_id = event.instance_id(),
            delivered,
            "Emitted client event"
        );
        delivered
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.users.read().await.get(user_id).map_or(0, HashMap::len)
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
