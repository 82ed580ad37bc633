use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use manda_core::ProtocolConnection;

use crate::credentials::KeyStore;
use crate::records::RecordWriter;
use crate::error::{Result, WorkerError};

/// Runtime binding of an instance to its live protocol connection.
pub struct SessionHandle {
    pub instance_id: String,
    pub user_id: String,
    /// Distinguishes this session from earlier and later ones of the same instance.
    pub generation: Uuid,
    pub connection: Arc<dyn ProtocolConnection>,
    pub keys: Arc<KeyStore>,
    pub records: RecordWriter,
    pump: Mutex<Option<JoinHandle<()>>>,
    attempts: AtomicU32,
    released: AtomicBool,
}

impl SessionHandle {
    pub fn new(
        instance_id: &str,
        user_id: &str,
        connection: Arc<dyn ProtocolConnection>,
        keys: Arc<KeyStore>,
        records: RecordWriter,
        attempts: u32,
    ) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            user_id: user_id.to_string(),
            generation: Uuid::new_v4(),
            connection,
            keys,
            records,
            pump: Mutex::new(None),
            attempts: AtomicU32::new(attempts),
            released: AtomicBool::new(false),
        }
    }

    /// Reconnect attempts made since the instance last opened.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub(crate) fn attach_pump(&self, pump: JoinHandle<()>) {
        if let Ok(mut slot) = self.pump.lock() {
            *slot = Some(pump);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stops the event pump, closes the connection and drains pending key
    /// and record writes. Runs once; later calls return immediately.
    ///
    /// Must not be called from the pump task itself.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let pump = self.pump.lock().ok().and_then(|mut slot| slot.take());
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }

        if let Err(e) = self.connection.close().await {
            warn!(instance_id = %self.instance_id, error = %e, "Failed to close connection");
        }

        self.records.flush().await;
        self.keys.close().await;
        debug!(instance_id = %self.instance_id, generation = %self.generation, "Session released");
    }
}

/// Live sessions by instance id. At most one per instance.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the instance already has a session.
    pub async fn register(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&handle.instance_id) {
            return Err(WorkerError::AlreadyActive(handle.instance_id.clone()));
        }
        sessions.insert(handle.instance_id.clone(), handle);
        Ok(())
    }

    /// Installs `handle`, returning the session it supersedes.
    pub async fn replace(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        self.sessions
            .write()
            .await
            .insert(handle.instance_id.clone(), handle)
    }

    pub async fn get(&self, instance_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(instance_id).cloned()
    }

    /// The session of `instance_id`, only if it is still `generation`.
    pub async fn current(&self, instance_id: &str, generation: Uuid) -> Option<Arc<SessionHandle>> {
        self.get(instance_id)
            .await
            .filter(|handle| handle.generation == generation)
    }

    pub async fn contains(&self, instance_id: &str) -> bool {
        self.sessions.read().await.contains_key(instance_id)
    }

    pub async fn remove(&self, instance_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(instance_id)
    }

    /// Removes the session only if it is still `generation`.
    pub async fn remove_generation(
        &self,
        instance_id: &str,
        generation: Uuid,
    ) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(instance_id)?.generation != generation {
            return None;
        }
        sessions.remove(instance_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn instance_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
