use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use manda_core::{Connector, KeyProvider, OpenRequest, ProtocolEvent, ProtocolVersion, jid};
use manda_db::{InstanceStatus, InstanceUpdate, MandaDb};

use crate::credentials::{CredentialStore, LoadedCredentials};
use crate::error::{Result, WorkerError};
use crate::events::{ClientEvent, ConnectionStatus};
use crate::fanout::Fanout;
use crate::policy::ReconnectPolicy;
use crate::records::RecordWriter;
use crate::registry::{SessionHandle, SessionRegistry};

/// Drives the connection lifecycle of every instance.
///
/// `create`, `connect`, `disconnect` and background reconnects are
/// serialized per instance id; different instances never wait on each other.
pub struct InstanceManager {
    pub(crate) db: Arc<MandaDb>,
    connector: Arc<dyn Connector>,
    credentials: CredentialStore,
    registry: SessionRegistry,
    pub(crate) fanout: Arc<Fanout>,
    policy: ReconnectPolicy,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InstanceManager {
    pub fn new(
        db: Arc<MandaDb>,
        connector: Arc<dyn Connector>,
        fanout: Arc<Fanout>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            credentials: CredentialStore::new(Arc::clone(&db)),
            db,
            connector,
            registry: SessionRegistry::new(),
            fanout,
            policy,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn fanout(&self) -> &Arc<Fanout> {
        &self.fanout
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    fn instance_lock(&self, instance_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(instance_id.to_string()).or_default())
    }

    pub(crate) fn forget(&self, instance_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(instance_id);
    }

    /// Opens a session for an instance that has none.
    pub async fn create(self: &Arc<Self>, instance_id: &str, owner_id: &str) -> Result<()> {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;
        self.create_locked(instance_id, owner_id).await
    }

    /// Like `create`, but replaces a live session instead of failing.
    pub async fn connect(self: &Arc<Self>, instance_id: &str, owner_id: &str) -> Result<()> {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        if self.registry.contains(instance_id).await {
            info!(instance_id, "Instance already live, starting over");
            self.disconnect_locked(instance_id, owner_id).await;
        }

        self.create_locked(instance_id, owner_id).await
    }

    /// Logs out, forgets credentials and marks the instance disconnected.
    /// Safe to call on an instance without a session.
    pub async fn disconnect(&self, instance_id: &str, owner_id: &str) {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;
        self.disconnect_locked(instance_id, owner_id).await;
    }

    /// Sends a text message, returning the protocol message id.
    pub async fn send_message(&self, instance_id: &str, to: &str, text: &str) -> Result<String> {
        let handle = self
            .registry
            .get(instance_id)
            .await
            .filter(|handle| !handle.is_released())
            .ok_or_else(|| WorkerError::NotConnected(instance_id.to_string()))?;

        let jid = jid::to_jid(to);
        match handle.connection.send_text(&jid, text).await {
            Ok(Some(message_id)) => {
                debug!(instance_id, to = %jid, message_id = %message_id, "Message sent");
                Ok(message_id)
            }
            Ok(None) => Err(WorkerError::DeliveryFailed(
                "protocol gave no confirmation".to_string(),
            )),
            Err(e) => {
                warn!(instance_id, to = %jid, error = %e, "Send failed");
                Err(WorkerError::DeliveryFailed(e.to_string()))
            }
        }
    }

    /// Reopens every instance last seen connected or connecting. Failures are
    /// logged and do not stop the others. Returns how many were opened.
    pub async fn restore(self: &Arc<Self>) -> Result<usize> {
        let instances = self
            .db
            .list_instances_by_status(&[InstanceStatus::Connected, InstanceStatus::Connecting])
            .await?;

        if instances.is_empty() {
            info!("No sessions to restore");
            return Ok(0);
        }

        let attempts = instances.iter().map(|instance| async move {
            match self.create(&instance.id, &instance.user_id).await {
                Ok(()) => true,
                Err(WorkerError::AlreadyActive(_)) => false,
                Err(e) => {
                    error!(instance_id = %instance.id, error = %e, "Failed to restore session");
                    false
                }
            }
        });

        let restored = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        info!(restored, total = instances.len(), "Sessions restored");
        Ok(restored)
    }

    /// Releases every live session without logging out. Persisted statuses
    /// are kept so the next start can restore them.
    pub async fn shutdown(&self) {
        for instance_id in self.registry.instance_ids().await {
            let lock = self.instance_lock(&instance_id);
            let _guard = lock.lock().await;
            if let Some(handle) = self.registry.remove(&instance_id).await {
                handle.release().await;
            }
        }
        info!("All sessions released");
    }

    async fn create_locked(self: &Arc<Self>, instance_id: &str, owner_id: &str) -> Result<()> {
        if self.registry.contains(instance_id).await {
            return Err(WorkerError::AlreadyActive(instance_id.to_string()));
        }

        let (handle, events) = match self.open_session(instance_id, owner_id, 0).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(instance_id, error = %e, "Failed to open session");
                self.update_instance(instance_id, InstanceUpdate::status(InstanceStatus::Error))
                    .await;
                self.fanout
                    .emit(owner_id, ClientEvent::status(instance_id, ConnectionStatus::Error))
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.registry.register(Arc::clone(&handle)).await {
            handle.release().await;
            return Err(e);
        }

        self.start(handle, events).await;
        Ok(())
    }

    async fn open_session(
        &self,
        instance_id: &str,
        owner_id: &str,
        attempts: u32,
    ) -> Result<(Arc<SessionHandle>, mpsc::Receiver<ProtocolEvent>)> {
        let LoadedCredentials { identity, keys } = self.credentials.load(instance_id).await;

        let version = match self.connector.latest_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!(instance_id, error = %e, fallback = %ProtocolVersion::FALLBACK, "Could not fetch latest protocol version");
                ProtocolVersion::FALLBACK
            }
        };

        let provider: Arc<dyn KeyProvider> = keys.clone();
        let opened = self
            .connector
            .open(OpenRequest {
                instance_id: instance_id.to_string(),
                version,
                credentials: identity,
                keys: provider,
            })
            .await;

        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                keys.close().await;
                return Err(e.into());
            }
        };

        debug!(instance_id, %version, attempts, "Protocol connection opened");

        let records = RecordWriter::spawn(Arc::clone(&self.db), instance_id);
        let handle = SessionHandle::new(
            instance_id,
            owner_id,
            opened.connection,
            keys,
            records,
            attempts,
        );
        Ok((Arc::new(handle), opened.events))
    }

    /// Marks the instance connecting and starts its event pump.
    async fn start(self: &Arc<Self>, handle: Arc<SessionHandle>, events: mpsc::Receiver<ProtocolEvent>) {
        self.update_instance(&handle.instance_id, InstanceUpdate::status(InstanceStatus::Connecting))
            .await;
        self.fanout
            .emit(
                &handle.user_id,
                ClientEvent::status(&handle.instance_id, ConnectionStatus::Connecting),
            )
            .await;

        let pump = tokio::spawn(Arc::clone(self).run_pump(Arc::clone(&handle), events));
        handle.attach_pump(pump);
    }

    async fn disconnect_locked(&self, instance_id: &str, owner_id: &str) {
        if let Some(handle) = self.registry.remove(instance_id).await {
            if let Err(e) = handle.connection.logout().await {
                warn!(instance_id, error = %e, "Logout failed");
            }
            handle.release().await;
        }

        self.update_instance(
            instance_id,
            InstanceUpdate::status(InstanceStatus::Disconnected)
                .with_phone_number(None)
                .with_qr_code(None),
        )
        .await;
        self.credentials.clear(instance_id).await;

        self.fanout
            .emit(owner_id, ClientEvent::qr_code(instance_id, None))
            .await;
        self.fanout
            .emit(owner_id, ClientEvent::status(instance_id, ConnectionStatus::Disconnected))
            .await;

        info!(instance_id, "Instance disconnected");
    }

    /// Full disconnect of `handle`'s session from a separate task, skipped if
    /// the session was superseded meanwhile.
    pub(crate) fn spawn_teardown(self: &Arc<Self>, handle: &SessionHandle, reason: &'static str) {
        let manager = Arc::clone(self);
        let instance_id = handle.instance_id.clone();
        let user_id = handle.user_id.clone();
        let generation = handle.generation;

        tokio::spawn(async move {
            let lock = manager.instance_lock(&instance_id);
            let _guard = lock.lock().await;

            if manager.registry.current(&instance_id, generation).await.is_none() {
                debug!(instance_id = %instance_id, reason, "Teardown superseded");
                return;
            }

            info!(instance_id = %instance_id, reason, "Tearing down session");
            manager.disconnect_locked(&instance_id, &user_id).await;
        });
    }

    /// Books the next reconnect of `handle`'s session, or gives up when the
    /// policy is exhausted.
    pub(crate) async fn schedule_reconnect(self: &Arc<Self>, handle: &SessionHandle) {
        let attempt = handle.next_attempt();
        if !self.policy.allows(attempt) {
            tokio::spawn(Arc::clone(self).give_up(handle.instance_id.clone(), handle.generation));
            return;
        }

        let delay = self.policy.delay(attempt);
        self.fanout
            .emit(
                &handle.user_id,
                ClientEvent::status(&handle.instance_id, ConnectionStatus::Reconnecting),
            )
            .await;

        info!(
            instance_id = %handle.instance_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        tokio::spawn(Arc::clone(self).reconnect(handle.instance_id.clone(), handle.generation, delay));
    }

    fn reconnect(
        self: Arc<Self>,
        instance_id: String,
        generation: Uuid,
        delay: Duration,
    ) -> BoxFuture<'static, ()> {
        async move {
            let mut delay = delay;
            loop {
                tokio::time::sleep(delay).await;

                let lock = self.instance_lock(&instance_id);
                let _guard = lock.lock().await;

                let Some(previous) = self.registry.current(&instance_id, generation).await else {
                    debug!(instance_id = %instance_id, "Reconnect superseded");
                    return;
                };
                previous.release().await;

                match self
                    .open_session(&instance_id, &previous.user_id, previous.attempts())
                    .await
                {
                    Ok((handle, events)) => {
                        info!(instance_id = %instance_id, attempt = previous.attempts(), "Reconnected");
                        self.registry.replace(Arc::clone(&handle)).await;
                        self.start(handle, events).await;
                        return;
                    }
                    Err(e) => {
                        warn!(instance_id = %instance_id, error = %e, "Reconnect attempt failed");
                        let attempt = previous.next_attempt();
                        if !self.policy.allows(attempt) {
                            self.give_up_locked(&previous).await;
                            return;
                        }
                        delay = self.policy.delay(attempt);
                        self.fanout
                            .emit(
                                &previous.user_id,
                                ClientEvent::status(&instance_id, ConnectionStatus::Reconnecting),
                            )
                            .await;
                    }
                }
            }
        }
        .boxed()
    }

    async fn give_up(self: Arc<Self>, instance_id: String, generation: Uuid) {
        let lock = self.instance_lock(&instance_id);
        let _guard = lock.lock().await;

        if let Some(handle) = self.registry.current(&instance_id, generation).await {
            self.give_up_locked(&handle).await;
        }
    }

    /// Drops the session but keeps its credentials, leaving the instance in
    /// `error` until someone connects it again.
    async fn give_up_locked(&self, handle: &SessionHandle) {
        let instance_id = &handle.instance_id;
        if self
            .registry
            .remove_generation(instance_id, handle.generation)
            .await
            .is_none()
        {
            return;
        }
        handle.release().await;

        self.update_instance(
            instance_id,
            InstanceUpdate::status(InstanceStatus::Error).with_qr_code(None),
        )
        .await;
        self.fanout
            .emit(&handle.user_id, ClientEvent::status(instance_id, ConnectionStatus::Error))
            .await;

        warn!(instance_id = %instance_id, attempts = handle.attempts(), "Giving up reconnecting");
    }

    pub(crate) async fn update_instance(&self, instance_id: &str, update: InstanceUpdate) {
        if let Err(e) = self.db.update_instance(instance_id, update).await {
            error!(instance_id, error = %e, "Failed to update instance");
        }
    }
}
