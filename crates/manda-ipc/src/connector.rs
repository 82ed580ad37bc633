use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock as AsyncRwLock, mpsc, oneshot};
use tracing::{debug, info, warn};

use manda_core::{
    ConnectionUpdate, Connector, DisconnectReason, IdentityCredentials, IpcCommand, IpcEvent,
    IpcMessage, KeyProvider, OpenRequest, OpenedConnection, ProtocolConnection, ProtocolError,
    ProtocolEvent, ProtocolVersion,
};

use crate::bridge::BridgeManager;
use crate::error::{IpcError, Result};

const SESSION_BUFFER: usize = 1000;

type Reply = std::result::Result<Option<Value>, String>;

/// Where events for one open session go.
#[derive(Clone)]
struct Route {
    id: u64,
    events: mpsc::Sender<ProtocolEvent>,
    keys: Arc<dyn KeyProvider>,
    user_id: Arc<RwLock<Option<String>>>,
}

struct Shared {
    bridge: AsyncRwLock<BridgeManager>,
    routes: RwLock<HashMap<String, Route>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    next_route: AtomicU64,
    request_timeout: Duration,
}

/// [`Connector`] backed by the protocol sidecar. Many sessions share one
/// process; events are routed by instance id.
pub struct IpcConnector {
    shared: Arc<Shared>,
}

impl IpcConnector {
    /// Starts the sidecar in `bridge_dir` and begins routing its output.
    pub async fn start(bridge_dir: PathBuf, request_timeout: Duration) -> Result<Self> {
        let mut bridge = BridgeManager::new(bridge_dir);
        let lines = bridge.take_line_receiver().ok_or(IpcError::ChannelClosed)?;
        bridge.start().await?;

        let shared = Arc::new(Shared::new(bridge, request_timeout));
        tokio::spawn(dispatch(Arc::clone(&shared), lines));

        Ok(Self { shared })
    }

    pub async fn stop(&self) -> Result<()> {
        self.shared.bridge.write().await.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.shared.bridge.write().await.is_running()
    }
}

#[async_trait]
impl Connector for IpcConnector {
    async fn latest_version(&self) -> manda_core::Result<ProtocolVersion> {
        let data = self
            .shared
            .request(IpcCommand::FetchLatestVersion)
            .await?
            .ok_or_else(|| ProtocolError::Rejected("bridge returned no version".into()))?;
        Ok(ProtocolVersion(serde_json::from_value(data)?))
    }

    async fn open(&self, request: OpenRequest) -> manda_core::Result<OpenedConnection> {
        let OpenRequest {
            instance_id,
            version,
            credentials,
            keys,
        } = request;

        let (events_tx, events_rx) = mpsc::channel(SESSION_BUFFER);
        let user_id = Arc::new(RwLock::new(None));
        let route_id = self.shared.add_route(
            &instance_id,
            Route {
                id: 0,
                events: events_tx,
                keys,
                user_id: Arc::clone(&user_id),
            },
        );

        let opened = self
            .shared
            .request(IpcCommand::OpenSession {
                instance_id: instance_id.clone(),
                version: version.0,
                creds: credentials.into_value(),
            })
            .await;

        if let Err(e) = opened {
            self.shared.remove_route(&instance_id, route_id);
            return Err(e.into());
        }

        info!(instance_id = %instance_id, %version, "Session opened on bridge");

        Ok(OpenedConnection {
            connection: Arc::new(IpcConnection {
                instance_id,
                route_id,
                user_id,
                shared: Arc::clone(&self.shared),
            }),
            events: events_rx,
        })
    }
}

struct IpcConnection {
    instance_id: String,
    route_id: u64,
    user_id: Arc<RwLock<Option<String>>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl ProtocolConnection for IpcConnection {
    fn user_id(&self) -> Option<String> {
        self.user_id.read().ok().and_then(|guard| guard.clone())
    }

    async fn send_text(&self, jid: &str, text: &str) -> manda_core::Result<Option<String>> {
        let data = self
            .shared
            .request(IpcCommand::SendText {
                instance_id: self.instance_id.clone(),
                to: jid.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(data.as_ref().and_then(sent_message_id))
    }

    async fn logout(&self) -> manda_core::Result<()> {
        self.shared
            .request(IpcCommand::Logout {
                instance_id: self.instance_id.clone(),
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> manda_core::Result<()> {
        self.shared.remove_route(&self.instance_id, self.route_id);
        self.shared
            .bridge
            .read()
            .await
            .send_command(IpcCommand::CloseSession {
                instance_id: self.instance_id.clone(),
            })
            .await?;
        Ok(())
    }
}

impl Shared {
    fn new(bridge: BridgeManager, request_timeout: Duration) -> Self {
        Self {
            bridge: AsyncRwLock::new(bridge),
            routes: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_route: AtomicU64::new(1),
            request_timeout,
        }
    }

    fn add_route(&self, instance_id: &str, mut route: Route) -> u64 {
        route.id = self.next_route.fetch_add(1, Ordering::Relaxed);
        let id = route.id;
        if let Ok(mut routes) = self.routes.write() {
            if routes.insert(instance_id.to_string(), route).is_some() {
                debug!(instance_id, "Replaced stale bridge route");
            }
        }
        id
    }

    /// Removes the route only if it still belongs to `route_id`.
    fn remove_route(&self, instance_id: &str, route_id: u64) {
        if let Ok(mut routes) = self.routes.write() {
            if routes.get(instance_id).is_some_and(|r| r.id == route_id) {
                routes.remove(instance_id);
            }
        }
    }

    fn route(&self, instance_id: &str) -> Option<Route> {
        self.routes.read().ok()?.get(instance_id).cloned()
    }

    /// Sends a command and waits for its `CommandResult`.
    async fn request(&self, command: IpcCommand) -> Result<Option<Value>> {
        let name = command.name();
        let message = IpcMessage::new_command(command);
        let id = message.id.clone();

        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.clone(), tx);
        }

        debug!(command = name, command_id = %id, "Sending IPC request");
        if let Err(e) = self.bridge.read().await.send(&message).await {
            self.forget(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(reason))) => Err(IpcError::Rejected(reason)),
            Ok(Err(_)) => Err(IpcError::ChannelClosed),
            Err(_) => {
                self.forget(&id);
                warn!(command = name, command_id = %id, "IPC request timed out");
                Err(IpcError::Timeout)
            }
        }
    }

    fn forget(&self, command_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(command_id);
        }
    }

    fn resolve(&self, command_id: &str, reply: Reply) {
        let waiter = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(command_id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(command_id, "Result for unknown or expired command"),
        }
    }

    async fn handle_event(&self, event: IpcEvent) {
        match event {
            IpcEvent::Ready => info!("Protocol bridge ready"),
            IpcEvent::CommandResult {
                command_id,
                success,
                data,
                error,
            } => {
                let reply = if success {
                    Ok(data)
                } else {
                    Err(error.unwrap_or_else(|| "unknown bridge error".to_string()))
                };
                self.resolve(&command_id, reply);
            }
            IpcEvent::KeysGet {
                instance_id,
                request_id,
                key_type,
                ids,
            } => {
                let keys = self
                    .route(&instance_id)
                    .map(|route| route.keys.get(&key_type, &ids))
                    .unwrap_or_default();
                let reply = IpcCommand::KeysResult {
                    instance_id: instance_id.clone(),
                    request_id,
                    keys,
                };
                if let Err(e) = self.bridge.read().await.send_command(reply).await {
                    warn!(instance_id = %instance_id, error = %e, "Failed to answer key lookup");
                }
            }
            IpcEvent::KeysSet { instance_id, data } => match self.route(&instance_id) {
                Some(route) => route.keys.set(data),
                None => debug!(instance_id = %instance_id, "Key update for unrouted session"),
            },
            IpcEvent::Error { instance_id, error } => {
                warn!(instance_id = instance_id.as_deref().unwrap_or("-"), "Bridge error: {}", error);
            }
            other => {
                let Some((instance_id, event)) = to_protocol_event(other) else {
                    return;
                };
                let Some(route) = self.route(&instance_id) else {
                    debug!(instance_id = %instance_id, "Dropping event for unrouted session");
                    return;
                };
                if let ProtocolEvent::ConnectionUpdate(ConnectionUpdate {
                    user_id: Some(ref user_id),
                    ..
                }) = event
                {
                    if let Ok(mut cell) = route.user_id.write() {
                        *cell = Some(user_id.clone());
                    }
                }
                if route.events.send(event).await.is_err() {
                    debug!(instance_id = %instance_id, "Session event receiver dropped");
                }
            }
        }
    }

    fn close_all(&self) {
        if let Ok(mut routes) = self.routes.write() {
            routes.clear();
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

async fn dispatch(shared: Arc<Shared>, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        match BridgeManager::parse_event(&line) {
            Some(event) => shared.handle_event(event).await,
            None => debug!("Ignoring non-event bridge output: {}", line),
        }
    }

    warn!("Protocol bridge output closed; dropping all sessions");
    shared.close_all();
}

/// Maps session-scoped sidecar events onto [`ProtocolEvent`]s.
fn to_protocol_event(event: IpcEvent) -> Option<(String, ProtocolEvent)> {
    match event {
        IpcEvent::ConnectionUpdate {
            instance_id,
            connection,
            qr,
            status_code,
            user_id,
        } => {
            let disconnect = (connection == Some(manda_core::ConnectionState::Close))
                .then(|| DisconnectReason::from_status_code(status_code));
            Some((
                instance_id,
                ProtocolEvent::ConnectionUpdate(ConnectionUpdate {
                    connection,
                    qr,
                    disconnect,
                    user_id,
                }),
            ))
        }
        IpcEvent::CredsUpdate { instance_id, creds } => Some((
            instance_id,
            ProtocolEvent::CredentialsUpdate(IdentityCredentials::new(creds)),
        )),
        IpcEvent::MessagesUpsert {
            instance_id,
            messages,
        } => Some((instance_id, ProtocolEvent::Messages(messages))),
        IpcEvent::ContactsUpdate {
            instance_id,
            contacts,
        } => Some((instance_id, ProtocolEvent::Contacts(contacts))),
        _ => None,
    }
}

/// Pulls the protocol message id out of a send result.
fn sent_message_id(data: &Value) -> Option<String> {
    data.as_str()
        .or_else(|| data.get("messageId").and_then(Value::as_str))
        .or_else(|| data.pointer("/key/id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
