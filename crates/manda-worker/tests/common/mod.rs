#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use manda_core::{
    ConnectionState, ConnectionUpdate, Connector, DisconnectReason, IdentityCredentials,
    InboundMessage, KeyProvider, OpenRequest, OpenedConnection, ProtocolConnection, ProtocolError,
    ProtocolEvent, ProtocolVersion,
};
use manda_db::{Instance, MandaDb, User};
use manda_worker::{MandaWorker, ReconnectPolicy, Subscription};

pub const PHONE: &str = "5511999999999";

pub fn user_id_for(phone: &str) -> String {
    format!("{phone}:7@s.whatsapp.net")
}

#[derive(Default)]
pub struct FakeConnection {
    pub user_id: Mutex<Option<String>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub logged_out: AtomicBool,
    pub closed: AtomicBool,
    pub unconfirmed_sends: AtomicBool,
}

#[async_trait]
impl ProtocolConnection for FakeConnection {
    fn user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap().clone()
    }

    async fn send_text(&self, jid: &str, text: &str) -> manda_core::Result<Option<String>> {
        self.sent
            .lock()
            .unwrap()
            .push((jid.to_string(), text.to_string()));
        if self.unconfirmed_sends.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(format!("SENT-{}", self.sent.lock().unwrap().len())))
    }

    async fn logout(&self) -> manda_core::Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> manda_core::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One `open` call seen by the fake connector.
#[derive(Clone)]
pub struct OpenedSession {
    pub instance_id: String,
    pub version: ProtocolVersion,
    pub credentials: IdentityCredentials,
    pub keys: Arc<dyn KeyProvider>,
    pub connection: Arc<FakeConnection>,
    events: Arc<Mutex<Option<mpsc::Sender<ProtocolEvent>>>>,
}

impl OpenedSession {
    pub async fn emit(&self, event: ProtocolEvent) {
        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn open(&self, phone: &str) {
        let user_id = user_id_for(phone);
        *self.connection.user_id.lock().unwrap() = Some(user_id.clone());
        self.emit(ProtocolEvent::ConnectionUpdate(ConnectionUpdate {
            connection: Some(ConnectionState::Open),
            user_id: Some(user_id),
            ..Default::default()
        }))
        .await;
    }

    pub async fn close(&self, reason: DisconnectReason) {
        self.emit(ProtocolEvent::ConnectionUpdate(ConnectionUpdate {
            connection: Some(ConnectionState::Close),
            disconnect: Some(reason),
            ..Default::default()
        }))
        .await;
    }

    pub async fn qr(&self, payload: &str) {
        self.emit(ProtocolEvent::ConnectionUpdate(ConnectionUpdate {
            qr: Some(payload.to_string()),
            ..Default::default()
        }))
        .await;
    }

    pub async fn messages(&self, messages: Vec<InboundMessage>) {
        self.emit(ProtocolEvent::Messages(messages)).await;
    }

    /// Ends the event stream as if the transport died.
    pub fn drop_stream(&self) {
        self.events.lock().unwrap().take();
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub opened: Mutex<Vec<OpenedSession>>,
    pub failing: Mutex<HashSet<String>>,
    pub version_unavailable: AtomicBool,
}

impl FakeConnector {
    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn opens_for(&self, instance_id: &str) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.instance_id == instance_id)
            .count()
    }

    pub fn last(&self, instance_id: &str) -> OpenedSession {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.instance_id == instance_id)
            .cloned()
            .expect("instance was never opened")
    }

    pub fn fail_opens(&self, instance_id: &str) {
        self.failing.lock().unwrap().insert(instance_id.to_string());
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn latest_version(&self) -> manda_core::Result<ProtocolVersion> {
        if self.version_unavailable.load(Ordering::SeqCst) {
            return Err(ProtocolError::Timeout);
        }
        Ok(ProtocolVersion([2, 3000, 42]))
    }

    async fn open(&self, request: OpenRequest) -> manda_core::Result<OpenedConnection> {
        if self.failing.lock().unwrap().contains(&request.instance_id) {
            return Err(ProtocolError::Transport("endpoint unreachable".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let connection = Arc::new(FakeConnection::default());
        self.opened.lock().unwrap().push(OpenedSession {
            instance_id: request.instance_id,
            version: request.version,
            credentials: request.credentials,
            keys: request.keys,
            connection: Arc::clone(&connection),
            events: Arc::new(Mutex::new(Some(tx))),
        });

        Ok(OpenedConnection {
            connection,
            events: rx,
        })
    }
}

pub struct Harness {
    pub worker: MandaWorker,
    pub connector: Arc<FakeConnector>,
    pub db: Arc<MandaDb>,
    pub user: User,
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(20),
        multiplier: 1.0,
        max_delay: Duration::from_millis(20),
        max_attempts: Some(3),
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_policy(fast_policy()).await
    }

    pub async fn with_policy(policy: ReconnectPolicy) -> Self {
        let db = Arc::new(MandaDb::in_memory().await.unwrap());
        let user = db.create_user("owner@example.com", Some("Owner")).await.unwrap();
        let connector = Arc::new(FakeConnector::default());
        let worker = MandaWorker::new(
            Arc::clone(&db),
            Arc::clone(&connector) as Arc<dyn Connector>,
            policy,
        );

        Self {
            worker,
            connector,
            db,
            user,
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        self.worker.fanout().register(&self.user.id).await
    }

    /// Creates an instance and opens it on `phone`. Returns once every
    /// notification of the open has gone out.
    pub async fn connected_instance(&self, name: &str, phone: &str) -> Instance {
        let mut sub = self.subscribe().await;
        let instance = self.worker.create_instance(&self.user.id, name).await.unwrap();
        self.connector.last(&instance.id).open(phone).await;

        wait_for_status(&mut sub, &instance.id, "connected").await;
        loop {
            let data = next_event(&mut sub, "qr-code").await;
            if data["instanceId"] == instance.id.as_str() {
                break;
            }
        }
        self.worker.fanout().unregister(&sub.conn_id).await;

        self.instance(&instance.id).await
    }

    pub async fn instance(&self, id: &str) -> Instance {
        self.db.get_instance(id).await.unwrap().unwrap()
    }

    pub async fn status(&self, id: &str) -> &'static str {
        self.instance(id).await.status.as_str()
    }
}

/// Polls `check` until it holds, failing the test after a few seconds.
pub async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Next client event named `name`, skipping others.
pub async fn next_event(sub: &mut Subscription, name: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let raw = tokio::time::timeout_at(deadline, sub.events.recv())
            .await
            .unwrap_or_else(|_| panic!("no {name} event"))
            .expect("subscription closed");
        let event: Value = serde_json::from_str(&raw).unwrap();
        if event["event"] == name {
            return event["data"].clone();
        }
    }
}

/// Next `connection-update` status for `instance_id`.
pub async fn next_status(sub: &mut Subscription, instance_id: &str) -> String {
    loop {
        let data = next_event(sub, "connection-update").await;
        if data["instanceId"] == instance_id {
            return data["status"].as_str().unwrap().to_string();
        }
    }
}

/// Skips `connection-update`s of `instance_id` until `status` shows up.
pub async fn wait_for_status(sub: &mut Subscription, instance_id: &str, status: &str) {
    while next_status(sub, instance_id).await != status {}
}

pub fn text_message(id: &str, from: &str, text: &str) -> InboundMessage {
    serde_json::from_value(serde_json::json!({
        "key": {"remoteJid": from, "fromMe": false, "id": id},
        "message": {"conversation": text},
        "messageTimestamp": 1_700_000_000,
        "pushName": "Maria",
    }))
    .unwrap()
}
