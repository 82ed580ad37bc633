use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use manda_core::{IDENTITY_KEY_ID, IdentityCredentials, KeyBatch, KeyProvider, signal_key_id};
use manda_db::{CredentialStats, MandaDb};

use crate::error::Result;

/// Durable per-instance credential material.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<MandaDb>,
}

pub struct LoadedCredentials {
    pub identity: IdentityCredentials,
    pub keys: Arc<KeyStore>,
}

impl CredentialStore {
    pub fn new(db: Arc<MandaDb>) -> Self {
        Self { db }
    }

    /// Reads every record of the instance. Never fails: unreadable or missing
    /// identity credentials are replaced by a fresh set.
    pub async fn load(&self, instance_id: &str) -> LoadedCredentials {
        let records = match self.db.list_credentials(instance_id).await {
            Ok(records) => records,
            Err(e) => {
                error!(instance_id, error = %e, "Failed to read credentials, starting fresh");
                Vec::new()
            }
        };

        let mut identity = None;
        let mut index = HashMap::with_capacity(records.len());

        for record in records {
            let value = match serde_json::from_str::<Value>(&record.key_data) {
                Ok(value) => value,
                Err(e) => {
                    warn!(instance_id, key_id = %record.key_id, error = %e, "Skipping unreadable credential record");
                    continue;
                }
            };

            if record.key_id == IDENTITY_KEY_ID {
                identity = Some(IdentityCredentials::new(value));
            } else {
                index.insert(record.key_id, value);
            }
        }

        let identity = identity.unwrap_or_else(|| {
            info!(instance_id, "No stored identity credentials, pairing from scratch");
            IdentityCredentials::fresh()
        });

        debug!(instance_id, keys = index.len(), "Loaded credentials");

        LoadedCredentials {
            identity,
            keys: KeyStore::spawn(Arc::clone(&self.db), instance_id, index),
        }
    }

    pub async fn save_identity_credentials(&self, instance_id: &str, creds: &IdentityCredentials) {
        write_record(&self.db, instance_id, IDENTITY_KEY_ID, creds.as_value()).await;
    }

    pub async fn clear(&self, instance_id: &str) {
        match self.db.clear_credentials(instance_id).await {
            Ok(removed) => debug!(instance_id, removed, "Cleared credentials"),
            Err(e) => error!(instance_id, error = %e, "Failed to clear credentials"),
        }
    }

    pub async fn has_credentials(&self, instance_id: &str) -> Result<bool> {
        Ok(self
            .db
            .get_credential(instance_id, IDENTITY_KEY_ID)
            .await?
            .is_some())
    }

    pub async fn stats(&self, instance_id: &str) -> Result<CredentialStats> {
        Ok(self.db.credential_stats(instance_id, IDENTITY_KEY_ID).await?)
    }
}

enum KeyWrite {
    Put { key_id: String, value: Value },
    Delete { key_id: String },
    Flush(oneshot::Sender<()>),
}

/// In-memory signal-key index with ordered write-through to the database.
///
/// Reads and writes never wait on storage; a background task applies the
/// writes in the order they were made.
pub struct KeyStore {
    instance_id: String,
    index: RwLock<HashMap<String, Value>>,
    writes: mpsc::UnboundedSender<KeyWrite>,
    closed: AtomicBool,
}

impl KeyStore {
    pub(crate) fn spawn(db: Arc<MandaDb>, instance_id: &str, index: HashMap<String, Value>) -> Arc<Self> {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_through(db, instance_id.to_string(), rx));

        Arc::new(Self {
            instance_id: instance_id.to_string(),
            index: RwLock::new(index),
            writes,
            closed: AtomicBool::new(false),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn len(&self) -> usize {
        self.index.read().map_or(0, |index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues the identity credentials behind any pending key writes.
    pub fn persist_identity(&self, creds: &IdentityCredentials) {
        self.enqueue(KeyWrite::Put {
            key_id: IDENTITY_KEY_ID.to_string(),
            value: creds.as_value().clone(),
        });
    }

    /// Waits until every write queued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(KeyWrite::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops accepting writes and drains the queue. Later `set` calls only
    /// touch memory.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.flush().await;
    }

    fn enqueue(&self, write: KeyWrite) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(instance_id = %self.instance_id, "Key store closed, write dropped");
            return;
        }
        if self.writes.send(write).is_err() {
            warn!(instance_id = %self.instance_id, "Key writer gone, write dropped");
        }
    }
}

impl KeyProvider for KeyStore {
    fn get(&self, key_type: &str, ids: &[String]) -> HashMap<String, Value> {
        let Ok(index) = self.index.read() else {
            return HashMap::new();
        };

        ids.iter()
            .filter_map(|id| {
                index
                    .get(&signal_key_id(key_type, id))
                    .map(|value| (id.clone(), value.clone()))
            })
            .collect()
    }

    fn set(&self, batch: KeyBatch) {
        let Ok(mut index) = self.index.write() else {
            return;
        };

        for (key_type, entries) in batch {
            for (id, value) in entries {
                let key_id = signal_key_id(&key_type, &id);
                match value {
                    Some(value) => {
                        index.insert(key_id.clone(), value.clone());
                        self.enqueue(KeyWrite::Put { key_id, value });
                    }
                    None => {
                        index.remove(&key_id);
                        self.enqueue(KeyWrite::Delete { key_id });
                    }
                }
            }
        }
    }
}

async fn write_through(db: Arc<MandaDb>, instance_id: String, mut rx: mpsc::UnboundedReceiver<KeyWrite>) {
    while let Some(write) = rx.recv().await {
        match write {
            KeyWrite::Put { key_id, value } => write_record(&db, &instance_id, &key_id, &value).await,
            KeyWrite::Delete { key_id } => match db.delete_credential(&instance_id, &key_id).await {
                Ok(true) => {}
                Ok(false) => debug!(instance_id = %instance_id, key_id = %key_id, "Key already absent"),
                Err(e) => warn!(instance_id = %instance_id, key_id = %key_id, error = %e, "Failed to delete key"),
            },
            KeyWrite::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_record(db: &MandaDb, instance_id: &str, key_id: &str, value: &Value) {
    let data = match serde_json::to_string(value) {
        Ok(data) => data,
        Err(e) => {
            error!(instance_id, key_id, error = %e, "Failed to serialize credential record");
            return;
        }
    };

    if let Err(e) = db.put_credential(instance_id, key_id, &data).await {
        error!(instance_id, key_id, error = %e, "Failed to persist credential record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> (Arc<MandaDb>, String) {
        let db = MandaDb::in_memory().await.unwrap();
        let user = db.create_user("owner@example.com", None).await.unwrap();
        let instance = db.create_instance(&user.id, "main").await.unwrap();
        (Arc::new(db), instance.id)
    }

    fn batch(key_type: &str, id: &str, value: Option<Value>) -> KeyBatch {
        let mut batch = KeyBatch::new();
        batch
            .entry(key_type.to_string())
            .or_default()
            .insert(id.to_string(), value);
        batch
    }

    #[tokio::test]
    async fn missing_identity_synthesizes_fresh_credentials() {
        let (db, instance_id) = setup().await;
        let store = CredentialStore::new(db);

        let loaded = store.load(&instance_id).await;
        assert!(!loaded.identity.is_registered());
        assert!(loaded.keys.is_empty());
        assert!(!store.has_credentials(&instance_id).await.unwrap());
    }

    #[tokio::test]
    async fn identity_round_trips_through_storage() {
        let (db, instance_id) = setup().await;
        let store = CredentialStore::new(Arc::clone(&db));

        let creds = IdentityCredentials::new(json!({
            "registered": true,
            "me": {"id": "5511999999999:4@s.whatsapp.net"},
            "registrationId": 1234,
        }));
        store.save_identity_credentials(&instance_id, &creds).await;

        let reloaded = CredentialStore::new(db).load(&instance_id).await;
        assert_eq!(reloaded.identity, creds);
        assert!(store.has_credentials(&instance_id).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_identity_falls_back_to_fresh() {
        let (db, instance_id) = setup().await;
        db.put_credential(&instance_id, IDENTITY_KEY_ID, "{not json").await.unwrap();

        let loaded = CredentialStore::new(db).load(&instance_id).await;
        assert!(!loaded.identity.is_registered());
    }

    #[tokio::test]
    async fn keys_are_served_from_memory_and_written_through() {
        let (db, instance_id) = setup().await;
        let store = CredentialStore::new(Arc::clone(&db));
        let keys = store.load(&instance_id).await.keys;

        keys.set(batch("pre-key", "1", Some(json!({"public": "AAA"}))));
        keys.set(batch("session", "5511.0", Some(json!("blob"))));

        let found = keys.get("pre-key", &["1".into(), "2".into()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found["1"], json!({"public": "AAA"}));

        keys.flush().await;
        let record = db.get_credential(&instance_id, "pre-key-1").await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&record.key_data).unwrap(), json!({"public": "AAA"}));

        let reloaded = store.load(&instance_id).await.keys;
        assert_eq!(reloaded.get("session", &["5511.0".into()])["5511.0"], json!("blob"));
    }

    #[tokio::test]
    async fn null_value_deletes_key() {
        let (db, instance_id) = setup().await;
        let keys = CredentialStore::new(Arc::clone(&db)).load(&instance_id).await.keys;

        keys.set(batch("pre-key", "9", Some(json!(1))));
        keys.set(batch("pre-key", "9", None));
        // Deleting twice is not an error.
        keys.set(batch("pre-key", "9", None));

        assert!(keys.get("pre-key", &["9".into()]).is_empty());
        keys.flush().await;
        assert!(db.get_credential(&instance_id, "pre-key-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_store_stops_writing() {
        let (db, instance_id) = setup().await;
        let keys = CredentialStore::new(Arc::clone(&db)).load(&instance_id).await.keys;

        keys.close().await;
        keys.set(batch("pre-key", "1", Some(json!(1))));
        keys.persist_identity(&IdentityCredentials::fresh());
        keys.flush().await;

        assert!(db.list_credentials(&instance_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failures_are_swallowed() {
        let (db, instance_id) = setup().await;
        let keys = CredentialStore::new(Arc::clone(&db)).load(&instance_id).await.keys;

        drop_credentials_table(&db).await;
        keys.set(batch("pre-key", "1", Some(json!(1))));
        keys.flush().await;

        assert_eq!(keys.get("pre-key", &["1".into()]).len(), 1);
    }

    #[tokio::test]
    async fn stats_on_empty_instance() {
        let (db, instance_id) = setup().await;
        let stats = CredentialStore::new(db).stats(&instance_id).await.unwrap();

        assert_eq!(stats.total_keys, 0);
        assert!(!stats.has_credentials);
        assert_eq!(stats.last_updated, None);
    }

    async fn drop_credentials_table(db: &MandaDb) {
        sqlx::query("DROP TABLE auth_sessions")
            .execute(db.pool())
            .await
            .unwrap();
    }
}
