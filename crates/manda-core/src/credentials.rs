use std::collections::{BTreeMap, HashMap};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Key id of the identity-credentials record; every other record is a
/// `"<type>-<id>"` signal key.
pub const IDENTITY_KEY_ID: &str = "creds";

/// `type -> id -> value`, where `None` deletes the key.
pub type KeyBatch = BTreeMap<String, BTreeMap<String, Option<serde_json::Value>>>;

/// Composite storage id for a signal key.
pub fn signal_key_id(key_type: &str, id: &str) -> String {
    format!("{key_type}-{id}")
}

/// The long-lived authentication record of one instance.
///
/// The contents belong to the protocol layer and are carried around as
/// opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityCredentials(serde_json::Value);

impl IdentityCredentials {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Synthesizes an unregistered credential set for first-time pairing.
    /// Key pairs are generated by the protocol layer when it sees them missing.
    pub fn fresh() -> Self {
        let registration_id = rand::random::<u16>() & 0x3fff;
        let adv_secret: [u8; 32] = rand::random();

        Self(serde_json::json!({
            "registrationId": registration_id,
            "advSecretKey": STANDARD.encode(adv_secret),
            "processedHistoryMessages": [],
            "nextPreKeyId": 1,
            "firstUnuploadedPreKeyId": 1,
            "accountSyncCounter": 0,
            "accountSettings": { "unarchiveChats": false },
            "registered": false,
        }))
    }

    pub fn is_registered(&self) -> bool {
        self.0
            .get("registered")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Signal-key access handed to the protocol layer.
pub trait KeyProvider: Send + Sync {
    /// Returns the subset of `ids` present for `key_type`; missing ids are omitted.
    fn get(&self, key_type: &str, ids: &[String]) -> HashMap<String, serde_json::Value>;

    /// Applies a batch of upserts and deletions.
    fn set(&self, batch: KeyBatch);
}
