use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credentials::KeyBatch;
use crate::message::{ContactUpdate, InboundMessage};
use crate::session::ConnectionState;

/// Commands written to the protocol sidecar's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all_fields = "camelCase")]
pub enum IpcCommand {
    OpenSession {
        instance_id: String,
        version: [u32; 3],
        creds: serde_json::Value,
    },
    SendText {
        instance_id: String,
        to: String,
        text: String,
    },
    Logout {
        instance_id: String,
    },
    CloseSession {
        instance_id: String,
    },
    FetchLatestVersion,
    KeysResult {
        instance_id: String,
        request_id: String,
        keys: HashMap<String, serde_json::Value>,
    },
    Shutdown,
}

impl IpcCommand {
    pub fn name(&self) -> &'static str {
        match self {
            IpcCommand::OpenSession { .. } => "OpenSession",
            IpcCommand::SendText { .. } => "SendText",
            IpcCommand::Logout { .. } => "Logout",
            IpcCommand::CloseSession { .. } => "CloseSession",
            IpcCommand::FetchLatestVersion => "FetchLatestVersion",
            IpcCommand::KeysResult { .. } => "KeysResult",
            IpcCommand::Shutdown => "Shutdown",
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        match self {
            IpcCommand::OpenSession { instance_id, .. }
            | IpcCommand::SendText { instance_id, .. }
            | IpcCommand::Logout { instance_id }
            | IpcCommand::CloseSession { instance_id }
            | IpcCommand::KeysResult { instance_id, .. } => Some(instance_id),
            IpcCommand::FetchLatestVersion | IpcCommand::Shutdown => None,
        }
    }
}

/// Events read from the protocol sidecar's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all_fields = "camelCase")]
pub enum IpcEvent {
    Ready,

    ConnectionUpdate {
        instance_id: String,
        #[serde(default)]
        connection: Option<ConnectionState>,
        #[serde(default)]
        qr: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        user_id: Option<String>,
    },

    CredsUpdate {
        instance_id: String,
        creds: serde_json::Value,
    },

    MessagesUpsert {
        instance_id: String,
        messages: Vec<InboundMessage>,
    },

    ContactsUpdate {
        instance_id: String,
        contacts: Vec<ContactUpdate>,
    },

    KeysGet {
        instance_id: String,
        request_id: String,
        key_type: String,
        ids: Vec<String>,
    },

    KeysSet {
        instance_id: String,
        data: KeyBatch,
    },

    Error {
        #[serde(default)]
        instance_id: Option<String>,
        error: String,
    },

    CommandResult {
        command_id: String,
        success: bool,
        #[serde(default)]
        data: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl IpcEvent {
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            IpcEvent::ConnectionUpdate { instance_id, .. }
            | IpcEvent::CredsUpdate { instance_id, .. }
            | IpcEvent::MessagesUpsert { instance_id, .. }
            | IpcEvent::ContactsUpdate { instance_id, .. }
            | IpcEvent::KeysGet { instance_id, .. }
            | IpcEvent::KeysSet { instance_id, .. } => Some(instance_id),
            IpcEvent::Error { instance_id, .. } => instance_id.as_deref(),
            IpcEvent::Ready | IpcEvent::CommandResult { .. } => None,
        }
    }
}
