use serde::Serialize;

use manda_db::{Contact, NewMessage};

/// Status pushed to live clients. Wider than the persisted status: the
/// `reconnecting` state only exists on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    #[serde(flatten)]
    pub message: NewMessage,
    pub contact: Contact,
}

/// Named events delivered to a user's live connections, serialized as
/// `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    QrCode {
        instance_id: String,
        qr_code: Option<String>,
    },
    ConnectionUpdate {
        instance_id: String,
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    MessageReceived {
        instance_id: String,
        message: ReceivedMessage,
    },
}

impl ClientEvent {
    pub fn status(instance_id: &str, status: ConnectionStatus) -> Self {
        ClientEvent::ConnectionUpdate {
            instance_id: instance_id.to_string(),
            status,
            phone_number: None,
        }
    }

    pub fn qr_code(instance_id: &str, qr_code: Option<String>) -> Self {
        ClientEvent::QrCode {
            instance_id: instance_id.to_string(),
            qr_code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::QrCode { .. } => "qr-code",
            ClientEvent::ConnectionUpdate { .. } => "connection-update",
            ClientEvent::MessageReceived { .. } => "message-received",
        }
    }

    pub fn instance_id(&self) -> &str {
        match self {
            ClientEvent::QrCode { instance_id, .. }
            | ClientEvent::ConnectionUpdate { instance_id, .. }
            | ClientEvent::MessageReceived { instance_id, .. } => instance_id,
        }
    }
}
