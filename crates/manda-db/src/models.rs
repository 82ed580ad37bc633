use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum InstanceStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Disconnected => "disconnected",
            InstanceStatus::Connecting => "connecting",
            InstanceStatus::Connected => "connected",
            InstanceStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub phone_number: Option<String>,
    pub qr_code: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An instance together with how much it has stored.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOverview {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub instance: Instance,
    pub message_count: i64,
    pub contact_count: i64,
}

/// Partial instance update. `None` leaves a column untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdate {
    pub status: Option<InstanceStatus>,
    pub phone_number: Option<Option<String>>,
    pub qr_code: Option<Option<String>>,
}

impl InstanceUpdate {
    pub fn status(status: InstanceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_phone_number(mut self, phone_number: Option<String>) -> Self {
        self.phone_number = Some(phone_number);
        self
    }

    pub fn with_qr_code(mut self, qr_code: Option<String>) -> Self {
        self.qr_code = Some(qr_code);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.phone_number.is_none() && self.qr_code.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    pub instance_id: String,
    pub jid: String,
    pub name: Option<String>,
    pub number: String,
    pub profile_pic: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub instance_id: String,
    pub message_id: String,
    pub from_me: bool,
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: i64,
    pub status: Option<String>,
    pub contact_id: i64,
    pub created_at: i64,
}

/// A message ready to be stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub message_id: String,
    pub from_me: bool,
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: i64,
    pub status: Option<String>,
    pub contact_id: i64,
    pub instance_id: String,
}

/// One opaque credential blob.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialRecord {
    pub instance_id: String,
    pub key_id: String,
    pub key_data: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStats {
    pub total_keys: i64,
    pub has_credentials: bool,
    pub last_updated: Option<i64>,
}
