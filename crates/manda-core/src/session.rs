use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::credentials::{IdentityCredentials, KeyProvider};
use crate::error::Result;
use crate::message::{ContactUpdate, InboundMessage};

/// Protocol version advertised when opening a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl ProtocolVersion {
    /// Used when the latest version cannot be fetched.
    pub const FALLBACK: ProtocolVersion = ProtocolVersion([2, 3000, 1_023_223_821]);
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Normalized reason attached to a `close` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    Unavailable,
    RestartRequired,
    Unknown(Option<u16>),
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => DisconnectReason::LoggedOut,
            Some(403) => DisconnectReason::Forbidden,
            Some(408) => DisconnectReason::ConnectionLost,
            Some(411) => DisconnectReason::MultideviceMismatch,
            Some(428) => DisconnectReason::ConnectionClosed,
            Some(440) => DisconnectReason::ConnectionReplaced,
            Some(500) => DisconnectReason::BadSession,
            Some(503) => DisconnectReason::Unavailable,
            Some(515) => DisconnectReason::RestartRequired,
            other => DisconnectReason::Unknown(other),
        }
    }

    /// Terminal reasons must not be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// One `connection.update` from the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionState>,
    pub qr: Option<String>,
    pub disconnect: Option<DisconnectReason>,
    pub user_id: Option<String>,
}

/// Events a live connection delivers, in arrival order.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    ConnectionUpdate(ConnectionUpdate),
    CredentialsUpdate(IdentityCredentials),
    Messages(Vec<InboundMessage>),
    Contacts(Vec<ContactUpdate>),
}

/// A live protocol connection for one instance.
#[async_trait]
pub trait ProtocolConnection: Send + Sync {
    /// Identity bound to the connection once it is open.
    fn user_id(&self) -> Option<String>;

    /// Sends a text message; `Ok(None)` means the protocol gave no confirmation.
    async fn send_text(&self, jid: &str, text: &str) -> Result<Option<String>>;

    async fn logout(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

pub struct OpenRequest {
    pub instance_id: String,
    pub version: ProtocolVersion,
    pub credentials: IdentityCredentials,
    pub keys: Arc<dyn KeyProvider>,
}

pub struct OpenedConnection {
    pub connection: Arc<dyn ProtocolConnection>,
    /// Ordered event stream; closes when the connection goes away.
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Opens protocol connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn latest_version(&self) -> Result<ProtocolVersion>;

    async fn open(&self, request: OpenRequest) -> Result<OpenedConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_is_terminal() {
        assert!(DisconnectReason::from_status_code(Some(401)).is_terminal());
    }

    #[test]
    fn other_reasons_are_transient() {
        for code in [Some(403), Some(408), Some(428), Some(440), Some(515), Some(999), None] {
            assert!(
                !DisconnectReason::from_status_code(code).is_terminal(),
                "{code:?} should be transient"
            );
        }
    }

    #[test]
    fn unknown_keeps_code() {
        assert_eq!(
            DisconnectReason::from_status_code(Some(418)),
            DisconnectReason::Unknown(Some(418))
        );
    }

    #[test]
    fn version_display() {
        assert_eq!(ProtocolVersion([2, 3000, 7]).to_string(), "2.3000.7");
    }
}
