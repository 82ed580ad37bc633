use manda_core::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bridge process not running")]
    ProcessNotRunning,

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Bun install failed: {0}")]
    BunInstallFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Bridge rejected command: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, IpcError>;

impl From<IpcError> for ProtocolError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::ChannelClosed | IpcError::ProcessNotRunning => ProtocolError::Closed,
            IpcError::Timeout => ProtocolError::Timeout,
            IpcError::Rejected(reason) => ProtocolError::Rejected(reason),
            IpcError::Serialization(e) => ProtocolError::Serialization(e),
            other => ProtocolError::Transport(other.to_string()),
        }
    }
}
