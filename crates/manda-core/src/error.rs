use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection closed")]
    Closed,

    #[error("Protocol request timed out")]
    Timeout,

    #[error("Protocol rejected request: {0}")]
    Rejected(String),

    #[error("Protocol transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
