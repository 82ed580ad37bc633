use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Db(#[from] manda_db::DbError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] manda_core::ProtocolError),

    #[error("Instance not connected: {0}")]
    NotConnected(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance {0} belongs to another user")]
    Forbidden(String),

    #[error("Instance already has a live session: {0}")]
    AlreadyActive(String),

    #[error("Message delivery failed: {0}")]
    DeliveryFailed(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
