mod bridge;
mod connector;
mod error;
mod process;

pub use bridge::BridgeManager;
pub use connector::IpcConnector;
pub use error::IpcError;
