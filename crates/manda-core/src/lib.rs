mod credentials;
mod error;
mod events;
pub mod jid;
mod message;
mod protocol;
mod session;

pub use credentials::*;
pub use error::{ProtocolError, Result};
pub use events::*;
pub use message::*;
pub use protocol::*;
pub use session::*;
