mod credentials;
mod error;
mod events;
mod fanout;
mod lifecycle;
mod pipeline;
mod policy;
mod qr;
mod records;
mod registry;
mod worker;

pub use credentials::{CredentialStore, KeyStore, LoadedCredentials};
pub use error::{Result, WorkerError};
pub use events::{ClientEvent, ConnectionStatus, ReceivedMessage};
pub use fanout::{Fanout, Subscription};
pub use lifecycle::InstanceManager;
pub use policy::ReconnectPolicy;
pub use records::RecordWriter;
pub use registry::{SessionHandle, SessionRegistry};
pub use worker::MandaWorker;

pub use manda_db::{Contact, CredentialStats, Instance, InstanceOverview, InstanceStatus, Message};
