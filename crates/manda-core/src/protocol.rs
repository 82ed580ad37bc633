use serde::{Deserialize, Serialize};

use crate::events::{IpcCommand, IpcEvent};

/// One NDJSON line exchanged with the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    pub id: String,
    #[serde(flatten)]
    pub content: IpcMessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessageContent {
    Command(IpcCommand),
    Event(IpcEvent),
}

impl IpcMessage {
    pub fn new_command(command: IpcCommand) -> Self {
        Self {
            id: generate_id(),
            content: IpcMessageContent::Command(command),
        }
    }

    pub fn new_event(event: IpcEvent) -> Self {
        Self {
            id: generate_id(),
            content: IpcMessageContent::Event(event),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default() + "\n"
    }

    pub fn from_line(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }

    pub fn into_event(self) -> Option<IpcEvent> {
        match self.content {
            IpcMessageContent::Event(event) => Some(event),
            IpcMessageContent::Command(_) => None,
        }
    }
}

fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    // Nanos alone collide when two commands go out within the same tick.
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", nanos, seq)
}
