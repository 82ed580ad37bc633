use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use manda_core::jid;
use manda_db::{MandaDb, NewMessage};

enum RecordWrite {
    Message(NewMessage),
    Contact {
        jid: String,
        name: Option<String>,
        profile_pic: Option<String>,
    },
    Flush(oneshot::Sender<()>),
}

/// Persists the messages and contacts one session ingests, in the order they
/// were queued. Callers never wait on storage; failures are logged.
pub struct RecordWriter {
    instance_id: String,
    writes: mpsc::UnboundedSender<RecordWrite>,
}

impl RecordWriter {
    pub(crate) fn spawn(db: Arc<MandaDb>, instance_id: &str) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_records(db, instance_id.to_string(), rx));

        Self {
            instance_id: instance_id.to_string(),
            writes,
        }
    }

    pub(crate) fn message(&self, record: NewMessage) {
        self.enqueue(RecordWrite::Message(record));
    }

    pub(crate) fn contact(&self, jid: String, name: Option<String>, profile_pic: Option<String>) {
        self.enqueue(RecordWrite::Contact {
            jid,
            name,
            profile_pic,
        });
    }

    /// Waits until every write queued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(RecordWrite::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn enqueue(&self, write: RecordWrite) {
        if self.writes.send(write).is_err() {
            warn!(instance_id = %self.instance_id, "Record writer gone, write dropped");
        }
    }
}

async fn write_records(db: Arc<MandaDb>, instance_id: String, mut rx: mpsc::UnboundedReceiver<RecordWrite>) {
    while let Some(write) = rx.recv().await {
        match write {
            RecordWrite::Message(record) => match db.insert_message(&record).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    instance_id = %instance_id,
                    message_id = %record.message_id,
                    "Duplicate message ignored"
                ),
                Err(e) => error!(
                    instance_id = %instance_id,
                    message_id = %record.message_id,
                    error = %e,
                    "Failed to persist message"
                ),
            },
            RecordWrite::Contact {
                jid: contact_jid,
                name,
                profile_pic,
            } => {
                let result = db
                    .upsert_contact(
                        &instance_id,
                        &contact_jid,
                        name.as_deref(),
                        jid::phone_from_jid(&contact_jid),
                        profile_pic.as_deref(),
                    )
                    .await;

                if let Err(e) = result {
                    warn!(instance_id = %instance_id, jid = %contact_jid, error = %e, "Failed to save contact");
                }
            }
            RecordWrite::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
