//! Per-instance event pump: turns protocol events into persisted state and
//! client notifications, strictly in arrival order.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use manda_core::{
    ConnectionState, ConnectionUpdate, ContactUpdate, DisconnectReason, InboundMessage,
    MessageType, ProtocolEvent, jid,
};
use manda_db::{Contact, InstanceStatus, InstanceUpdate, NewMessage};

use crate::events::{ClientEvent, ConnectionStatus, ReceivedMessage};
use crate::lifecycle::InstanceManager;
use crate::qr;
use crate::registry::SessionHandle;

const RECEIVED: &str = "received";

impl InstanceManager {
    pub(crate) async fn run_pump(
        self: Arc<Self>,
        handle: Arc<SessionHandle>,
        mut events: mpsc::Receiver<ProtocolEvent>,
    ) {
        debug!(instance_id = %handle.instance_id, generation = %handle.generation, "Event pump started");

        while let Some(event) = events.recv().await {
            let flow = match event {
                ProtocolEvent::ConnectionUpdate(update) => {
                    self.on_connection_update(&handle, update).await
                }
                ProtocolEvent::CredentialsUpdate(creds) => {
                    handle.keys.persist_identity(&creds);
                    ControlFlow::Continue(())
                }
                ProtocolEvent::Messages(messages) => {
                    for message in messages {
                        self.on_message(&handle, message).await;
                    }
                    ControlFlow::Continue(())
                }
                ProtocolEvent::Contacts(contacts) => {
                    for contact in contacts {
                        self.on_contact(&handle, contact);
                    }
                    ControlFlow::Continue(())
                }
            };

            if flow.is_break() {
                return;
            }
        }

        debug!(instance_id = %handle.instance_id, "Event stream ended without close");
        self.on_close(&handle, DisconnectReason::ConnectionLost).await;
    }

    async fn on_connection_update(
        self: &Arc<Self>,
        handle: &Arc<SessionHandle>,
        update: ConnectionUpdate,
    ) -> ControlFlow<()> {
        if let Some(qr) = update.qr.as_deref().filter(|qr| !qr.is_empty()) {
            self.on_pairing_code(handle, qr).await;
        }

        match update.connection {
            Some(ConnectionState::Close) => {
                let reason = update.disconnect.unwrap_or(DisconnectReason::Unknown(None));
                self.on_close(handle, reason).await;
                ControlFlow::Break(())
            }
            Some(ConnectionState::Open) => self.on_open(handle, update.user_id).await,
            Some(ConnectionState::Connecting) | None => ControlFlow::Continue(()),
        }
    }

    async fn on_pairing_code(&self, handle: &SessionHandle, qr: &str) {
        let instance_id = &handle.instance_id;
        let Some(data_url) = qr::render_data_url(qr) else {
            warn!(instance_id = %instance_id, "Could not render pairing code");
            return;
        };

        self.update_instance(
            instance_id,
            InstanceUpdate::status(InstanceStatus::Connecting).with_qr_code(Some(data_url.clone())),
        )
        .await;
        self.fanout
            .emit(&handle.user_id, ClientEvent::qr_code(instance_id, Some(data_url)))
            .await;

        debug!(instance_id = %instance_id, "Pairing code published");
    }

    async fn on_close(self: &Arc<Self>, handle: &Arc<SessionHandle>, reason: DisconnectReason) {
        let instance_id = &handle.instance_id;
        if self
            .registry()
            .current(instance_id, handle.generation)
            .await
            .is_none()
        {
            debug!(instance_id = %instance_id, ?reason, "Close for superseded session");
            return;
        }

        if reason.is_terminal() {
            info!(instance_id = %instance_id, ?reason, "Logged out");
            self.spawn_teardown(handle, "logged out");
            return;
        }

        warn!(instance_id = %instance_id, ?reason, "Connection closed");
        self.update_instance(
            instance_id,
            InstanceUpdate::status(InstanceStatus::Connecting).with_qr_code(None),
        )
        .await;
        self.schedule_reconnect(handle).await;
    }

    async fn on_open(
        self: &Arc<Self>,
        handle: &Arc<SessionHandle>,
        user_id: Option<String>,
    ) -> ControlFlow<()> {
        let instance_id = &handle.instance_id;
        let phone = handle
            .connection
            .user_id()
            .or(user_id)
            .as_deref()
            .and_then(jid::phone_from_user_id);

        if let Some(phone) = phone.as_deref() {
            match self.db.find_connected_by_phone(phone, instance_id).await {
                Ok(Some(existing)) => {
                    warn!(
                        instance_id = %instance_id,
                        existing = %existing.id,
                        phone = %jid::format_phone_number(phone),
                        "Phone number already connected on another instance"
                    );
                    self.spawn_teardown(handle, "phone number collision");
                    return ControlFlow::Break(());
                }
                Ok(None) => {}
                Err(e) => warn!(instance_id = %instance_id, error = %e, "Phone collision check failed"),
            }
        }

        handle.reset_attempts();
        self.update_instance(
            instance_id,
            InstanceUpdate::status(InstanceStatus::Connected)
                .with_phone_number(phone.clone())
                .with_qr_code(None),
        )
        .await;

        self.fanout
            .emit(
                &handle.user_id,
                ClientEvent::ConnectionUpdate {
                    instance_id: instance_id.clone(),
                    status: ConnectionStatus::Connected,
                    phone_number: phone.clone(),
                },
            )
            .await;
        self.fanout
            .emit(&handle.user_id, ClientEvent::qr_code(instance_id, None))
            .await;

        let display_phone = phone.as_deref().map(jid::format_phone_number).unwrap_or_default();
        info!(instance_id = %instance_id, phone = %display_phone, "Instance connected");
        ControlFlow::Continue(())
    }

    async fn on_message(&self, handle: &SessionHandle, message: InboundMessage) {
        let instance_id = &handle.instance_id;
        let Some(remote_jid) = message.remote_jid() else {
            return;
        };
        if message.key.from_me || message.is_broadcast() {
            return;
        }
        let Some(message_id) = message.key.id.as_deref().filter(|id| !id.is_empty()) else {
            debug!(instance_id = %instance_id, "Skipping message without id");
            return;
        };

        let text = message.text().map(str::to_string);
        let message_type = message.message_type();
        if message_type == MessageType::Text && text.is_none() {
            debug!(instance_id = %instance_id, message_id, "Skipping message without content");
            return;
        }

        let Some(contact) = self
            .resolve_contact(instance_id, remote_jid, message.push_name.as_deref())
            .await
        else {
            return;
        };

        let timestamp = message
            .message_timestamp
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let record = NewMessage {
            message_id: message_id.to_string(),
            from_me: false,
            text,
            message_type: message_type.as_str().to_string(),
            timestamp,
            status: Some(RECEIVED.to_string()),
            contact_id: contact.id,
            instance_id: instance_id.clone(),
        };

        self.fanout
            .emit(
                &handle.user_id,
                ClientEvent::MessageReceived {
                    instance_id: instance_id.clone(),
                    message: ReceivedMessage {
                        message: record.clone(),
                        contact,
                    },
                },
            )
            .await;

        handle.records.message(record);
    }

    async fn resolve_contact(
        &self,
        instance_id: &str,
        remote_jid: &str,
        push_name: Option<&str>,
    ) -> Option<Contact> {
        match self.db.get_contact_by_jid(instance_id, remote_jid).await {
            Ok(Some(contact)) => return Some(contact),
            Ok(None) => {}
            Err(e) => {
                error!(instance_id, jid = remote_jid, error = %e, "Contact lookup failed");
                return None;
            }
        }

        let name = push_name.filter(|name| !name.is_empty());
        match self
            .db
            .create_contact(instance_id, remote_jid, jid::phone_from_jid(remote_jid), name)
            .await
        {
            Ok(contact) => Some(contact),
            Err(e) => {
                error!(instance_id, jid = remote_jid, error = %e, "Failed to create contact");
                None
            }
        }
    }

    fn on_contact(&self, handle: &SessionHandle, contact: ContactUpdate) {
        let Some(contact_jid) = contact.id.clone().filter(|id| !id.is_empty()) else {
            return;
        };

        handle.records.contact(
            contact_jid,
            contact.display_name().map(str::to_string),
            contact.img_url,
        );
    }
}
