use serde::{Deserialize, Serialize};

use crate::jid;

/// Kind of content carried by an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaContent {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// The populated fields of a protocol message body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default, rename = "extendedTextMessage")]
    pub extended_text: Option<ExtendedText>,
    #[serde(default, rename = "imageMessage")]
    pub image: Option<MediaContent>,
    #[serde(default, rename = "videoMessage")]
    pub video: Option<MediaContent>,
    #[serde(default, rename = "audioMessage")]
    pub audio: Option<MediaContent>,
    #[serde(default, rename = "documentMessage")]
    pub document: Option<MediaContent>,
}

impl MessageContent {
    /// First non-empty of plain text, extended text, image caption, video caption.
    pub fn text(&self) -> Option<&str> {
        [
            self.conversation.as_deref(),
            self.extended_text.as_ref().and_then(|t| t.text.as_deref()),
            self.image.as_ref().and_then(|m| m.caption.as_deref()),
            self.video.as_ref().and_then(|m| m.caption.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
    }

    pub fn message_type(&self) -> MessageType {
        if self.image.is_some() {
            MessageType::Image
        } else if self.video.is_some() {
            MessageType::Video
        } else if self.audio.is_some() {
            MessageType::Audio
        } else if self.document.is_some() {
            MessageType::Document
        } else {
            MessageType::Text
        }
    }
}

/// A message delivered by the protocol layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub message_timestamp: Option<i64>,
    #[serde(default)]
    pub push_name: Option<String>,
}

impl InboundMessage {
    pub fn remote_jid(&self) -> Option<&str> {
        self.key.remote_jid.as_deref().filter(|j| !j.is_empty())
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast || self.remote_jid().is_some_and(jid::is_broadcast)
    }

    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(MessageContent::text)
    }

    pub fn message_type(&self) -> MessageType {
        self.message
            .as_ref()
            .map(MessageContent::message_type)
            .unwrap_or(MessageType::Text)
    }
}

/// A contact change observed by the protocol layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpdate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
    #[serde(default)]
    pub img_url: Option<String>,
}

impl ContactUpdate {
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.notify.as_deref().filter(|n| !n.is_empty()))
    }
}
