use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    identity::{identity, MessageIdentity},
    protocol::{nullable_text, wire_time, BROADCAST_SENTINEL},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    File,
    Image,
    Join,
    Leave,
}

impl MessageKind {
    pub fn is_presence(self) -> bool {
        matches!(self, MessageKind::Join | MessageKind::Leave)
    }

    pub fn for_upload(mime_type: Option<&str>) -> Self {
        match mime_type {
            Some(mime) if mime.starts_with("image/") => MessageKind::Image,
            _ => MessageKind::File,
        }
    }
}

/// Conversation bucket. The broadcast bucket is its own variant so that no
/// peer identity can ever alias it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "peer", rename_all = "snake_case")]
pub enum BucketKey {
    Broadcast,
    Peer(String),
}

impl BucketKey {
    pub fn peer(name: impl Into<String>) -> Self {
        BucketKey::Peer(name.into())
    }

    pub fn from_wire(receiver: Option<&str>) -> Self {
        match receiver {
            None => BucketKey::Broadcast,
            Some(name) if name == BROADCAST_SENTINEL => BucketKey::Broadcast,
            Some(name) => BucketKey::Peer(name.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            BucketKey::Broadcast => BROADCAST_SENTINEL,
            BucketKey::Peer(name) => name,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, BucketKey::Broadcast)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Broadcast => f.write_str("<broadcast>"),
            BucketKey::Peer(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, deserialize_with = "nullable_text::deserialize")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn text(
        sender: impl Into<String>,
        receiver: &BucketKey,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: MessageKind::Text,
            sender: sender.into(),
            receiver: Some(receiver.as_wire().to_string()),
            content: content.into(),
            file_name: None,
            file_type: None,
            file_size: None,
            timestamp,
        }
    }

    pub fn presence(kind: MessageKind, sender: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            sender: sender.into(),
            receiver: None,
            content: String::new(),
            file_name: None,
            file_type: None,
            file_size: None,
            timestamp,
        }
    }

    pub fn identity(&self) -> MessageIdentity {
        identity(&self.sender, self.timestamp, &self.content)
    }

    pub fn addressed_bucket(&self) -> BucketKey {
        BucketKey::from_wire(self.receiver.as_deref())
    }

    pub fn is_broadcast(&self) -> bool {
        self.addressed_bucket().is_broadcast()
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self.kind, MessageKind::File | MessageKind::Image)
    }
}
