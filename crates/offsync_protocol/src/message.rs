//! Outbound message drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::action::SendMessagePayload;

/// Structured metadata that can be attached to a draft.
///
/// Any `Serialize` type qualifies. Serialization may still fail at send
/// time (non-string map keys, a `Serialize` impl that refuses cyclic data),
/// and the sanitizer rejects such drafts instead of transmitting them.
pub trait MessageMetadata: fmt::Debug + Send + Sync {
    /// Serializes the metadata into a JSON value.
    fn to_json(&self) -> serde_json::Result<Value>;
}

impl<T> MessageMetadata for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// A message the user wants to send, before validation.
///
/// Drafts are ephemeral: one is built per send attempt.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    /// Target conversation.
    pub conversation_id: String,
    /// Message text, untrimmed.
    pub body: String,
    /// Optional structured metadata.
    pub metadata: Option<Arc<dyn MessageMetadata>>,
    /// Client-assigned id the remote deduplicates on.
    pub client_id: Option<String>,
    /// When the message was written.
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageDraft {
    /// Creates a draft without metadata or client id.
    pub fn new(conversation_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            body: body.into(),
            metadata: None,
            client_id: None,
            created_at: None,
        }
    }

    /// Builds a draft from a queued send-message payload.
    pub fn from_payload(payload: SendMessagePayload) -> Self {
        let mut draft = Self::new(payload.conversation_id, payload.body);
        if let Some(metadata) = payload.metadata {
            draft.metadata = Some(Arc::new(metadata));
        }
        draft
    }

    /// Attaches metadata.
    pub fn with_metadata(mut self, metadata: impl MessageMetadata + 'static) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    /// Sets the client correlation id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// The wire form of an accepted draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target conversation.
    pub conversation_id: String,
    /// Trimmed message text.
    pub body: String,
    /// Serialized metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Client correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl OutboundMessage {
    /// Builds the wire form from a draft and its already-serialized metadata.
    pub fn new(draft: &MessageDraft, metadata: Option<Value>) -> Self {
        Self {
            conversation_id: draft.conversation_id.clone(),
            body: draft.body.clone(),
            metadata,
            client_id: draft.client_id.clone(),
            created_at: draft.created_at,
        }
    }
}
