//! Pending actions queued while offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of user operation a pending action represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Send a chat message to a conversation.
    SendMessage,
}

/// A user operation queued locally until the remote confirms it.
///
/// # Invariants
///
/// - `id` is unique within a queue and doubles as the client correlation id
///   sent to the remote, which deduplicates on it.
/// - Once the remote confirms an action, it is removed from the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique identifier.
    pub id: String,
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Kind-specific payload.
    pub payload: Value,
    /// When the user performed the action.
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    /// Creates an action with a fresh id and the current time.
    pub fn new(kind: ActionKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Creates a send-message action.
    pub fn send_message(conversation_id: impl Into<String>, body: impl Into<String>) -> Self {
        let payload = SendMessagePayload {
            conversation_id: conversation_id.into(),
            body: body.into(),
            metadata: None,
        };
        Self::new(ActionKind::SendMessage, payload.to_value())
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Decodes the payload of a send-message action.
    ///
    /// Returns `None` for other kinds or for payloads of the wrong shape.
    pub fn send_message_payload(&self) -> Option<SendMessagePayload> {
        match self.kind {
            ActionKind::SendMessage => serde_json::from_value(self.payload.clone()).ok(),
        }
    }
}

/// Payload of an [`ActionKind::SendMessage`] action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    /// Target conversation.
    pub conversation_id: String,
    /// Message text as typed by the user.
    pub body: String,
    /// Optional structured metadata (attachments, location, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl SendMessagePayload {
    /// Converts the payload into the JSON stored on the action.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "conversation_id": self.conversation_id,
            "body": self.body,
            "metadata": self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_round_trip() {
        let action = PendingAction::send_message("conv-1", "hello");
        assert_eq!(action.kind, ActionKind::SendMessage);

        let payload = action.send_message_payload().unwrap();
        assert_eq!(payload.conversation_id, "conv-1");
        assert_eq!(payload.body, "hello");
        assert_eq!(payload.metadata, None);
    }

    #[test]
    fn ids_are_unique() {
        let a = PendingAction::send_message("c", "x");
        let b = PendingAction::send_message("c", "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn wire_format_uses_type_key() {
        let action = PendingAction::send_message("c", "x").with_id("a-1");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "send_message");
        assert_eq!(json["id"], "a-1");
    }

    #[test]
    fn malformed_payload_is_none() {
        let action = PendingAction::new(ActionKind::SendMessage, serde_json::json!({"x": 1}));
        assert!(action.send_message_payload().is_none());
    }
}
