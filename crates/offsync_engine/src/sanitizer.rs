//! Validation and trimming of outbound message drafts.

use offsync_protocol::{MessageDraft, OutboundMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a draft was not transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The body was empty after trimming.
    EmptyBody,
    /// Trimmed body plus serialized metadata exceeded the byte budget.
    Oversize,
    /// The metadata could not be serialized.
    MetadataNotSerializable,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectionReason::EmptyBody => "empty_body",
            RejectionReason::Oversize => "oversize",
            RejectionReason::MetadataNotSerializable => "metadata_not_serializable",
        })
    }
}

/// A draft the sanitizer refused, with the reason.
#[derive(Debug, Clone)]
pub struct SanitizedMessageRejection {
    /// The original, untrimmed draft.
    pub draft: MessageDraft,
    /// Why it was refused.
    pub reason: RejectionReason,
    /// Computed size, for [`RejectionReason::Oversize`].
    pub bytes: Option<usize>,
}

/// A draft that passed validation.
#[derive(Debug, Clone)]
pub struct AcceptedDraft {
    /// The draft with its body trimmed; other fields unchanged.
    pub draft: MessageDraft,
    /// Metadata as serialized during validation.
    pub metadata: Option<Value>,
    /// Transmission size in bytes.
    pub bytes: usize,
}

impl AcceptedDraft {
    /// Wire form of the accepted draft.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage::new(&self.draft, self.metadata.clone())
    }
}

/// Result of sanitizing a batch. Every input lands in exactly one list.
#[derive(Debug, Clone, Default)]
pub struct SanitizedBatch {
    /// Accepted drafts, in input order.
    pub accepted: Vec<AcceptedDraft>,
    /// Rejected drafts, in input order.
    pub rejected: Vec<SanitizedMessageRejection>,
}

/// Decides which drafts may be transmitted.
///
/// Sanitization is idempotent: feeding an accepted draft back in yields
/// the same decision and the same body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSanitizer {
    max_message_bytes: usize,
}

impl MessageSanitizer {
    /// Creates a sanitizer with the given per-message byte budget.
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }

    /// The per-message byte budget.
    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Partitions drafts into accepted and rejected.
    pub fn sanitize(&self, drafts: impl IntoIterator<Item = MessageDraft>) -> SanitizedBatch {
        let mut batch = SanitizedBatch::default();
        for draft in drafts {
            match self.check(&draft) {
                Ok((metadata, bytes)) => {
                    let mut trimmed = draft;
                    trimmed.body = trimmed.body.trim().to_string();
                    batch.accepted.push(AcceptedDraft {
                        draft: trimmed,
                        metadata,
                        bytes,
                    });
                }
                Err((reason, bytes)) => batch.rejected.push(SanitizedMessageRejection {
                    draft,
                    reason,
                    bytes,
                }),
            }
        }
        batch
    }

    fn check(
        &self,
        draft: &MessageDraft,
    ) -> Result<(Option<Value>, usize), (RejectionReason, Option<usize>)> {
        let body = draft.body.trim();
        if body.is_empty() {
            return Err((RejectionReason::EmptyBody, None));
        }

        let mut bytes = body.len();
        let metadata = match &draft.metadata {
            None => None,
            Some(metadata) => {
                let value = metadata
                    .to_json()
                    .map_err(|_| (RejectionReason::MetadataNotSerializable, None))?;
                let text = serde_json::to_string(&value)
                    .map_err(|_| (RejectionReason::MetadataNotSerializable, None))?;
                bytes += text.len();
                Some(value)
            }
        };

        if bytes > self.max_message_bytes {
            return Err((RejectionReason::Oversize, Some(bytes)));
        }
        Ok((metadata, bytes))
    }
}
