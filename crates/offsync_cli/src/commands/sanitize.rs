//! Sanitize command implementation.

use offsync_engine::{MessageSanitizer, RejectionReason, SyncConfig};
use offsync_protocol::MessageDraft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// A draft as written in the input file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftInput {
    /// Target conversation.
    pub conversation_id: String,
    /// Message text.
    pub body: String,
    /// Optional metadata.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Optional client id.
    #[serde(default)]
    pub client_id: Option<String>,
}

impl From<DraftInput> for MessageDraft {
    fn from(input: DraftInput) -> Self {
        let mut draft = MessageDraft::new(input.conversation_id, input.body);
        if let Some(metadata) = input.metadata {
            draft = draft.with_metadata(metadata);
        }
        if let Some(client_id) = input.client_id {
            draft = draft.with_client_id(client_id);
        }
        draft
    }
}

/// Sanitizer verdict for one input draft.
#[derive(Debug, Serialize)]
pub struct Verdict {
    /// Position in the input file.
    pub index: usize,
    /// Whether the draft would be transmitted.
    pub accepted: bool,
    /// Trimmed body for accepted drafts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Why the draft was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    /// Computed size, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
}

/// Parses drafts and runs them through the sanitizer.
///
/// Verdicts come back in input order.
pub fn evaluate(
    sanitizer: &MessageSanitizer,
    json: &str,
) -> Result<Vec<Verdict>, Box<dyn std::error::Error>> {
    let inputs: Vec<DraftInput> = serde_json::from_str(json)?;
    // Client ids carry the input position through the partition
    let drafts = inputs.into_iter().enumerate().map(|(index, input)| {
        let mut draft = MessageDraft::from(input);
        let tag = format!("{index}:{}", draft.client_id.as_deref().unwrap_or(""));
        draft.client_id = Some(tag);
        draft
    });
    let batch = sanitizer.sanitize(drafts);

    let mut verdicts: Vec<Verdict> = batch
        .accepted
        .into_iter()
        .map(|accepted| Verdict {
            index: position(&accepted.draft),
            accepted: true,
            body: Some(accepted.draft.body),
            reason: None,
            bytes: Some(accepted.bytes),
        })
        .chain(batch.rejected.into_iter().map(|rejected| Verdict {
            index: position(&rejected.draft),
            accepted: false,
            body: None,
            reason: Some(rejected.reason),
            bytes: rejected.bytes,
        }))
        .collect();
    verdicts.sort_by_key(|v| v.index);
    Ok(verdicts)
}

fn position(draft: &MessageDraft) -> usize {
    draft
        .client_id
        .as_deref()
        .and_then(|tag| tag.split_once(':'))
        .and_then(|(index, _)| index.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Runs the sanitize command.
pub fn run(config: &SyncConfig, input: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let json = fs::read_to_string(input)?;
    let sanitizer = MessageSanitizer::new(config.backend_limits().max_message_bytes);
    let verdicts = evaluate(&sanitizer, &json)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&verdicts)?);
        }
        _ => {
            let accepted = verdicts.iter().filter(|v| v.accepted).count();
            println!(
                "{} drafts: {} accepted, {} rejected (budget {} bytes)",
                verdicts.len(),
                accepted,
                verdicts.len() - accepted,
                sanitizer.max_message_bytes()
            );
            for verdict in &verdicts {
                match (&verdict.reason, &verdict.body) {
                    (Some(reason), _) => match verdict.bytes {
                        Some(bytes) => println!("  #{:<4} rejected  {reason} ({bytes} bytes)", verdict.index),
                        None => println!("  #{:<4} rejected  {reason}", verdict.index),
                    },
                    (None, Some(body)) => println!("  #{:<4} accepted  {body:?}", verdict.index),
                    (None, None) => {}
                }
            }
        }
    }
    Ok(())
}
