//! Inspect command implementation.

use super::open_journal;
use offsync_engine::SyncJournal;
use offsync_storage::KeyValueStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Pull cursor, if any.
    pub cursor: Option<String>,
    /// Queued actions, head first.
    pub pending: Vec<PendingSummary>,
}

/// One queued action.
#[derive(Debug, Serialize)]
pub struct PendingSummary {
    /// Action id.
    pub id: String,
    /// Action kind.
    pub kind: String,
    /// Target conversation, when readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Message text, when readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// When the action was queued (RFC 3339).
    pub created_at: String,
}

/// Collects what the journal holds.
pub fn collect<S: KeyValueStore>(
    path: &Path,
    journal: &SyncJournal<S>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut pending = Vec::new();
    for action in journal.load_pending()? {
        let kind = serde_json::to_value(action.kind)?;
        let payload = action.send_message_payload();
        pending.push(PendingSummary {
            kind: kind.as_str().unwrap_or_default().to_string(),
            conversation_id: payload.as_ref().map(|p| p.conversation_id.clone()),
            body: payload.map(|p| p.body),
            created_at: action.created_at.to_rfc3339(),
            id: action.id,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        cursor: journal.load_cursor()?.map(|c| c.as_str().to_string()),
        pending,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let journal = open_journal(path)?;
    let result = collect(path, &journal)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("OffSync Store Inspection");
    println!("========================");
    println!();
    println!("Path:   {}", result.path);
    println!("Cursor: {}", result.cursor.as_deref().unwrap_or("(none)"));
    println!();
    println!("Pending actions: {}", result.pending.len());
    for action in &result.pending {
        match (&action.conversation_id, &action.body) {
            (Some(conversation), Some(body)) => println!(
                "  {}  {}  {}  {:?}",
                action.created_at, action.id, conversation, body
            ),
            _ => println!(
                "  {}  {}  {} (unreadable payload)",
                action.created_at, action.id, action.kind
            ),
        }
    }
}
