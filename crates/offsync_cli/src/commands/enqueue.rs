//! Enqueue command implementation.

use super::open_journal;
use offsync_engine::SyncJournal;
use offsync_protocol::PendingAction;
use offsync_storage::KeyValueStore;
use std::path::Path;
use tracing::info;

/// Appends a send-message action to the persisted queue.
///
/// Returns the new action.
pub fn append<S: KeyValueStore>(
    journal: &SyncJournal<S>,
    conversation_id: &str,
    body: &str,
) -> Result<PendingAction, Box<dyn std::error::Error>> {
    let mut pending = journal.load_pending()?;
    let action = PendingAction::send_message(conversation_id, body);
    pending.push(action.clone());
    journal.save_pending(&pending)?;
    Ok(action)
}

/// Runs the enqueue command.
pub fn run(path: &Path, conversation_id: &str, body: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Enqueueing message in {:?}", path);
    let journal = open_journal(path)?;
    let action = append(&journal, conversation_id, body)?;

    println!("✓ Queued action {}", action.id);
    println!("  Conversation: {conversation_id}");
    println!("  Queue length: {}", journal.load_pending()?.len());
    Ok(())
}
