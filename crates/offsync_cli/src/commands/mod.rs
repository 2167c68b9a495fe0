//! CLI command implementations.

pub mod clear;
pub mod config;
pub mod enqueue;
pub mod inspect;
pub mod mode;
pub mod sanitize;

use offsync_engine::{ConfigOverrides, SyncConfig, SyncJournal};
use offsync_storage::FileStore;
use std::fs;
use std::path::Path;

/// Resolves configuration from the environment, then the optional
/// overrides file on top.
pub fn load_config(overrides: Option<&Path>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let mut layered = ConfigOverrides::from_env();
    if let Some(path) = overrides {
        let text = fs::read_to_string(path)?;
        layered = layered.merge(ConfigOverrides::from_json(&text)?);
    }
    Ok(SyncConfig::resolve(&layered))
}

/// Opens the journal of a store directory, creating it if needed.
pub fn open_journal(path: &Path) -> Result<SyncJournal<FileStore>, Box<dyn std::error::Error>> {
    Ok(SyncJournal::new(FileStore::open(path)?))
}
