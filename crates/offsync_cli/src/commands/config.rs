//! Config command implementation.

use offsync_engine::{ConfigSource, SyncConfig};
use serde::Serialize;

/// One resolved option.
#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    /// Option name.
    pub key: &'static str,
    /// Environment variable.
    pub env: &'static str,
    /// Effective value.
    pub value: u64,
    /// Where the value came from.
    pub source: ConfigSource,
    /// Smallest accepted value.
    pub min: u64,
    /// Largest accepted value.
    pub max: u64,
}

/// Flattens a config into printable entries.
pub fn entries(config: &SyncConfig) -> Vec<ConfigEntry> {
    config
        .entries()
        .into_iter()
        .map(|(def, setting)| ConfigEntry {
            key: def.key,
            env: def.env,
            value: setting.value,
            source: setting.source,
            min: def.min,
            max: def.max,
        })
        .collect()
}

/// Runs the config command.
pub fn run(config: &SyncConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = entries(config);
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!("OffSync Configuration");
            println!("=====================");
            println!();
            for entry in &entries {
                println!(
                    "  {:<24} {:>8}  {:<8}  [{}..={}]",
                    entry.key, entry.value, entry.source, entry.min, entry.max
                );
            }
            if entries.iter().any(|e| e.source == ConfigSource::Clamped) {
                println!();
                println!("Some values were outside their range and have been clamped.");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_report_sources() {
        let config = SyncConfig::default()
            .with_normal_batch_limit(10)
            .with_base_backoff_ms(1);
        let entries = entries(&config);

        assert_eq!(entries.len(), 7);
        let normal = entries
            .iter()
            .find(|e| e.key == "syncNormalBatchLimit")
            .unwrap();
        assert_eq!((normal.value, normal.source), (10, ConfigSource::Explicit));

        let backoff = entries
            .iter()
            .find(|e| e.key == "syncBaseBackoffMs")
            .unwrap();
        assert_eq!((backoff.value, backoff.source), (100, ConfigSource::Clamped));

        let pull = entries
            .iter()
            .find(|e| e.key == "backendMaxPullLimit")
            .unwrap();
        assert_eq!(pull.source, ConfigSource::Default);
    }
}
