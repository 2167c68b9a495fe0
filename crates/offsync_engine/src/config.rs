//! Configuration for the sync engine.
//!
//! Every option has a declared default and an inclusive `[min, max]`
//! range. Explicit values are clamped into range, and each resolved
//! value remembers whether it came from the default, from explicit
//! configuration, or was clamped.

use crate::error::{SyncError, SyncResult};
use crate::state::BatchLimits;
use offsync_protocol::NetworkState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Where a resolved configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// The declared default was used.
    Default,
    /// An explicit value was used as given.
    Explicit,
    /// An explicit value was outside the declared range and was clamped.
    Clamped,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::Default => "default",
            ConfigSource::Explicit => "explicit",
            ConfigSource::Clamped => "clamped",
        })
    }
}

/// A resolved configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    /// The effective value.
    pub value: u64,
    /// Where it came from.
    pub source: ConfigSource,
}

/// Declaration of a configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingDef {
    /// Name used in configuration documents.
    pub key: &'static str,
    /// Environment variable that overrides it.
    pub env: &'static str,
    /// Value used when nothing is configured.
    pub default: u64,
    /// Smallest accepted value.
    pub min: u64,
    /// Largest accepted value.
    pub max: u64,
}

impl SettingDef {
    /// Resolves an optional explicit value against this declaration.
    pub fn resolve(&self, explicit: Option<u64>) -> Setting {
        match explicit {
            None => Setting {
                value: self.default,
                source: ConfigSource::Default,
            },
            Some(value) => {
                let clamped = value.clamp(self.min, self.max);
                Setting {
                    value: clamped,
                    source: if clamped == value {
                        ConfigSource::Explicit
                    } else {
                        ConfigSource::Clamped
                    },
                }
            }
        }
    }
}

/// Hard ceiling on the number of messages the backend accepts per call.
pub const BACKEND_MAX_MESSAGE_BATCH: SettingDef = SettingDef {
    key: "backendMaxMessageBatch",
    env: "OFFSYNC_BACKEND_MAX_MESSAGE_BATCH",
    default: 50,
    min: 1,
    max: 200,
};

/// Hard ceiling on the per-collection row cap of a pull.
pub const BACKEND_MAX_PULL_LIMIT: SettingDef = SettingDef {
    key: "backendMaxPullLimit",
    env: "OFFSYNC_BACKEND_MAX_PULL_LIMIT",
    default: 200,
    min: 1,
    max: 1000,
};

/// Batch target on an unconstrained link.
pub const SYNC_NORMAL_BATCH_LIMIT: SettingDef = SettingDef {
    key: "syncNormalBatchLimit",
    env: "OFFSYNC_SYNC_NORMAL_BATCH_LIMIT",
    default: 25,
    min: 1,
    max: 200,
};

/// Batch target on a satellite or constrained link.
pub const SYNC_SATELLITE_BATCH_LIMIT: SettingDef = SettingDef {
    key: "syncSatelliteBatchLimit",
    env: "OFFSYNC_SYNC_SATELLITE_BATCH_LIMIT",
    default: 5,
    min: 1,
    max: 50,
};

/// Batch target on an ultra-constrained link.
pub const SYNC_ULTRA_BATCH_LIMIT: SettingDef = SettingDef {
    key: "syncUltraBatchLimit",
    env: "OFFSYNC_SYNC_ULTRA_BATCH_LIMIT",
    default: 1,
    min: 1,
    max: 10,
};

/// Base delay of the retry backoff, in milliseconds.
pub const SYNC_BASE_BACKOFF_MS: SettingDef = SettingDef {
    key: "syncBaseBackoffMs",
    env: "OFFSYNC_SYNC_BASE_BACKOFF_MS",
    default: 2_000,
    min: 100,
    max: 300_000,
};

/// Byte budget of one message (trimmed body plus serialized metadata).
pub const MAX_MESSAGE_BYTES: SettingDef = SettingDef {
    key: "maxMessageBytes",
    env: "OFFSYNC_MAX_MESSAGE_BYTES",
    default: 4_096,
    min: 1,
    max: 65_536,
};

/// Every declared option, in display order.
pub const ALL_SETTINGS: [SettingDef; 7] = [
    BACKEND_MAX_MESSAGE_BATCH,
    BACKEND_MAX_PULL_LIMIT,
    SYNC_NORMAL_BATCH_LIMIT,
    SYNC_SATELLITE_BATCH_LIMIT,
    SYNC_ULTRA_BATCH_LIMIT,
    SYNC_BASE_BACKOFF_MS,
    MAX_MESSAGE_BYTES,
];

/// Explicit configuration values, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigOverrides {
    /// See [`BACKEND_MAX_MESSAGE_BATCH`].
    pub backend_max_message_batch: Option<u64>,
    /// See [`BACKEND_MAX_PULL_LIMIT`].
    pub backend_max_pull_limit: Option<u64>,
    /// See [`SYNC_NORMAL_BATCH_LIMIT`].
    pub sync_normal_batch_limit: Option<u64>,
    /// See [`SYNC_SATELLITE_BATCH_LIMIT`].
    pub sync_satellite_batch_limit: Option<u64>,
    /// See [`SYNC_ULTRA_BATCH_LIMIT`].
    pub sync_ultra_batch_limit: Option<u64>,
    /// See [`SYNC_BASE_BACKOFF_MS`].
    pub sync_base_backoff_ms: Option<u64>,
    /// See [`MAX_MESSAGE_BYTES`].
    pub max_message_bytes: Option<u64>,
}

impl ConfigOverrides {
    /// Parses overrides from a JSON document.
    ///
    /// Unknown keys are rejected so that typos do not silently fall back
    /// to defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Reads overrides from `OFFSYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads overrides through an arbitrary variable lookup.
    ///
    /// Values that do not parse as unsigned integers are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |def: &SettingDef| {
            let raw = lookup(def.env)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(variable = def.env, value = %raw, "ignoring unparseable setting");
                    None
                }
            }
        };

        Self {
            backend_max_message_batch: read(&BACKEND_MAX_MESSAGE_BATCH),
            backend_max_pull_limit: read(&BACKEND_MAX_PULL_LIMIT),
            sync_normal_batch_limit: read(&SYNC_NORMAL_BATCH_LIMIT),
            sync_satellite_batch_limit: read(&SYNC_SATELLITE_BATCH_LIMIT),
            sync_ultra_batch_limit: read(&SYNC_ULTRA_BATCH_LIMIT),
            sync_base_backoff_ms: read(&SYNC_BASE_BACKOFF_MS),
            max_message_bytes: read(&MAX_MESSAGE_BYTES),
        }
    }

    /// Layers `other` on top of `self`; values set in `other` win.
    pub fn merge(self, other: ConfigOverrides) -> Self {
        Self {
            backend_max_message_batch: other
                .backend_max_message_batch
                .or(self.backend_max_message_batch),
            backend_max_pull_limit: other.backend_max_pull_limit.or(self.backend_max_pull_limit),
            sync_normal_batch_limit: other
                .sync_normal_batch_limit
                .or(self.sync_normal_batch_limit),
            sync_satellite_batch_limit: other
                .sync_satellite_batch_limit
                .or(self.sync_satellite_batch_limit),
            sync_ultra_batch_limit: other.sync_ultra_batch_limit.or(self.sync_ultra_batch_limit),
            sync_base_backoff_ms: other.sync_base_backoff_ms.or(self.sync_base_backoff_ms),
            max_message_bytes: other.max_message_bytes.or(self.max_message_bytes),
        }
    }
}

/// Resolved configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Hard ceiling on transmitted batch size.
    pub backend_max_message_batch: Setting,
    /// Hard ceiling on the pull row cap.
    pub backend_max_pull_limit: Setting,
    /// Batch target on an unconstrained link.
    pub normal_batch_limit: Setting,
    /// Batch target on a satellite or constrained link.
    pub satellite_batch_limit: Setting,
    /// Batch target on an ultra-constrained link.
    pub ultra_batch_limit: Setting,
    /// Backoff base in milliseconds.
    pub base_backoff_ms: Setting,
    /// Per-message byte budget.
    pub max_message_bytes: Setting,
}

impl SyncConfig {
    /// Resolves a configuration from explicit overrides.
    pub fn resolve(overrides: &ConfigOverrides) -> Self {
        Self {
            backend_max_message_batch: BACKEND_MAX_MESSAGE_BATCH
                .resolve(overrides.backend_max_message_batch),
            backend_max_pull_limit: BACKEND_MAX_PULL_LIMIT.resolve(overrides.backend_max_pull_limit),
            normal_batch_limit: SYNC_NORMAL_BATCH_LIMIT.resolve(overrides.sync_normal_batch_limit),
            satellite_batch_limit: SYNC_SATELLITE_BATCH_LIMIT
                .resolve(overrides.sync_satellite_batch_limit),
            ultra_batch_limit: SYNC_ULTRA_BATCH_LIMIT.resolve(overrides.sync_ultra_batch_limit),
            base_backoff_ms: SYNC_BASE_BACKOFF_MS.resolve(overrides.sync_base_backoff_ms),
            max_message_bytes: MAX_MESSAGE_BYTES.resolve(overrides.max_message_bytes),
        }
    }

    /// Resolves a configuration from `OFFSYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::resolve(&ConfigOverrides::from_env())
    }

    /// Sets the backend message batch ceiling.
    pub fn with_backend_max_message_batch(mut self, value: u64) -> Self {
        self.backend_max_message_batch = BACKEND_MAX_MESSAGE_BATCH.resolve(Some(value));
        self
    }

    /// Sets the backend pull row ceiling.
    pub fn with_backend_max_pull_limit(mut self, value: u64) -> Self {
        self.backend_max_pull_limit = BACKEND_MAX_PULL_LIMIT.resolve(Some(value));
        self
    }

    /// Sets the normal-mode batch target.
    pub fn with_normal_batch_limit(mut self, value: u64) -> Self {
        self.normal_batch_limit = SYNC_NORMAL_BATCH_LIMIT.resolve(Some(value));
        self
    }

    /// Sets the satellite-mode batch target.
    pub fn with_satellite_batch_limit(mut self, value: u64) -> Self {
        self.satellite_batch_limit = SYNC_SATELLITE_BATCH_LIMIT.resolve(Some(value));
        self
    }

    /// Sets the ultra-constrained batch target.
    pub fn with_ultra_batch_limit(mut self, value: u64) -> Self {
        self.ultra_batch_limit = SYNC_ULTRA_BATCH_LIMIT.resolve(Some(value));
        self
    }

    /// Sets the backoff base.
    pub fn with_base_backoff_ms(mut self, value: u64) -> Self {
        self.base_backoff_ms = SYNC_BASE_BACKOFF_MS.resolve(Some(value));
        self
    }

    /// Sets the per-message byte budget.
    pub fn with_max_message_bytes(mut self, value: u64) -> Self {
        self.max_message_bytes = MAX_MESSAGE_BYTES.resolve(Some(value));
        self
    }

    /// Per-mode batch targets for the state machine.
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits::new(
            self.normal_batch_limit.value as usize,
            self.satellite_batch_limit.value as usize,
        )
        .with_ultra(self.ultra_batch_limit.value as usize)
    }

    /// Backend-enforced ceilings for the send and pull paths.
    pub fn backend_limits(&self) -> BackendLimits {
        BackendLimits {
            max_message_batch: self.backend_max_message_batch.value as usize,
            max_pull_limit: self.backend_max_pull_limit.value as u32,
            max_message_bytes: self.max_message_bytes.value as usize,
        }
    }

    /// Backoff policy derived from the base delay.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(self.base_backoff_ms.value))
    }

    /// Every option with its declaration and resolved value.
    pub fn entries(&self) -> [(SettingDef, Setting); 7] {
        [
            (BACKEND_MAX_MESSAGE_BATCH, self.backend_max_message_batch),
            (BACKEND_MAX_PULL_LIMIT, self.backend_max_pull_limit),
            (SYNC_NORMAL_BATCH_LIMIT, self.normal_batch_limit),
            (SYNC_SATELLITE_BATCH_LIMIT, self.satellite_batch_limit),
            (SYNC_ULTRA_BATCH_LIMIT, self.ultra_batch_limit),
            (SYNC_BASE_BACKOFF_MS, self.base_backoff_ms),
            (MAX_MESSAGE_BYTES, self.max_message_bytes),
        ]
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::resolve(&ConfigOverrides::default())
    }
}

/// Ceilings the remote enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendLimits {
    /// Maximum messages per send call.
    pub max_message_batch: usize,
    /// Maximum rows per collection per pull.
    pub max_pull_limit: u32,
    /// Maximum bytes per message.
    pub max_message_bytes: usize,
}

impl Default for BackendLimits {
    fn default() -> Self {
        SyncConfig::default().backend_limits()
    }
}

/// Exponential backoff with link-aware multipliers.
///
/// `delay = base × multiplier × 2^min(attempt, 4)`, where the multiplier
/// is 4 on an ultra-constrained link, 2 on a constrained or satellite
/// link and 1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay.
    pub base: Duration,
    /// Largest exponent applied to the failure counter.
    pub max_exponent: u32,
}

impl BackoffPolicy {
    /// Creates a policy with the given base delay.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max_exponent: 4,
        }
    }

    /// Multiplier for the given link.
    pub fn multiplier(network: &NetworkState) -> u32 {
        if network.ultra_constrained {
            4
        } else if network.is_degraded() {
            2
        } else {
            1
        }
    }

    /// Delay before the retry that follows failure number `attempt`
    /// (0-indexed).
    pub fn delay_for(&self, attempt: u32, network: &NetworkState) -> Duration {
        let exponent = attempt.min(self.max_exponent);
        self.base
            .saturating_mul(Self::multiplier(network))
            .saturating_mul(1u32 << exponent)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        SyncConfig::default().backoff()
    }
}
