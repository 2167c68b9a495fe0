//! Network snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of link the device currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// No usable link.
    Offline,
    /// Wifi link.
    Wifi,
    /// Cellular data link.
    Cellular,
    /// Satellite link.
    Satellite,
}

impl Connectivity {
    /// All connectivity kinds.
    pub const ALL: [Connectivity; 4] = [
        Connectivity::Offline,
        Connectivity::Wifi,
        Connectivity::Cellular,
        Connectivity::Satellite,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Connectivity::Offline => "offline",
            Connectivity::Wifi => "wifi",
            Connectivity::Cellular => "cellular",
            Connectivity::Satellite => "satellite",
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Connectivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Connectivity::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown connectivity: {s}"))
    }
}

/// A snapshot of the device's network conditions.
///
/// Snapshots are transient: the host's observer supplies a fresh one on
/// every change and the engine only ever looks at the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    /// Link kind.
    pub connectivity: Connectivity,
    /// Whether the link is metered or otherwise expensive.
    pub constrained: bool,
    /// Whether the link is severely limited (low data mode, poor signal).
    #[serde(default)]
    pub ultra_constrained: bool,
}

impl NetworkState {
    /// Creates an unconstrained snapshot for the given connectivity.
    pub fn new(connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            constrained: false,
            ultra_constrained: false,
        }
    }

    /// Snapshot for a device with no link.
    pub fn offline() -> Self {
        Self::new(Connectivity::Offline)
    }

    /// Snapshot for an unconstrained wifi link.
    pub fn wifi() -> Self {
        Self::new(Connectivity::Wifi)
    }

    /// Snapshot for an unconstrained cellular link.
    pub fn cellular() -> Self {
        Self::new(Connectivity::Cellular)
    }

    /// Snapshot for a satellite link.
    pub fn satellite() -> Self {
        Self::new(Connectivity::Satellite)
    }

    /// Sets the constrained flag.
    pub fn with_constrained(mut self, constrained: bool) -> Self {
        self.constrained = constrained;
        self
    }

    /// Sets the ultra-constrained flag.
    pub fn with_ultra_constrained(mut self, ultra_constrained: bool) -> Self {
        self.ultra_constrained = ultra_constrained;
        self
    }

    /// Returns true if there is no link.
    pub fn is_offline(&self) -> bool {
        self.connectivity == Connectivity::Offline
    }

    /// Returns true if the link should be treated as expensive.
    ///
    /// Satellite links count as constrained even when the observer does
    /// not flag them.
    pub fn is_degraded(&self) -> bool {
        self.connectivity == Connectivity::Satellite || self.constrained || self.ultra_constrained
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::offline()
    }
}
