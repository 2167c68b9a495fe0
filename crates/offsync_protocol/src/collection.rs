//! Pull collections.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::cursor::Cursor;

/// A collection the remote returns in a pull response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Conversations the user participates in.
    Conversations,
    /// Chat messages.
    Messages,
    /// Per-device sync watermarks.
    SyncCursors,
    /// Groups.
    Groups,
    /// Pending group invitations.
    GroupInvitations,
    /// Group activity feed.
    GroupActivity,
    /// Saved waypoints.
    Waypoints,
    /// Geofences.
    Geofences,
    /// User profiles.
    Profiles,
    /// Registered device sessions.
    DeviceSessions,
    /// Privacy settings.
    PrivacySettings,
    /// Push notification subscriptions.
    PushSubscriptions,
    /// SMS alert subscriptions.
    SmsAlertSubscriptions,
}

impl Collection {
    /// Every collection, in wire order.
    pub const ALL: [Collection; 13] = [
        Collection::Conversations,
        Collection::Messages,
        Collection::SyncCursors,
        Collection::Groups,
        Collection::GroupInvitations,
        Collection::GroupActivity,
        Collection::Waypoints,
        Collection::Geofences,
        Collection::Profiles,
        Collection::DeviceSessions,
        Collection::PrivacySettings,
        Collection::PushSubscriptions,
        Collection::SmsAlertSubscriptions,
    ];

    /// Returns the key used in pull responses.
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Conversations => "conversations",
            Collection::Messages => "messages",
            Collection::SyncCursors => "sync_cursors",
            Collection::Groups => "groups",
            Collection::GroupInvitations => "group_invitations",
            Collection::GroupActivity => "group_activity",
            Collection::Waypoints => "waypoints",
            Collection::Geofences => "geofences",
            Collection::Profiles => "profiles",
            Collection::DeviceSessions => "device_sessions",
            Collection::PrivacySettings => "privacy_settings",
            Collection::PushSubscriptions => "push_subscriptions",
            Collection::SmsAlertSubscriptions => "sms_alert_subscriptions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Normalized result of a pull.
///
/// Every [`Collection`] is present, possibly with no rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulledUpdates {
    /// Rows per collection.
    pub collections: BTreeMap<Collection, Vec<Value>>,
    /// Watermark returned by the remote, if any.
    pub cursor: Option<Cursor>,
}

impl PulledUpdates {
    /// Creates a result with every collection empty.
    pub fn empty() -> Self {
        Self {
            collections: Collection::ALL
                .into_iter()
                .map(|c| (c, Vec::new()))
                .collect(),
            cursor: None,
        }
    }

    /// Returns the rows of a collection.
    pub fn rows(&self, collection: Collection) -> &[Value] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total rows across all collections.
    pub fn total_rows(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Returns true if no collection has rows.
    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }
}

impl Default for PulledUpdates {
    fn default() -> Self {
        Self::empty()
    }
}
