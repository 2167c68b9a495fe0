//! Normalization of multi-collection pull responses.

use offsync_protocol::{Collection, Cursor, PulledUpdates};
use serde_json::Value;

/// Key of the watermark in a pull response.
pub const CURSOR_FIELD: &str = "cursor";

/// Slices a raw pull response into [`PulledUpdates`].
///
/// Each collection is capped independently, so a response may carry up
/// to `13 × max_rows` rows in total. There is no global cap: every entity
/// type makes progress even under a tight row budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullReconciler {
    max_rows: usize,
}

impl PullReconciler {
    /// Creates a reconciler with the given per-collection row cap.
    pub fn new(max_rows: u32) -> Self {
        Self {
            max_rows: max_rows as usize,
        }
    }

    /// Per-collection row cap.
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Normalizes a raw response.
    ///
    /// Missing collections and collections whose value is not an array
    /// come back empty. A non-object response yields an empty result.
    pub fn reconcile(&self, raw: Value) -> PulledUpdates {
        let mut updates = PulledUpdates::empty();
        let Value::Object(mut map) = raw else {
            return updates;
        };

        updates.cursor = extract_cursor(map.get(CURSOR_FIELD));
        for collection in Collection::ALL {
            let rows = match map.remove(collection.key()) {
                Some(Value::Array(mut rows)) => {
                    rows.truncate(self.max_rows);
                    rows
                }
                _ => Vec::new(),
            };
            updates.collections.insert(collection, rows);
        }
        updates
    }
}

/// Reads a cursor value. Only non-empty strings count.
fn extract_cursor(value: Option<&Value>) -> Option<Cursor> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(Cursor::new(s.clone())),
        _ => None,
    }
}
