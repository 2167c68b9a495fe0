//! Property-based test generators using proptest.
//!
//! Provides strategies for generating network snapshots, queued actions,
//! drafts and raw pull responses.

use offsync_protocol::{Collection, Connectivity, MessageDraft, NetworkState, PendingAction};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Strategy for any connectivity.
pub fn connectivity_strategy() -> impl Strategy<Value = Connectivity> {
    prop::sample::select(Connectivity::ALL.to_vec())
}

/// Strategy for any network snapshot.
pub fn network_strategy() -> impl Strategy<Value = NetworkState> {
    (connectivity_strategy(), any::<bool>(), any::<bool>()).prop_map(
        |(connectivity, constrained, ultra)| {
            NetworkState::new(connectivity)
                .with_constrained(constrained)
                .with_ultra_constrained(ultra)
        },
    )
}

/// Strategy for message bodies, including blank and padded ones.
pub fn body_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[a-zA-Z0-9 ]{1,40}",
        1 => "[ \t\n]{0,5}",
        1 => "[ ]{0,3}[a-z]{1,10}[ ]{0,3}",
    ]
}

/// Strategy for drafts with unique client ids.
pub fn drafts_strategy(max: usize) -> impl Strategy<Value = Vec<MessageDraft>> {
    prop::collection::vec(body_strategy(), 0..=max).prop_map(|bodies| {
        bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| MessageDraft::new("conv", body).with_client_id(format!("d{i}")))
            .collect()
    })
}

/// Strategy for a queue of send-message actions with unique ids.
pub fn pending_actions_strategy(max: usize) -> impl Strategy<Value = Vec<PendingAction>> {
    prop::collection::vec("[a-z]{1,12}", 0..=max).prop_map(|bodies| {
        bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| PendingAction::send_message("conv", body).with_id(format!("a{i}")))
            .collect()
    })
}

/// Strategy for raw pull responses.
///
/// Each collection is either missing, a non-array value, or an array of
/// up to `max_rows` rows. The cursor is sometimes missing or malformed.
pub fn pull_response_strategy(max_rows: usize) -> impl Strategy<Value = Value> {
    let entry = prop_oneof![
        2 => Just(None),
        1 => Just(Some(json!({"unexpected": true}))),
        4 => (0..=max_rows).prop_map(|n| Some(Value::Array((0..n).map(|i| json!({"i": i})).collect()))),
    ];
    let cursor = prop_oneof![
        Just(None),
        Just(Some(json!(42))),
        "[0-9]{1,6}".prop_map(|c| Some(Value::String(c))),
    ];

    (prop::collection::vec(entry, Collection::ALL.len()), cursor).prop_map(|(entries, cursor)| {
        let mut map = Map::new();
        for (collection, entry) in Collection::ALL.iter().zip(entries) {
            if let Some(value) = entry {
                map.insert(collection.key().to_string(), value);
            }
        }
        if let Some(cursor) = cursor {
            map.insert("cursor".to_string(), cursor);
        }
        Value::Object(map)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn pending_ids_are_unique(actions in pending_actions_strategy(20)) {
            let ids: HashSet<_> = actions.iter().map(|a| a.id.clone()).collect();
            prop_assert_eq!(ids.len(), actions.len());
        }

        #[test]
        fn pull_responses_are_objects(raw in pull_response_strategy(5)) {
            prop_assert!(raw.is_object());
        }
    }
}
