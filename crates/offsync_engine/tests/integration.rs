//! Integration tests for the sync engine against the loopback backend.

use offsync_engine::{
    FlushOutcome, MessageSanitizer, PullReconciler, RpcRemote, SyncConfig, SyncEvent,
    SyncOrchestrator, SyncStatus, PULL_UPDATES, SEND_MESSAGE_BATCH,
};
use offsync_protocol::{Collection, Cursor, NetworkState, PendingAction};
use offsync_storage::{InMemoryStore, KeyValueStore};
use offsync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

type Engine<S> = SyncOrchestrator<RpcRemote<LoopbackBackend>, S>;

fn connect<S: KeyValueStore + 'static>(
    config: SyncConfig,
    store: S,
    network: NetworkState,
    backend: &LoopbackBackend,
) -> Engine<S> {
    let engine = SyncOrchestrator::open(config, store, network);
    engine.attach_remote(Arc::new(RpcRemote::new(backend.clone())));
    engine
}

#[tokio::test]
async fn messages_written_offline_reach_another_device() {
    let backend = LoopbackBackend::new();

    let sender = connect(
        SyncConfig::default(),
        memory_store(),
        NetworkState::offline(),
        &backend,
    );
    for action in queued_messages(&["one", "two", "three"]) {
        let outcome = sender.enqueue(action).await;
        assert!(matches!(outcome, FlushOutcome::Skipped(_)));
    }
    assert!(backend.messages().is_empty());

    let outcome = sender.handle_network_change(wifi()).await;
    assert!(matches!(outcome, Some(FlushOutcome::Completed(_))));
    assert!(sender.pending().is_empty());
    assert_eq!(sender.cursor(), Some(Cursor::new("3")));

    let bodies: Vec<_> = backend
        .messages()
        .iter()
        .map(|m| m["body"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(bodies, ["one", "two", "three"]);

    let receiver = connect(SyncConfig::default(), memory_store(), wifi(), &backend);
    let mut events = receiver.subscribe();
    assert!(receiver.flush().await.is_completed());
    assert_eq!(receiver.cursor(), Some(Cursor::new("3")));

    let mut pulled = None;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Pulled { updates } = event {
            pulled = Some(updates);
        }
    }
    let pulled = pulled.expect("a pull event");
    assert_eq!(pulled.rows(Collection::Messages).len(), 3);
    assert_eq!(pulled.rows(Collection::Messages)[0]["client_id"], "a0");
}

#[tokio::test(start_paused = true)]
async fn transport_failure_retries_without_duplicates() {
    let backend = LoopbackBackend::new();
    let engine = connect(SyncConfig::default(), memory_store(), wifi(), &backend);
    backend.fail_next(1);

    let outcome = engine
        .enqueue(PendingAction::send_message("c1", "hello"))
        .await;
    let FlushOutcome::Failed { retry_in, .. } = outcome else {
        panic!("first attempt should fail");
    };
    assert_eq!(retry_in, Some(Duration::from_millis(2000)));
    assert_eq!(engine.status(), SyncStatus::Backoff);
    assert_eq!(engine.pending().len(), 1);

    tokio::time::sleep(Duration::from_millis(2001)).await;
    assert_eq!(engine.status(), SyncStatus::Idle);
    assert!(engine.pending().is_empty());
    assert_eq!(backend.call_count(SEND_MESSAGE_BATCH), 2);
    assert_eq!(backend.messages().len(), 1);
}

#[tokio::test]
async fn resend_of_same_action_is_deduplicated() {
    let backend = LoopbackBackend::new();
    let action = PendingAction::send_message("c1", "once").with_id("fixed-id");

    for _ in 0..2 {
        let engine = connect(SyncConfig::default(), memory_store(), wifi(), &backend);
        assert!(engine.enqueue(action.clone()).await.is_completed());
    }

    assert_eq!(backend.call_count(SEND_MESSAGE_BATCH), 2);
    assert_eq!(backend.messages().len(), 1);
}

#[tokio::test]
async fn queue_survives_restart_on_disk() {
    let backend = LoopbackBackend::new();
    let fixture = TestFileStore::new();

    {
        let engine = connect(
            SyncConfig::default(),
            fixture.reopen(),
            NetworkState::offline(),
            &backend,
        );
        for action in queued_messages(&["persisted", "also persisted"]) {
            engine.enqueue(action).await;
        }
    }

    let engine = connect(SyncConfig::default(), fixture.reopen(), wifi(), &backend);
    let ids: Vec<_> = engine.pending().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, ["a0", "a1"]);

    assert!(engine.flush().await.is_completed());
    assert_eq!(backend.messages().len(), 2);
    engine.wait_persisted().await;

    let restarted = connect(SyncConfig::default(), fixture.reopen(), wifi(), &backend);
    assert!(restarted.pending().is_empty());
    assert_eq!(restarted.cursor(), Some(Cursor::new("2")));
}

#[tokio::test]
async fn satellite_link_drains_in_small_batches() {
    let backend = LoopbackBackend::new();
    let store = memory_store();
    let engine = connect(
        SyncConfig::default(),
        Arc::clone(&store),
        NetworkState::offline(),
        &backend,
    );
    for action in queued_messages(&["1", "2", "3", "4", "5", "6", "7"]) {
        engine.enqueue(action).await;
    }

    engine.handle_network_change(satellite()).await;
    assert_eq!(backend.messages().len(), 5);
    assert_eq!(engine.pending().len(), 2);

    assert!(engine.flush().await.is_completed());
    assert_eq!(backend.messages().len(), 7);
    assert!(engine.pending().is_empty());
}

#[tokio::test]
async fn ultra_constrained_link_sends_one_at_a_time() {
    let backend = LoopbackBackend::new();
    let engine = connect(
        SyncConfig::default(),
        Arc::new(InMemoryStore::new()),
        NetworkState::offline(),
        &backend,
    );
    for action in queued_messages(&["a", "b", "c"]) {
        engine.enqueue(action).await;
    }

    engine.handle_network_change(ultra_constrained()).await;
    assert_eq!(backend.messages().len(), 1);
    assert_eq!(engine.pending().len(), 2);
}

#[tokio::test]
async fn pull_pages_through_backlog() {
    let backend = LoopbackBackend::new();
    for i in 0..5 {
        backend.insert(Collection::Messages, json!({ "id": format!("m{i}") }));
    }
    let engine = connect(
        SyncConfig::default().with_backend_max_pull_limit(2),
        memory_store(),
        wifi(),
        &backend,
    );

    let mut cursors = Vec::new();
    for _ in 0..3 {
        let FlushOutcome::Completed(report) = engine.flush().await else {
            panic!("flush should complete");
        };
        cursors.push(report.cursor.map(|c| c.as_str().to_string()));
    }

    assert_eq!(
        cursors,
        [Some("2".to_string()), Some("4".to_string()), Some("5".to_string())]
    );
    assert_eq!(backend.call_count(PULL_UPDATES), 3);
}

#[tokio::test]
async fn signed_out_backend_skips_flush() {
    let backend = LoopbackBackend::new();
    backend.set_session_active(false);
    let engine = connect(
        SyncConfig::default(),
        memory_store(),
        NetworkState::offline(),
        &backend,
    );
    engine.enqueue(PendingAction::send_message("c", "x")).await;

    let outcome = engine.handle_network_change(wifi()).await;
    assert!(matches!(outcome, Some(FlushOutcome::Skipped(_))));
    assert!(backend.calls().is_empty());
    assert_eq!(engine.failure_count(), 0);
}

proptest! {
    #[test]
    fn sanitizer_partitions_every_draft(drafts in drafts_strategy(30)) {
        let total = drafts.len();
        let batch = MessageSanitizer::new(32).sanitize(drafts);

        prop_assert_eq!(batch.accepted.len() + batch.rejected.len(), total);
        for accepted in &batch.accepted {
            prop_assert!(!accepted.draft.body.is_empty());
            prop_assert_eq!(accepted.draft.body.trim(), accepted.draft.body.as_str());
            prop_assert!(accepted.bytes <= 32);
        }
    }

    #[test]
    fn reconciled_pull_has_every_collection(raw in pull_response_strategy(8), cap in 1u32..5) {
        let updates = PullReconciler::new(cap).reconcile(raw);

        prop_assert_eq!(updates.collections.len(), Collection::ALL.len());
        for collection in Collection::ALL {
            prop_assert!(updates.rows(collection).len() <= cap as usize);
        }
    }
}
