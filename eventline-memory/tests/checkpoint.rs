//! Checkpoint persistence against the in-memory log.

mod common;

use common::*;
use eventline::prelude::*;
use eventline::event_store::METADATA_EVENT_TYPE;
use eventline::stream_name::checkpoint_stream_name;
use eventline_memory::InMemoryLogStore;
use std::sync::Arc;

#[tokio::test]
async fn stored_checkpoint_survives_a_restart() {
    init_tracing();
    let store = InMemoryLogStore::new();
    let sub = subscription_id("sub-1");

    CheckpointRepository::new(Arc::new(store.clone()))
        .store(&sub, Position::new(42))
        .await
        .unwrap();

    let restarted = CheckpointRepository::new(Arc::new(store.clone()));
    assert_eq!(restarted.load(&sub).await.unwrap(), Position::new(42));
}

#[tokio::test]
async fn missing_checkpoint_loads_as_start() {
    let store = InMemoryLogStore::new();
    let checkpoints = CheckpointRepository::new(Arc::new(store));

    let position = checkpoints.load(&subscription_id("never-stored")).await.unwrap();

    assert!(position.is_start());
}

#[tokio::test]
async fn checkpoint_stream_keeps_only_the_newest_event() {
    let store = InMemoryLogStore::new();
    let checkpoints = CheckpointRepository::new(Arc::new(store.clone()));
    let sub = subscription_id("sub-1");

    for position in [3, 7, 12] {
        checkpoints.store(&sub, Position::new(position)).await.unwrap();
    }

    let stream = checkpoint_stream_name("sub-1").unwrap();
    assert_eq!(store.max_count(&stream), Some(1));
    assert_eq!(store.stream_events(&stream).len(), 3);

    let client = EventStoreClient::new(Arc::new(store.clone()));
    let visible = client
        .read_to_vec(&stream, ReadStreamOptions::forwards())
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(checkpoints.load(&sub).await.unwrap(), Position::new(12));
}

#[tokio::test]
async fn first_store_caps_the_stream_before_creating_it() {
    let store = RecordingStore::new();
    let checkpoints = CheckpointRepository::new(Arc::new(store.clone()));
    let sub = subscription_id("sub-1");

    checkpoints.store(&sub, Position::new(1)).await.unwrap();
    checkpoints.store(&sub, Position::new(2)).await.unwrap();

    let expectations: Vec<ExpectedRevision> =
        store.appends().into_iter().map(|(_, expected)| expected).collect();
    assert_eq!(
        expectations,
        vec![
            ExpectedRevision::StreamExists,
            ExpectedRevision::NoStream,
            ExpectedRevision::StreamExists,
        ]
    );

    let log = store.inner.all_events();
    let metadata_index = log
        .iter()
        .position(|e| e.event_type == METADATA_EVENT_TYPE)
        .expect("metadata written");
    let checkpoint_index = log
        .iter()
        .position(|e| e.event_type == "CheckpointStored")
        .expect("checkpoint written");
    assert!(metadata_index < checkpoint_index);
}

#[tokio::test]
async fn subscriptions_have_independent_checkpoints() {
    let store = InMemoryLogStore::new();
    let checkpoints = CheckpointRepository::new(Arc::new(store));

    checkpoints
        .store(&subscription_id("projections"), Position::new(5))
        .await
        .unwrap();
    checkpoints
        .store(&subscription_id("emails"), Position::new(9))
        .await
        .unwrap();

    assert_eq!(
        checkpoints.load(&subscription_id("projections")).await.unwrap(),
        Position::new(5)
    );
    assert_eq!(
        checkpoints.load(&subscription_id("emails")).await.unwrap(),
        Position::new(9)
    );
}

#[tokio::test]
async fn unavailable_store_fails_loads_and_stores() {
    let store = InMemoryLogStore::new();
    let checkpoints = CheckpointRepository::new(Arc::new(store.clone()));
    let sub = subscription_id("sub-1");
    store.set_available(false);

    assert!(matches!(
        checkpoints.load(&sub).await,
        Err(CheckpointError::EventStore(_))
    ));
    assert!(matches!(
        checkpoints.store(&sub, Position::new(1)).await,
        Err(CheckpointError::EventStore(_))
    ));
}
