//! `eventline` - event-sourced aggregate persistence
//!
//! Aggregates are rebuilt from their own stream of events and saved by
//! appending new events under an optimistic-concurrency precondition. A
//! catch-up subscription worker follows the global log from a checkpoint
//! that is itself stored in the log, and hands decoded events to a
//! downstream publisher.
//!
//! The remote log is reached through the [`LogStore`](event_store::LogStore)
//! trait; `eventline-memory` provides an in-memory implementation.
//!
//! # Overview
//!
//! - [`aggregate`]: the [`Aggregate`](aggregate::Aggregate) trait and the
//!   [`AggregateRoot`](aggregate::AggregateRoot) that drives it
//! - [`serialization`]: logical type names, JSON and MessagePack payloads
//! - [`aggregate_store`]: load and save aggregates
//! - [`checkpoint`]: subscription checkpoints
//! - [`subscription`]: the catch-up worker
//! - [`config`]: validated settings

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod aggregate_store;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod event;
pub mod event_store;
pub mod serialization;
pub mod stream_name;
pub mod subscription;
pub mod type_registry;
pub mod types;

/// Commonly used items.
pub mod prelude {
    pub use crate::aggregate::{Aggregate, AggregateRoot, Snapshot};
    pub use crate::aggregate_store::AggregateStore;
    pub use crate::checkpoint::CheckpointRepository;
    pub use crate::config::{
        AggregateStoreConfig, ReadBatchSize, ResubscribeDelayMs, SubscriptionConfig,
        SubscriptionId,
    };
    pub use crate::errors::{
        AggregateError, AggregateStoreError, CheckpointError, CodecError, EventStoreError,
        PublishError, SubscriptionError,
    };
    pub use crate::event::{DomainEvent, Event, EventData, EventMetadata, RecordedEvent};
    pub use crate::event_store::{
        AppendResult, EventStoreClient, LogStore, ReadStreamOptions, StreamMetadata,
        SubscriptionFilter,
    };
    pub use crate::serialization::{EventSerializer, TypeRegistry};
    pub use crate::subscription::{
        cancellation, CancellationSignal, CancellationTrigger, Publisher, StreamEvent,
        SubscriptionHandle, SubscriptionWorker,
    };
    pub use crate::types::{
        AggregateId, AggregateVersion, ContentType, EventId, ExpectedRevision, Position,
        ReadDirection, ReadFrom, StreamId, StreamRevision, SubscribeFrom, Timestamp,
    };
}
