//! Event store abstraction.
//!
//! [`LogStore`] is the port to the remote append-only log: streams with
//! optimistic-concurrency appends, per-stream reads, stream metadata and a
//! live subscription to the global log. [`EventStoreClient`] wraps a store
//! with the conveniences the rest of the library relies on and annotates
//! every failure with the operation and stream it came from.

use crate::errors::{EventStoreError, EventStoreResult, Operation};
use crate::event::{EventData, RecordedEvent};
use crate::types::{
    ExpectedRevision, Position, ReadDirection, ReadFrom, StreamId, StreamRevision, SubscribeFrom,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Lazy sequence of recorded events.
pub type RecordedEventStream = BoxStream<'static, EventStoreResult<RecordedEvent>>;

/// Event type of the log-internal events that record stream metadata.
pub const METADATA_EVENT_TYPE: &str = "$metadata";

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Global position of the last appended event
    pub position: Position,
    /// Revision of the last appended event; the precondition for the next append
    pub next_expected_version: StreamRevision,
}

/// Options for reading a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// Read direction
    pub direction: ReadDirection,
    /// First revision to read (inclusive)
    pub from: ReadFrom,
    /// Maximum number of events (None = no limit)
    pub max_count: Option<u64>,
}

impl ReadStreamOptions {
    /// Reads the whole stream from the first event.
    pub const fn forwards() -> Self {
        Self {
            direction: ReadDirection::Forwards,
            from: ReadFrom::Start,
            max_count: None,
        }
    }

    /// Reads the stream newest first.
    pub const fn backwards() -> Self {
        Self {
            direction: ReadDirection::Backwards,
            from: ReadFrom::End,
            max_count: None,
        }
    }

    /// Starts at `from` (inclusive).
    #[must_use]
    pub const fn from(mut self, from: ReadFrom) -> Self {
        self.from = from;
        self
    }

    /// Limits the number of events returned.
    #[must_use]
    pub const fn max_count(mut self, max_count: u64) -> Self {
        self.max_count = Some(max_count);
        self
    }
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self::forwards()
    }
}

/// Per-stream settings kept by the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Retention cap: only the newest `max_count` events stay readable
    #[serde(default, rename = "$maxCount", skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
}

impl StreamMetadata {
    /// Keeps only the newest `max_count` events.
    pub const fn with_max_count(max_count: u64) -> Self {
        Self {
            max_count: Some(max_count),
        }
    }
}

/// Server-side filter for a global-log subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionFilter {
    /// Drop events whose type starts with `$`
    pub exclude_system_events: bool,
    /// Only deliver events from streams with this prefix
    pub stream_prefix: Option<String>,
}

impl SubscriptionFilter {
    /// Delivers every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Delivers every non-system event.
    pub fn exclude_system_events() -> Self {
        Self {
            exclude_system_events: true,
            stream_prefix: None,
        }
    }

    /// Restricts delivery to streams starting with `prefix`.
    #[must_use]
    pub fn with_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = Some(prefix.into());
        self
    }

    /// Returns true if the event passes the filter.
    pub fn matches(&self, event: &RecordedEvent) -> bool {
        if self.exclude_system_events && event.is_system_event() {
            return false;
        }
        match self.stream_prefix.as_deref() {
            Some(prefix) => event.stream_id.as_ref().starts_with(prefix),
            None => true,
        }
    }
}

/// Port to the remote append-only log.
///
/// Implementations must assign stream revisions (0-based, gap-free) and
/// global positions (1-based, strictly increasing) themselves.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Appends events to a stream atomically.
    ///
    /// # Errors
    /// * `EventStoreError::WrongExpectedRevision` - if `expected` does not hold
    /// * `EventStoreError::AppendFailed` - if the store rejects the batch
    /// * `EventStoreError::Unavailable` - if the store cannot be reached
    async fn append_to_stream(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        events: Vec<EventData>,
    ) -> EventStoreResult<AppendResult>;

    /// Reads a stream lazily.
    ///
    /// # Errors
    /// Returns `EventStoreError::StreamNotFound` if the stream does not
    /// exist. Failures during iteration are yielded as stream items.
    async fn read_stream(
        &self,
        stream: &StreamId,
        options: ReadStreamOptions,
    ) -> EventStoreResult<RecordedEventStream>;

    /// Writes a stream's metadata.
    ///
    /// `expected` applies to the stream's metadata history, not to the
    /// stream itself.
    async fn set_stream_metadata(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        metadata: StreamMetadata,
    ) -> EventStoreResult<AppendResult>;

    /// Subscribes to the global log.
    ///
    /// The returned stream first catches up on history and then stays
    /// live. It yields `EventStoreError::SubscriptionDropped` when the
    /// subscription is lost.
    async fn subscribe_to_all(
        &self,
        from: SubscribeFrom,
        filter: SubscriptionFilter,
    ) -> EventStoreResult<RecordedEventStream>;
}

/// Client for a [`LogStore`] shared across stores, repositories and workers.
pub struct EventStoreClient<L> {
    store: Arc<L>,
}

impl<L> Clone for EventStoreClient<L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<L> std::fmt::Debug for EventStoreClient<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStoreClient").finish_non_exhaustive()
    }
}

impl<L: LogStore> EventStoreClient<L> {
    /// Wraps a shared store.
    pub const fn new(store: Arc<L>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<L> {
        &self.store
    }

    /// Appends events to `stream` under the `expected` precondition.
    #[instrument(
        skip(self, stream, events, expected),
        fields(stream = %stream, expected = %expected, count = events.len())
    )]
    pub async fn append(
        &self,
        stream: &StreamId,
        events: Vec<EventData>,
        expected: ExpectedRevision,
    ) -> EventStoreResult<AppendResult> {
        let result = self
            .store
            .append_to_stream(stream, expected, events)
            .await
            .map_err(|e| e.with_context(Operation::AppendToStream, stream))?;
        debug!(
            position = %result.position,
            revision = %result.next_expected_version,
            "appended events"
        );
        Ok(result)
    }

    /// Opens a lazy read of `stream`.
    #[instrument(skip(self, stream), fields(stream = %stream))]
    pub async fn read(
        &self,
        stream: &StreamId,
        direction: ReadDirection,
        from: ReadFrom,
        max_count: Option<u64>,
    ) -> EventStoreResult<RecordedEventStream> {
        let options = ReadStreamOptions {
            direction,
            from,
            max_count,
        };
        debug!("reading stream");
        let events = self
            .store
            .read_stream(stream, options)
            .await
            .map_err(|e| e.with_context(Operation::ReadStream, stream))?;
        let name = stream.to_string();
        Ok(events
            .map_err(move |e| e.with_context(Operation::ReadStream, &name))
            .boxed())
    }

    /// Reads `stream` into memory.
    pub async fn read_to_vec(
        &self,
        stream: &StreamId,
        options: ReadStreamOptions,
    ) -> EventStoreResult<Vec<RecordedEvent>> {
        self.read(stream, options.direction, options.from, options.max_count)
            .await?
            .try_collect()
            .await
    }

    /// Checks whether `stream` exists with a one-event backward read.
    #[instrument(skip(self, stream), fields(stream = %stream))]
    pub async fn exists(&self, stream: &StreamId) -> EventStoreResult<bool> {
        match self.last_revision(stream).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_stream_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Revision of the newest readable event of `stream`.
    ///
    /// Returns `None` for an existing stream whose events are all hidden by
    /// retention.
    pub async fn last_revision(
        &self,
        stream: &StreamId,
    ) -> EventStoreResult<Option<StreamRevision>> {
        let newest = self
            .read_to_vec(stream, ReadStreamOptions::backwards().max_count(1))
            .await?;
        Ok(newest.first().map(|event| event.revision))
    }

    /// Writes the metadata of `stream`.
    #[instrument(skip(self, stream, expected), fields(stream = %stream, expected = %expected))]
    pub async fn set_stream_metadata(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        metadata: StreamMetadata,
    ) -> EventStoreResult<AppendResult> {
        self.store
            .set_stream_metadata(stream, expected, metadata)
            .await
            .map_err(|e| e.with_context(Operation::SetStreamMetadata, stream))
    }

    /// Subscribes to the global log.
    #[instrument(skip(self, filter))]
    pub async fn subscribe_to_all(
        &self,
        from: SubscribeFrom,
        filter: SubscriptionFilter,
    ) -> EventStoreResult<RecordedEventStream> {
        let events = self
            .store
            .subscribe_to_all(from, filter)
            .await
            .map_err(|e| e.with_context(Operation::SubscribeToAll, "$all"))?;
        debug!("subscribed to $all");
        Ok(events)
    }
}

/// Builds a `WrongExpectedRevision` error; helper for store implementations.
pub fn check_expected_revision(
    stream: &StreamId,
    expected: ExpectedRevision,
    actual: Option<StreamRevision>,
) -> EventStoreResult<()> {
    let holds = match expected {
        ExpectedRevision::Any => true,
        ExpectedRevision::NoStream => actual.is_none(),
        ExpectedRevision::StreamExists => actual.is_some(),
        ExpectedRevision::Exact(revision) => actual == Some(revision),
    };
    if holds {
        Ok(())
    } else {
        Err(EventStoreError::WrongExpectedRevision {
            stream: stream.clone(),
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, Timestamp};
    use futures::stream;

    fn recorded(stream: &str, revision: u64, event_type: &str) -> RecordedEvent {
        RecordedEvent {
            event_id: EventId::generate(),
            event_type: event_type.to_string(),
            content_type: "application/json".to_string(),
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            stream_id: StreamId::try_new(stream).unwrap(),
            revision: StreamRevision::new(revision),
            position: Position::new(revision + 1),
            created_at: Timestamp::now(),
        }
    }

    /// Store with a fixed set of streams, newest event last.
    struct FixedStore {
        streams: Vec<(StreamId, Vec<RecordedEvent>)>,
        fail_reads_midway: bool,
    }

    #[async_trait]
    impl LogStore for FixedStore {
        async fn append_to_stream(
            &self,
            stream: &StreamId,
            expected: ExpectedRevision,
            _events: Vec<EventData>,
        ) -> EventStoreResult<AppendResult> {
            let actual = self
                .streams
                .iter()
                .find(|(id, _)| id == stream)
                .and_then(|(_, events)| events.last().map(|e| e.revision));
            check_expected_revision(stream, expected, actual)?;
            Err(EventStoreError::AppendFailed {
                stream: stream.clone(),
                reason: "read-only".to_string(),
            })
        }

        async fn read_stream(
            &self,
            stream: &StreamId,
            options: ReadStreamOptions,
        ) -> EventStoreResult<RecordedEventStream> {
            let (_, events) = self
                .streams
                .iter()
                .find(|(id, _)| id == stream)
                .ok_or_else(|| EventStoreError::StreamNotFound(stream.clone()))?;
            let mut events = events.clone();
            if options.direction == ReadDirection::Backwards {
                events.reverse();
            }
            if let Some(max) = options.max_count {
                events.truncate(usize::try_from(max).unwrap());
            }
            let mut items: Vec<EventStoreResult<RecordedEvent>> =
                events.into_iter().map(Ok).collect();
            if self.fail_reads_midway {
                items.push(Err(EventStoreError::ReadFailed {
                    stream: stream.clone(),
                    reason: "connection reset".to_string(),
                }));
            }
            Ok(stream::iter(items).boxed())
        }

        async fn set_stream_metadata(
            &self,
            _stream: &StreamId,
            _expected: ExpectedRevision,
            _metadata: StreamMetadata,
        ) -> EventStoreResult<AppendResult> {
            Err(EventStoreError::Unavailable("offline".to_string()))
        }

        async fn subscribe_to_all(
            &self,
            _from: SubscribeFrom,
            _filter: SubscriptionFilter,
        ) -> EventStoreResult<RecordedEventStream> {
            Err(EventStoreError::Unavailable("offline".to_string()))
        }
    }

    fn client(fail_reads_midway: bool) -> EventStoreClient<FixedStore> {
        let order = StreamId::try_new("order-1").unwrap();
        let events = (0..3).map(|r| recorded("order-1", r, "OrderPlaced")).collect();
        EventStoreClient::new(Arc::new(FixedStore {
            streams: vec![(order, events)],
            fail_reads_midway,
        }))
    }

    #[tokio::test]
    async fn exists_distinguishes_missing_streams() {
        let client = client(false);

        assert!(client.exists(&StreamId::try_new("order-1").unwrap()).await.unwrap());
        assert!(!client.exists(&StreamId::try_new("order-2").unwrap()).await.unwrap());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn last_revision_reads_newest_event() {
        let client = client(false);

        let revision = client
            .last_revision(&StreamId::try_new("order-1").unwrap())
            .await
            .unwrap();

        assert_eq!(revision, Some(StreamRevision::new(2)));
        assert!(logs_contain("reading stream"));
    }

    #[tokio::test]
    async fn read_errors_carry_operation_and_stream() {
        let client = client(false);
        let missing = StreamId::try_new("order-9").unwrap();

        let Err(error) = client
            .read(&missing, ReadDirection::Forwards, ReadFrom::Start, None)
            .await
        else {
            panic!("expected missing stream");
        };

        assert!(error.is_stream_not_found());
        assert!(error.to_string().starts_with("read_stream on 'order-9' failed"));
    }

    #[tokio::test]
    async fn failures_during_iteration_are_annotated() {
        let client = client(true);

        let error = client
            .read_to_vec(&StreamId::try_new("order-1").unwrap(), ReadStreamOptions::forwards())
            .await
            .unwrap_err();

        assert!(matches!(
            error.root_cause(),
            EventStoreError::ReadFailed { .. }
        ));
        assert!(matches!(
            error,
            EventStoreError::Context {
                operation: Operation::ReadStream,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn append_conflicts_keep_their_kind() {
        let client = client(false);

        let error = client
            .append(
                &StreamId::try_new("order-1").unwrap(),
                Vec::new(),
                ExpectedRevision::NoStream,
            )
            .await
            .unwrap_err();

        assert!(error.is_wrong_expected_revision());
    }

    #[test]
    fn filter_excludes_system_events_and_foreign_streams() {
        let filter = SubscriptionFilter::exclude_system_events().with_stream_prefix("order-");

        assert!(filter.matches(&recorded("order-1", 0, "OrderPlaced")));
        assert!(!filter.matches(&recorded("order-1", 1, METADATA_EVENT_TYPE)));
        assert!(!filter.matches(&recorded("cart-1", 0, "ItemAdded")));
        assert!(SubscriptionFilter::all().matches(&recorded("$$order-1", 0, "$metadata")));
    }

    #[test]
    fn expected_revision_rules() {
        let stream = StreamId::try_new("order-1").unwrap();
        let at = |r| Some(StreamRevision::new(r));

        assert!(check_expected_revision(&stream, ExpectedRevision::Any, None).is_ok());
        assert!(check_expected_revision(&stream, ExpectedRevision::NoStream, None).is_ok());
        assert!(check_expected_revision(&stream, ExpectedRevision::NoStream, at(0)).is_err());
        assert!(check_expected_revision(&stream, ExpectedRevision::StreamExists, None).is_err());
        assert!(check_expected_revision(&stream, ExpectedRevision::StreamExists, at(4)).is_ok());
        assert!(
            check_expected_revision(&stream, ExpectedRevision::Exact(StreamRevision::new(4)), at(4))
                .is_ok()
        );
        assert!(
            check_expected_revision(&stream, ExpectedRevision::Exact(StreamRevision::new(3)), at(4))
                .is_err()
        );
    }
}
