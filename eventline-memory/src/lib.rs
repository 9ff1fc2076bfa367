//! In-memory log store for `eventline`.
//!
//! This crate provides an in-memory implementation of the
//! [`LogStore`] trait, for tests and local development. It keeps the
//! semantics the library relies on: per-stream revisions starting at 0,
//! global positions starting at 1, expected-revision checks, `max_count`
//! retention on reads and a live `$all` subscription.
//!
//! Stream metadata is recorded the way the remote log does it, as a
//! `$metadata` event in the stream `$${stream}`, so metadata writes show up
//! in the global log as system events.
//!
//! [`InMemoryLogStore::drop_subscriptions`] and
//! [`InMemoryLogStore::set_available`] inject the failures a real
//! connection produces.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use eventline::errors::{EventStoreError, EventStoreResult};
use eventline::event::{EventData, RecordedEvent};
use eventline::event_store::{
    check_expected_revision, AppendResult, LogStore, ReadStreamOptions, RecordedEventStream,
    StreamMetadata, SubscriptionFilter, METADATA_EVENT_TYPE,
};
use eventline::types::{
    ContentType, EventId, ExpectedRevision, Position, ReadDirection, ReadFrom, StreamId,
    StreamRevision, SubscribeFrom, Timestamp,
};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// In-memory implementation of [`LogStore`].
///
/// Clones share the same log.
#[derive(Clone)]
pub struct InMemoryLogStore {
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<LogState>,
    /// Length of the global log, bumped on every append
    appended: watch::Sender<usize>,
    /// Bumped to drop every open subscription
    drops: watch::Sender<u64>,
    available: AtomicBool,
}

#[derive(Default)]
struct LogState {
    streams: HashMap<StreamId, Vec<RecordedEvent>>,
    retention: HashMap<StreamId, u64>,
    log: Vec<RecordedEvent>,
}

impl LogState {
    fn last_revision(&self, stream: &StreamId) -> Option<StreamRevision> {
        self.streams
            .get(stream)
            .and_then(|events| events.last())
            .map(|event| event.revision)
    }

    fn append(
        &mut self,
        stream: &StreamId,
        expected: ExpectedRevision,
        events: Vec<EventData>,
    ) -> EventStoreResult<AppendResult> {
        check_expected_revision(stream, expected, self.last_revision(stream))?;

        let mut next_revision = self
            .last_revision(stream)
            .map_or_else(StreamRevision::first, StreamRevision::next);
        let mut last = None;
        for data in events {
            let recorded = RecordedEvent {
                event_id: data.event_id,
                event_type: data.event_type,
                content_type: data.content_type.mime_type().to_string(),
                data: data.data,
                metadata: data.metadata,
                stream_id: stream.clone(),
                revision: next_revision,
                position: Position::new(self.log.len() as u64 + 1),
                created_at: Timestamp::now(),
            };
            last = Some(AppendResult {
                position: recorded.position,
                next_expected_version: recorded.revision,
            });
            next_revision = next_revision.next();
            self.log.push(recorded.clone());
            self.streams.entry(stream.clone()).or_default().push(recorded);
        }

        last.ok_or_else(|| EventStoreError::AppendFailed {
            stream: stream.clone(),
            reason: "no events to append".to_string(),
        })
    }

    /// Events of `stream` still visible under its retention cap.
    fn visible(&self, stream: &StreamId) -> Option<&[RecordedEvent]> {
        let events = self.streams.get(stream)?;
        let keep = self
            .retention
            .get(stream)
            .map_or(events.len(), |&max| usize::try_from(max).unwrap_or(usize::MAX));
        Some(&events[events.len().saturating_sub(keep)..])
    }
}

impl InMemoryLogStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        let (drops, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(LogState::default()),
                appended,
                drops,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Ends every open subscription with `SubscriptionDropped`.
    pub fn drop_subscriptions(&self) {
        info!("dropping all subscriptions");
        self.shared.drops.send_modify(|generation| *generation += 1);
    }

    /// Makes every operation fail with `Unavailable` until set back.
    ///
    /// Going unavailable also drops open subscriptions.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
        if !available {
            self.drop_subscriptions();
        }
    }

    /// Every event in the global log, in position order.
    pub fn all_events(&self) -> Vec<RecordedEvent> {
        self.shared.state.read().log.clone()
    }

    /// Every event ever appended to `stream`, ignoring retention.
    pub fn stream_events(&self, stream: &StreamId) -> Vec<RecordedEvent> {
        self.shared
            .state
            .read()
            .streams
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// The retention cap set on `stream`, if any.
    pub fn max_count(&self, stream: &StreamId) -> Option<u64> {
        self.shared.state.read().retention.get(stream).copied()
    }

    fn ensure_available(&self) -> EventStoreResult<()> {
        if self.shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventStoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }

    fn publish_length(&self, length: usize) {
        self.shared.appended.send_replace(length);
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("InMemoryLogStore")
            .field("streams", &state.streams.len())
            .field("events", &state.log.len())
            .finish()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append_to_stream(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        events: Vec<EventData>,
    ) -> EventStoreResult<AppendResult> {
        self.ensure_available()?;
        let (result, length) = {
            let mut state = self.shared.state.write();
            let result = state.append(stream, expected, events)?;
            (result, state.log.len())
        };
        self.publish_length(length);
        debug!(
            stream = %stream,
            position = %result.position,
            revision = %result.next_expected_version,
            "appended to in-memory stream"
        );
        Ok(result)
    }

    async fn read_stream(
        &self,
        stream: &StreamId,
        options: ReadStreamOptions,
    ) -> EventStoreResult<RecordedEventStream> {
        self.ensure_available()?;
        let state = self.shared.state.read();
        let visible = state
            .visible(stream)
            .ok_or_else(|| EventStoreError::StreamNotFound(stream.clone()))?;

        let mut selected: Vec<RecordedEvent> = match (options.direction, options.from) {
            (ReadDirection::Forwards, ReadFrom::Start) => visible.to_vec(),
            (ReadDirection::Forwards, ReadFrom::End) => Vec::new(),
            (ReadDirection::Forwards, ReadFrom::Revision(from)) => visible
                .iter()
                .filter(|event| event.revision >= from)
                .cloned()
                .collect(),
            (ReadDirection::Backwards, ReadFrom::End) => visible.iter().rev().cloned().collect(),
            (ReadDirection::Backwards, ReadFrom::Start) => {
                visible.first().cloned().into_iter().collect()
            }
            (ReadDirection::Backwards, ReadFrom::Revision(from)) => visible
                .iter()
                .rev()
                .filter(|event| event.revision <= from)
                .cloned()
                .collect(),
        };
        if let Some(max) = options.max_count {
            selected.truncate(usize::try_from(max).unwrap_or(usize::MAX));
        }
        Ok(stream::iter(selected.into_iter().map(Ok)).boxed())
    }

    async fn set_stream_metadata(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        metadata: StreamMetadata,
    ) -> EventStoreResult<AppendResult> {
        self.ensure_available()?;
        let metadata_stream = StreamId::try_new(format!("$${stream}")).map_err(|e| {
            EventStoreError::AppendFailed {
                stream: stream.clone(),
                reason: e.to_string(),
            }
        })?;
        let data = serde_json::to_vec(&metadata).map_err(|e| EventStoreError::AppendFailed {
            stream: stream.clone(),
            reason: e.to_string(),
        })?;
        let event = EventData {
            event_id: EventId::generate(),
            event_type: METADATA_EVENT_TYPE.to_string(),
            content_type: ContentType::Json,
            data,
            metadata: Vec::new(),
        };

        let (result, length) = {
            let mut state = self.shared.state.write();
            let result = state.append(&metadata_stream, expected, vec![event])?;
            match metadata.max_count {
                Some(max) => state.retention.insert(stream.clone(), max),
                None => state.retention.remove(stream),
            };
            (result, state.log.len())
        };
        self.publish_length(length);
        debug!(stream = %stream, max_count = ?metadata.max_count, "stream metadata written");
        Ok(result)
    }

    async fn subscribe_to_all(
        &self,
        from: SubscribeFrom,
        filter: SubscriptionFilter,
    ) -> EventStoreResult<RecordedEventStream> {
        self.ensure_available()?;
        let next_index = match from {
            SubscribeFrom::Start => 0,
            SubscribeFrom::After(position) => {
                usize::try_from(position.into_inner()).unwrap_or(usize::MAX)
            }
        };
        let mut drops = self.shared.drops.subscribe();
        drops.borrow_and_update();
        let cursor = Cursor {
            shared: Arc::clone(&self.shared),
            appended: self.shared.appended.subscribe(),
            drops,
            filter,
            next_index,
            finished: false,
        };
        debug!(from = ?from, "subscription opened");
        Ok(stream::unfold(cursor, Cursor::next).boxed())
    }
}

/// State of one live `$all` subscription.
struct Cursor {
    shared: Arc<Shared>,
    appended: watch::Receiver<usize>,
    drops: watch::Receiver<u64>,
    filter: SubscriptionFilter,
    /// Index into the global log of the next event to consider
    next_index: usize,
    finished: bool,
}

impl Cursor {
    async fn next(mut self) -> Option<(EventStoreResult<RecordedEvent>, Self)> {
        loop {
            if self.finished {
                return None;
            }
            if self.drops.has_changed().unwrap_or(true) {
                return self.dropped();
            }
            if let Some(event) = self.scan() {
                return Some((Ok(event), self));
            }

            let dropped = tokio::select! {
                changed = self.appended.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    false
                }
                _ = self.drops.changed() => true,
            };
            if dropped {
                return self.dropped();
            }
        }
    }

    fn dropped(mut self) -> Option<(EventStoreResult<RecordedEvent>, Self)> {
        self.finished = true;
        let error = EventStoreError::SubscriptionDropped("connection lost".to_string());
        Some((Err(error), self))
    }

    /// Next event at or after `next_index` that passes the filter.
    fn scan(&mut self) -> Option<RecordedEvent> {
        let state = self.shared.state.read();
        while let Some(event) = state.log.get(self.next_index) {
            self.next_index += 1;
            if self.filter.matches(event) {
                return Some(event.clone());
            }
        }
        None
    }
}
