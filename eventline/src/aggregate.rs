//! Aggregate roots.
//!
//! A concrete aggregate implements [`Aggregate`]: a kind, an event type and a
//! `when` handler that folds one event into its state. [`AggregateRoot`]
//! owns that state together with the bookkeeping every aggregate needs
//! (identity, version, staged events) and drives the handler.
//!
//! ```rust,ignore
//! let mut order = AggregateRoot::<Order>::new(AggregateId::generate());
//! order.record(OrderEvent::Created(OrderCreated { customer: "c-1".into() }))?;
//! store.save(&mut order, EventMetadata::new()).await?;
//! ```

use crate::errors::{AggregateError, CodecError};
use crate::event::{DomainEvent, Event, EventMetadata};
use crate::stream_name::stream_name;
use crate::types::{AggregateId, AggregateVersion, StreamId, StreamIdError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Domain logic of an aggregate.
///
/// `when` must be deterministic: folding the same events into a fresh
/// instance always yields the same state.
pub trait Aggregate: Send + Sync + 'static {
    /// Kind name, used to build stream names.
    const KIND: &'static str;

    /// Events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Error returned when the aggregate refuses an event.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates the empty state of aggregate `id`.
    fn new(id: AggregateId) -> Self;

    /// Folds one event into the state.
    fn when(&mut self, event: &Event<Self::Event>) -> Result<(), Self::Error>;
}

/// Serialized state of an aggregate at a given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate's id
    pub aggregate_id: AggregateId,
    /// The aggregate's kind
    pub kind: String,
    /// JSON-encoded state
    pub state: Vec<u8>,
    /// Version the state corresponds to
    pub version: AggregateVersion,
}

/// An aggregate's state plus its persistence bookkeeping.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: AggregateVersion,
    original_version: AggregateVersion,
    uncommitted: Vec<Event<A::Event>>,
    applied: Option<Vec<Event<A::Event>>>,
    state: A,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a never-persisted aggregate.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: AggregateVersion::NEW,
            original_version: AggregateVersion::NEW,
            uncommitted: Vec::new(),
            applied: None,
            state: A::new(id),
        }
    }

    /// Keeps every applied event in memory, see [`applied_events`](Self::applied_events).
    #[must_use]
    pub fn with_history_tracking(mut self) -> Self {
        if self.applied.is_none() {
            self.applied = Some(Vec::new());
        }
        self
    }

    /// Restores an aggregate from a snapshot written by [`to_snapshot`](Self::to_snapshot).
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, CodecError>
    where
        A: DeserializeOwned,
    {
        let state = serde_json::from_slice(&snapshot.state).map_err(|e| {
            CodecError::DeserializationFailed {
                event_type: snapshot.kind.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            id: snapshot.aggregate_id,
            version: snapshot.version,
            original_version: snapshot.version,
            uncommitted: Vec::new(),
            applied: None,
            state,
        })
    }

    /// The aggregate's id.
    pub const fn id(&self) -> AggregateId {
        self.id
    }

    /// The aggregate's kind.
    pub const fn kind(&self) -> &'static str {
        A::KIND
    }

    /// Version after the last applied event.
    pub const fn version(&self) -> AggregateVersion {
        self.version
    }

    /// Version as last read from or written to the store.
    pub const fn original_version(&self) -> AggregateVersion {
        self.original_version
    }

    /// The domain state.
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// Events staged since the last commit.
    pub fn uncommitted_events(&self) -> &[Event<A::Event>] {
        &self.uncommitted
    }

    /// Committed history, if tracking is enabled.
    pub fn applied_events(&self) -> Option<&[Event<A::Event>]> {
        self.applied.as_deref()
    }

    /// Returns true if events are staged.
    pub fn has_changes(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Name of the stream holding this aggregate's events.
    pub fn stream_id(&self) -> Result<StreamId, StreamIdError> {
        stream_name(A::KIND, self.id)
    }

    /// Rebuilds state from full history, one version per event.
    ///
    /// Events are treated as committed: nothing is staged.
    pub fn load<I>(&mut self, events: I) -> Result<(), AggregateError>
    where
        I: IntoIterator<Item = Event<A::Event>>,
    {
        for mut event in events {
            self.check_target(&event)?;
            event.aggregate_kind = A::KIND.to_string();
            self.handle(&event)?;
            self.version = self.version.next();
            self.original_version = self.version;
            event.version = self.version;
            self.remember(event);
        }
        Ok(())
    }

    /// Stages a new event produced by a command.
    ///
    /// The event is tagged with this aggregate's kind and stamped with the
    /// new version. An event whose id is already staged is ignored.
    pub fn apply(&mut self, mut event: Event<A::Event>) -> Result<(), AggregateError> {
        self.check_target(&event)?;
        if self.uncommitted.iter().any(|staged| staged.id == event.id) {
            return Ok(());
        }
        event.aggregate_kind = A::KIND.to_string();
        self.handle(&event)?;
        self.version = self.version.next();
        event.version = self.version;
        self.uncommitted.push(event);
        Ok(())
    }

    /// Stages a new event with empty metadata.
    pub fn record(&mut self, payload: A::Event) -> Result<(), AggregateError> {
        self.record_with_metadata(payload, EventMetadata::new())
    }

    /// Stages a new event with the given metadata.
    pub fn record_with_metadata(
        &mut self,
        payload: A::Event,
        metadata: EventMetadata,
    ) -> Result<(), AggregateError> {
        self.apply(Event::new(self.id, payload).with_metadata(metadata))
    }

    /// Folds an event read from the store, adopting its version.
    ///
    /// The event must be newer than the aggregate. It counts as committed.
    pub fn raise_event(&mut self, mut event: Event<A::Event>) -> Result<(), AggregateError> {
        self.check_target(&event)?;
        if event.version <= self.version {
            return Err(AggregateError::InvalidEventVersion {
                aggregate: self.id,
                current: self.version,
                event_version: event.version,
            });
        }
        event.aggregate_kind = A::KIND.to_string();
        self.handle(&event)?;
        self.version = event.version;
        self.original_version = event.version;
        self.remember(event);
        Ok(())
    }

    /// Commits the staged events and captures the current state.
    ///
    /// Staged events move into the applied history when tracking is enabled.
    pub fn to_snapshot(&mut self) -> Result<Snapshot, CodecError>
    where
        A: Serialize,
    {
        let state =
            serde_json::to_vec(&self.state).map_err(|e| CodecError::SerializationFailed {
                event_type: A::KIND.to_string(),
                reason: e.to_string(),
            })?;
        self.commit_into_history();
        Ok(Snapshot {
            aggregate_id: self.id,
            kind: A::KIND.to_string(),
            state,
            version: self.version,
        })
    }

    /// Clears the staged events after they were appended.
    ///
    /// Applied history is left untouched.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
        self.original_version = self.version;
    }

    /// Clears the staged events after they were appended, moving them into
    /// the applied history when it is tracked.
    pub fn commit_into_history(&mut self) {
        let staged = std::mem::take(&mut self.uncommitted);
        if let Some(applied) = self.applied.as_mut() {
            applied.extend(staged);
        }
        self.original_version = self.version;
    }

    fn check_target(&self, event: &Event<A::Event>) -> Result<(), AggregateError> {
        if event.aggregate_id == self.id {
            Ok(())
        } else {
            Err(AggregateError::InvalidAggregate {
                aggregate: self.id,
                event_aggregate: event.aggregate_id,
            })
        }
    }

    fn handle(&mut self, event: &Event<A::Event>) -> Result<(), AggregateError> {
        self.state
            .when(event)
            .map_err(|source| AggregateError::Handler {
                aggregate: self.id,
                event_type: event.event_type().to_string(),
                source: Box::new(source),
            })
    }

    fn remember(&mut self, event: Event<A::Event>) {
        if let Some(applied) = self.applied.as_mut() {
            applied.push(event);
        }
    }
}
