//! Event envelopes.
//!
//! [`Event`] is the typed form that aggregates produce and consume.
//! [`EventData`] is what gets appended to the log and [`RecordedEvent`] is
//! what the log hands back, with the revision and position it assigned.

use crate::types::{
    AggregateId, AggregateVersion, ContentType, EventId, Position, StreamId, StreamRevision,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A domain event payload with a stable logical type name.
///
/// The logical name is what gets written to the log and what the
/// [`TypeRegistry`](crate::serialization::TypeRegistry) dispatches on when
/// decoding, so it must not change once events have been stored.
///
/// Events are typically an enum over per-event structs; marking the enum
/// `#[serde(untagged)]` makes each payload encode as its struct alone. The
/// serializer refuses payloads that do not decode as their registered struct.
pub trait DomainEvent: Serialize + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Returns the logical type name of this event.
    fn event_type(&self) -> &'static str;
}

/// Metadata attached to an event, encoded separately from the payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// ID of the event that caused this event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    /// ID used to correlate related events across commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// ID of the user or system that initiated the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Additional headers, e.g. tracing context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl EventMetadata {
    /// Creates new empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the causation ID.
    #[must_use]
    pub const fn with_causation_id(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Sets the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the user ID.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fills unset fields from `fallback`. Fields already set win.
    #[must_use]
    pub fn merge(mut self, fallback: &Self) -> Self {
        if self.causation_id.is_none() {
            self.causation_id = fallback.causation_id;
        }
        if self.correlation_id.is_none() {
            self.correlation_id.clone_from(&fallback.correlation_id);
        }
        if self.user_id.is_none() {
            self.user_id.clone_from(&fallback.user_id);
        }
        for (key, value) in &fallback.custom {
            self.custom
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

/// A typed domain event addressed to one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<E> {
    /// Unique identifier of this event
    pub id: EventId,
    /// The aggregate this event belongs to
    pub aggregate_id: AggregateId,
    /// Kind of the aggregate, set when the aggregate applies the event
    pub aggregate_kind: String,
    /// Aggregate version after this event is applied
    pub version: AggregateVersion,
    /// When the event was created
    pub timestamp: Timestamp,
    /// The domain payload
    pub payload: E,
    /// Metadata carried alongside the payload
    pub metadata: EventMetadata,
}

impl<E> Event<E> {
    /// Creates an unversioned event for the given aggregate.
    pub fn new(aggregate_id: AggregateId, payload: E) -> Self {
        Self {
            id: EventId::generate(),
            aggregate_id,
            aggregate_kind: String::new(),
            version: AggregateVersion::NEW,
            timestamp: Timestamp::now(),
            payload,
            metadata: EventMetadata::new(),
        }
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the version, as assigned by the log.
    #[must_use]
    pub const fn with_version(mut self, version: AggregateVersion) -> Self {
        self.version = version;
        self
    }
}

impl<E: DomainEvent> Event<E> {
    /// Logical type name of the payload.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// An encoded event ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    /// Unique identifier
    pub event_id: EventId,
    /// Logical type name
    pub event_type: String,
    /// Encoding of `data`
    pub content_type: ContentType,
    /// Encoded payload
    pub data: Vec<u8>,
    /// Encoded metadata (JSON, may be empty)
    pub metadata: Vec<u8>,
}

/// An event as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Unique identifier
    pub event_id: EventId,
    /// Logical type name
    pub event_type: String,
    /// MIME type as recorded; parsed by the codec
    pub content_type: String,
    /// Encoded payload
    pub data: Vec<u8>,
    /// Encoded metadata
    pub metadata: Vec<u8>,
    /// The stream the event was appended to
    pub stream_id: StreamId,
    /// Revision within the stream
    pub revision: StreamRevision,
    /// Position in the global log
    pub position: Position,
    /// When the log recorded the event
    pub created_at: Timestamp,
}

impl RecordedEvent {
    /// Returns true for log-internal events such as `$metadata`.
    pub fn is_system_event(&self) -> bool {
        self.event_type.starts_with('$')
    }
}
