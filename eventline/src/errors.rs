//! Error types for `eventline`.
//!
//! Each subsystem has its own error enum so callers can tell apart failures
//! that are worth retrying from those that indicate corrupted history or a
//! programming error:
//!
//! - [`AggregateError`]: replay and staging failures inside an aggregate root
//! - [`CodecError`]: encoding and decoding of event payloads and metadata
//! - [`EventStoreError`]: failures reported by the log store
//! - [`AggregateStoreError`]: load and save of whole aggregates
//! - [`CheckpointError`]: reading and writing subscription checkpoints
//! - [`PublishError`]: failures reported by a downstream publisher
//! - [`SubscriptionError`]: a single subscription attempt ended
//!
//! # Handling conflicts
//!
//! ```rust,ignore
//! match store.save(&mut order, EventMetadata::new()).await {
//!     Ok(_) => {}
//!     Err(AggregateStoreError::Conflict { .. }) => {
//!         // Another writer got there first: reload and retry the command.
//!         let order = store.load(order.id()).await?;
//!         retry(order).await?;
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use crate::types::{
    AggregateId, AggregateVersion, ExpectedRevision, StreamId, StreamIdError, StreamRevision,
};
use thiserror::Error;

/// Boxed error returned by aggregate event handlers and publishers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while applying events to an aggregate root.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The event targets a different aggregate.
    #[error("event for aggregate {event_aggregate} cannot be applied to aggregate {aggregate}")]
    InvalidAggregate {
        /// The aggregate the event was applied to
        aggregate: AggregateId,
        /// The aggregate the event belongs to
        event_aggregate: AggregateId,
    },

    /// History was replayed out of order.
    #[error(
        "event version {event_version} is not newer than version {current} of aggregate {aggregate}"
    )]
    InvalidEventVersion {
        /// The aggregate being replayed
        aggregate: AggregateId,
        /// The aggregate's version before the event
        current: AggregateVersion,
        /// The version carried by the event
        event_version: AggregateVersion,
    },

    /// The aggregate's own handler refused the event.
    #[error("aggregate {aggregate} failed to apply {event_type}: {source}")]
    Handler {
        /// The aggregate that rejected the event
        aggregate: AggregateId,
        /// Logical type of the rejected event
        event_type: String,
        /// The handler's error
        #[source]
        source: BoxError,
    },
}

/// Errors raised by the event codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Encoding an event or its metadata failed.
    #[error("failed to serialize {event_type}: {reason}")]
    SerializationFailed {
        /// Logical type being encoded
        event_type: String,
        /// Encoder message
        reason: String,
    },

    /// The payload could not be decoded into the registered shape.
    #[error("failed to deserialize {event_type}: {reason}")]
    DeserializationFailed {
        /// Logical type being decoded
        event_type: String,
        /// Decoder message
        reason: String,
    },

    /// No decoder is registered for the logical type name.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The recorded content type is not one the codec understands.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// A logical type name was registered twice.
    #[error("event type '{0}' is already registered")]
    TypeNameConflict(String),
}

/// Identifies the log-store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Appending events to a stream.
    AppendToStream,
    /// Reading events from a stream.
    ReadStream,
    /// Writing stream metadata.
    SetStreamMetadata,
    /// Subscribing to the global log.
    SubscribeToAll,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AppendToStream => write!(f, "append_to_stream"),
            Self::ReadStream => write!(f, "read_stream"),
            Self::SetStreamMetadata => write!(f, "set_stream_metadata"),
            Self::SubscribeToAll => write!(f, "subscribe_to_all"),
        }
    }
}

/// Errors reported by the log store.
///
/// # Common Scenarios
///
/// - **StreamNotFound**: normal for aggregates that were never saved
/// - **WrongExpectedRevision**: another writer appended first; reload and retry
/// - **SubscriptionDropped**: connectivity loss on a live subscription
/// - **Unavailable**: the store cannot be reached at all
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventStoreError {
    /// The stream does not exist.
    #[error("stream '{0}' not found")]
    StreamNotFound(StreamId),

    /// The append precondition did not hold.
    #[error("wrong expected revision on stream '{stream}': expected {expected}, actual {actual:?}")]
    WrongExpectedRevision {
        /// The stream that was written
        stream: StreamId,
        /// The precondition supplied by the writer
        expected: ExpectedRevision,
        /// The revision of the stream's last event, if any
        actual: Option<StreamRevision>,
    },

    /// The store rejected the append for another reason.
    #[error("append to stream '{stream}' failed: {reason}")]
    AppendFailed {
        /// The stream that was written
        stream: StreamId,
        /// Reason given by the store
        reason: String,
    },

    /// Reading failed midway.
    #[error("read from stream '{stream}' failed: {reason}")]
    ReadFailed {
        /// The stream being read
        stream: StreamId,
        /// Reason given by the store
        reason: String,
    },

    /// A live subscription lost its connection.
    #[error("subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// The store cannot be reached.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// A lower-level failure annotated with the operation and stream.
    #[error("{operation} on '{stream}' failed: {source}")]
    Context {
        /// The failed operation
        operation: Operation,
        /// The stream addressed by the operation
        stream: String,
        /// The underlying error
        #[source]
        source: Box<EventStoreError>,
    },
}

impl EventStoreError {
    /// Annotates the error with the operation and stream it came from.
    ///
    /// Errors that already carry context are returned unchanged.
    #[must_use]
    pub fn with_context(self, operation: Operation, stream: impl std::fmt::Display) -> Self {
        match self {
            Self::Context { .. } => self,
            other => Self::Context {
                operation,
                stream: stream.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, skipping context layers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns true for an optimistic-concurrency conflict.
    pub fn is_wrong_expected_revision(&self) -> bool {
        matches!(self.root_cause(), Self::WrongExpectedRevision { .. })
    }

    /// Returns true when the addressed stream does not exist.
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::StreamNotFound(_))
    }
}

/// Errors from loading or saving aggregates.
#[derive(Debug, Error)]
pub enum AggregateStoreError {
    /// No stream exists for the aggregate.
    #[error("{kind} aggregate {id} not found")]
    AggregateNotFound {
        /// Aggregate kind
        kind: &'static str,
        /// Aggregate id
        id: AggregateId,
    },

    /// Another writer appended to the stream since the aggregate was loaded.
    #[error("concurrency conflict on stream '{stream}': {source}")]
    Conflict {
        /// The aggregate's stream
        stream: StreamId,
        /// The store's conflict report
        #[source]
        source: EventStoreError,
    },

    /// Replaying history into the aggregate failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// An event could not be encoded or decoded.
    #[error("codec failure on stream '{stream}': {source}")]
    Codec {
        /// The aggregate's stream
        stream: StreamId,
        /// The codec error
        #[source]
        source: CodecError,
    },

    /// The log store failed.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// The aggregate kind and id do not form a valid stream name.
    #[error("invalid stream name: {0}")]
    InvalidStreamName(#[from] StreamIdError),
}

/// Errors from the checkpoint repository.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The log store failed.
    #[error("checkpoint store failed: {0}")]
    EventStore(#[from] EventStoreError),

    /// A checkpoint event could not be encoded or decoded.
    #[error("checkpoint codec failed: {0}")]
    Codec(#[from] CodecError),

    /// The subscription id does not form a valid stream name.
    #[error("invalid checkpoint stream name: {0}")]
    InvalidStreamName(#[from] StreamIdError),
}

/// Error returned by a downstream publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The publisher refused the event.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The publisher's transport failed.
    #[error("publish failed: {0}")]
    Failed(#[source] BoxError),
}

/// Why a single subscription attempt ended.
///
/// The catch-up worker logs these and resubscribes; they never reach the
/// worker's caller.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscription could not be opened or was dropped.
    #[error("subscription dropped: {0}")]
    Dropped(#[from] EventStoreError),

    /// A delivered event could not be decoded.
    #[error("failed to decode event at position {position}: {source}")]
    Codec {
        /// Global position of the event
        position: u64,
        /// The codec error
        #[source]
        source: CodecError,
    },

    /// The downstream publisher failed.
    #[error("failed to publish event at position {position}: {source}")]
    Publish {
        /// Global position of the event
        position: u64,
        /// The publisher's error
        #[source]
        source: PublishError,
    },

    /// Loading or storing the checkpoint failed.
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Result type for log-store operations.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for aggregate store operations.
pub type AggregateStoreResult<T> = Result<T, AggregateStoreError>;

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;
