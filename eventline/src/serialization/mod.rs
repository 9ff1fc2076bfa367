//! Event codec.
//!
//! [`EventSerializer`] turns typed events into wire envelopes and back. The
//! payload's logical type name, not its Rust type, travels with the event,
//! and the [`TypeRegistry`] resolves it on the way back in. Metadata is
//! always JSON and can be decoded without touching the payload.

pub(crate) mod format;

use crate::errors::{CodecError, CodecResult};
use crate::event::{DomainEvent, Event, EventData, EventMetadata, RecordedEvent};
use crate::types::{AggregateId, AggregateVersion, ContentType};
pub use crate::type_registry::TypeRegistry;
use std::sync::Arc;

/// A payload and its metadata, encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvent {
    /// Encoded payload
    pub data: Vec<u8>,
    /// Encoded metadata
    pub metadata: Vec<u8>,
    /// Logical type name of the payload
    pub event_type: String,
    /// Encoding of `data`
    pub content_type: ContentType,
}

/// Codec for one family of domain events.
pub struct EventSerializer<E> {
    registry: Arc<TypeRegistry<E>>,
    content_type: ContentType,
}

impl<E> Clone for EventSerializer<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            content_type: self.content_type,
        }
    }
}

impl<E> std::fmt::Debug for EventSerializer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSerializer")
            .field("registry", &self.registry)
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl<E: DomainEvent> EventSerializer<E> {
    /// Creates a JSON serializer backed by `registry`.
    pub fn new(registry: Arc<TypeRegistry<E>>) -> Self {
        Self {
            registry,
            content_type: ContentType::Json,
        }
    }

    /// Sets the content type used for new payloads.
    #[must_use]
    pub const fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Content type used for new payloads.
    pub const fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// The registry used for decoding.
    pub fn registry(&self) -> &TypeRegistry<E> {
        &self.registry
    }

    /// Encodes a payload and its metadata.
    ///
    /// Only payloads this serializer can read back are encoded: the logical
    /// name must be registered ([`CodecError::UnknownEventType`]) and the
    /// encoded bytes must decode through the registered type
    /// ([`CodecError::SerializationFailed`]).
    pub fn serialize(&self, event: &E, metadata: &EventMetadata) -> CodecResult<SerializedEvent> {
        let event_type = event.event_type();
        if !self.registry.is_registered(event_type) {
            return Err(CodecError::UnknownEventType(event_type.to_string()));
        }
        let data = format::encode(event_type, event, self.content_type)?;
        self.registry
            .decode(event_type, &data, self.content_type)
            .map_err(|e| CodecError::SerializationFailed {
                event_type: event_type.to_string(),
                reason: format!("payload does not decode as its registered type: {e}"),
            })?;
        Ok(SerializedEvent {
            data,
            metadata: serialize_metadata(event_type, metadata)?,
            event_type: event_type.to_string(),
            content_type: self.content_type,
        })
    }

    /// Decodes a payload by logical type name.
    ///
    /// `content_type` is the MIME type as recorded by the log.
    pub fn deserialize(&self, data: &[u8], event_type: &str, content_type: &str) -> CodecResult<E> {
        let content_type = format::parse_content_type(content_type)?;
        self.registry.decode(event_type, data, content_type)
    }

    /// Encodes an aggregate event for appending.
    ///
    /// The event's own metadata takes precedence over `metadata`.
    pub fn to_event_data(
        &self,
        event: &Event<E>,
        metadata: &EventMetadata,
    ) -> CodecResult<EventData> {
        let metadata = event.metadata.clone().merge(metadata);
        let serialized = self.serialize(&event.payload, &metadata)?;
        Ok(EventData {
            event_id: event.id,
            event_type: serialized.event_type,
            content_type: serialized.content_type,
            data: serialized.data,
            metadata: serialized.metadata,
        })
    }

    /// Decodes a recorded event into an aggregate event.
    ///
    /// The event's version is the revision the log assigned to it.
    pub fn from_recorded(
        &self,
        recorded: &RecordedEvent,
        aggregate_id: AggregateId,
        aggregate_kind: &str,
    ) -> CodecResult<Event<E>> {
        let payload =
            self.deserialize(&recorded.data, &recorded.event_type, &recorded.content_type)?;
        let metadata = deserialize_metadata(&recorded.event_type, &recorded.metadata)?;
        Ok(Event {
            id: recorded.event_id,
            aggregate_id,
            aggregate_kind: aggregate_kind.to_string(),
            version: AggregateVersion::from(recorded.revision),
            timestamp: recorded.created_at,
            payload,
            metadata,
        })
    }
}

/// Encodes metadata as JSON. Empty metadata encodes to no bytes.
pub fn serialize_metadata(event_type: &str, metadata: &EventMetadata) -> CodecResult<Vec<u8>> {
    if metadata.is_empty() {
        return Ok(Vec::new());
    }
    format::encode(event_type, metadata, ContentType::Json)
}

/// Decodes metadata without looking at the payload.
pub fn deserialize_metadata(event_type: &str, bytes: &[u8]) -> CodecResult<EventMetadata> {
    if bytes.is_empty() {
        return Ok(EventMetadata::new());
    }
    format::decode(event_type, bytes, ContentType::Json)
}

/// Encodes a standalone value, for bookkeeping events that bypass the registry.
pub(crate) fn encode_value<T: serde::Serialize>(
    event_type: &str,
    value: &T,
) -> CodecResult<Vec<u8>> {
    format::encode(event_type, value, ContentType::Json)
}

/// Decodes a standalone value written by [`encode_value`].
pub(crate) fn decode_value<T: serde::de::DeserializeOwned>(
    recorded: &RecordedEvent,
) -> CodecResult<T> {
    let content_type = format::parse_content_type(&recorded.content_type)?;
    format::decode(&recorded.event_type, &recorded.data, content_type)
}
