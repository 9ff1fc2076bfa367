//! Wire encodings for event payloads.
//!
//! JSON goes through `serde_json`; binary payloads are MessagePack with named
//! fields, so structs stay decodable when fields are reordered.

use crate::errors::{CodecError, CodecResult};
use crate::types::ContentType;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` in the given content type.
pub(crate) fn encode<T>(
    event_type: &str,
    value: &T,
    content_type: ContentType,
) -> CodecResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let encoded = match content_type {
        ContentType::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        ContentType::Binary => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
    };
    encoded.map_err(|reason| CodecError::SerializationFailed {
        event_type: event_type.to_string(),
        reason,
    })
}

/// Decodes `data` from the given content type.
pub(crate) fn decode<T>(
    event_type: &str,
    data: &[u8],
    content_type: ContentType,
) -> CodecResult<T>
where
    T: DeserializeOwned,
{
    let decoded = match content_type {
        ContentType::Json => serde_json::from_slice(data).map_err(|e| e.to_string()),
        ContentType::Binary => rmp_serde::from_slice(data).map_err(|e| e.to_string()),
    };
    decoded.map_err(|reason| CodecError::DeserializationFailed {
        event_type: event_type.to_string(),
        reason,
    })
}

/// Parses a recorded MIME type.
pub(crate) fn parse_content_type(mime: &str) -> CodecResult<ContentType> {
    ContentType::from_mime_type(mime)
        .ok_or_else(|| CodecError::UnsupportedContentType(mime.to_string()))
}
