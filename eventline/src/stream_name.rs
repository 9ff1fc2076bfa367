//! Stream naming conventions.
//!
//! An aggregate's events live in the stream `"{kind}-{id}"` with the kind
//! lowercased. Subscription checkpoints live in
//! `"$checkpoint_stream_{subscription_id}"`; the `$` prefix keeps them out of
//! the way of business streams.

use crate::types::{AggregateId, StreamId, StreamIdError};

/// Prefix of every checkpoint stream.
pub const CHECKPOINT_STREAM_PREFIX: &str = "$checkpoint_stream_";

/// Name of the stream holding the events of aggregate `id` of kind `kind`.
pub fn stream_name(kind: &str, id: AggregateId) -> Result<StreamId, StreamIdError> {
    StreamId::try_new(format!("{}-{id}", kind.to_lowercase()))
}

/// Name of the stream holding the checkpoint of `subscription_id`.
pub fn checkpoint_stream_name(subscription_id: &str) -> Result<StreamId, StreamIdError> {
    StreamId::try_new(format!("{CHECKPOINT_STREAM_PREFIX}{subscription_id}"))
}

/// Returns true for streams written by the checkpoint repository.
pub fn is_checkpoint_stream(stream: &StreamId) -> bool {
    stream.as_ref().starts_with(CHECKPOINT_STREAM_PREFIX)
}
