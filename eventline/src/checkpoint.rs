//! Subscription checkpoints stored in the log itself.
//!
//! Each subscription id owns the stream `$checkpoint_stream_{id}`. Storing a
//! checkpoint appends a `CheckpointStored` event; the stream is capped to one
//! event by its `max_count` metadata, so loading reads the single newest
//! event backwards.

use crate::config::SubscriptionId;
use crate::errors::CheckpointResult;
use crate::event::{EventData, RecordedEvent};
use crate::event_store::{EventStoreClient, LogStore, ReadStreamOptions, StreamMetadata};
use crate::serialization::{decode_value, encode_value};
use crate::stream_name::checkpoint_stream_name;
use crate::types::{ContentType, EventId, ExpectedRevision, Position, StreamId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Logical type name of checkpoint events.
pub const CHECKPOINT_EVENT_TYPE: &str = "CheckpointStored";

/// Payload of a checkpoint event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStored {
    /// The subscription the checkpoint belongs to
    pub subscription_id: String,
    /// Global position of the last handled event
    pub position: u64,
    /// When the checkpoint was written
    pub recorded_at: Timestamp,
}

/// Reads and writes subscription checkpoints.
pub struct CheckpointRepository<L> {
    client: EventStoreClient<L>,
}

impl<L> Clone for CheckpointRepository<L> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<L> std::fmt::Debug for CheckpointRepository<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointRepository").finish_non_exhaustive()
    }
}

impl<L: LogStore> CheckpointRepository<L> {
    /// Creates a repository over a shared store.
    pub fn new(store: Arc<L>) -> Self {
        Self::with_client(EventStoreClient::new(store))
    }

    /// Creates a repository over an existing client.
    pub fn with_client(client: EventStoreClient<L>) -> Self {
        Self { client }
    }

    /// Last stored position of `subscription_id`, or the start of the log
    /// if none was stored yet.
    #[instrument(skip(self, subscription_id), fields(subscription = %subscription_id))]
    pub async fn load(&self, subscription_id: &SubscriptionId) -> CheckpointResult<Position> {
        let stream = checkpoint_stream_name(subscription_id.as_ref())?;
        let newest = match self
            .client
            .read_to_vec(&stream, ReadStreamOptions::backwards().max_count(1))
            .await
        {
            Ok(newest) => newest,
            Err(e) if e.is_stream_not_found() => {
                debug!("no checkpoint stored");
                return Ok(Position::start());
            }
            Err(e) => return Err(e.into()),
        };

        let position = match newest.first() {
            Some(recorded) => checkpoint_position(recorded)?,
            None => Position::start(),
        };
        debug!(position = %position, "checkpoint loaded");
        Ok(position)
    }

    /// Records `position` as the last handled position of `subscription_id`.
    ///
    /// The first store for a subscription caps its stream at one event
    /// before creating it.
    #[instrument(skip(self, subscription_id), fields(subscription = %subscription_id))]
    pub async fn store(
        &self,
        subscription_id: &SubscriptionId,
        position: Position,
    ) -> CheckpointResult<()> {
        let stream = checkpoint_stream_name(subscription_id.as_ref())?;
        let event = checkpoint_event(subscription_id, position)?;

        match self
            .client
            .append(&stream, vec![event.clone()], ExpectedRevision::StreamExists)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.is_wrong_expected_revision() || e.is_stream_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.create_stream(&stream).await?;
        match self
            .client
            .append(&stream, vec![event.clone()], ExpectedRevision::NoStream)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_wrong_expected_revision() => {
                debug!("checkpoint stream created concurrently");
                self.client
                    .append(&stream, vec![event], ExpectedRevision::StreamExists)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_stream(&self, stream: &StreamId) -> CheckpointResult<()> {
        let capped = StreamMetadata::with_max_count(1);
        match self
            .client
            .set_stream_metadata(stream, ExpectedRevision::NoStream, capped)
            .await
        {
            Ok(_) => {
                debug!(stream = %stream, "checkpoint stream capped");
                Ok(())
            }
            Err(e) if e.is_wrong_expected_revision() => {
                debug!(stream = %stream, "checkpoint stream metadata already written");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn checkpoint_event(
    subscription_id: &SubscriptionId,
    position: Position,
) -> CheckpointResult<EventData> {
    let payload = CheckpointStored {
        subscription_id: subscription_id.to_string(),
        position: position.into_inner(),
        recorded_at: Timestamp::now(),
    };
    Ok(EventData {
        event_id: EventId::generate(),
        event_type: CHECKPOINT_EVENT_TYPE.to_string(),
        content_type: ContentType::Json,
        data: encode_value(CHECKPOINT_EVENT_TYPE, &payload)?,
        metadata: Vec::new(),
    })
}

fn checkpoint_position(recorded: &RecordedEvent) -> CheckpointResult<Position> {
    let stored: CheckpointStored = decode_value(recorded)?;
    Ok(Position::new(stored.position))
}
