//! Loading and saving aggregates.
//!
//! An aggregate is rebuilt by replaying its whole stream and saved by
//! appending its staged events under an optimistic-concurrency precondition
//! derived from the version it was loaded at. No locks are taken: when two
//! writers race on the same aggregate exactly one append wins and the other
//! gets [`AggregateStoreError::Conflict`].

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::config::AggregateStoreConfig;
use crate::errors::{AggregateStoreError, AggregateStoreResult, EventStoreError};
use crate::event::EventMetadata;
use crate::event_store::{AppendResult, EventStoreClient, LogStore, ReadStreamOptions};
use crate::serialization::EventSerializer;
use crate::stream_name::stream_name;
use crate::types::{AggregateId, ExpectedRevision, ReadFrom, StreamId};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Repository for aggregates of type `A` over log store `L`.
pub struct AggregateStore<L, A: Aggregate> {
    client: EventStoreClient<L>,
    serializer: EventSerializer<A::Event>,
    config: AggregateStoreConfig,
    _aggregate: PhantomData<fn() -> A>,
}

impl<L, A: Aggregate> Clone for AggregateStore<L, A> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            serializer: self.serializer.clone(),
            config: self.config,
            _aggregate: PhantomData,
        }
    }
}

impl<L, A: Aggregate> std::fmt::Debug for AggregateStore<L, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore")
            .field("kind", &A::KIND)
            .field("serializer", &self.serializer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L: LogStore, A: Aggregate> AggregateStore<L, A> {
    /// Creates a store with the default configuration.
    pub fn new(store: Arc<L>, serializer: EventSerializer<A::Event>) -> Self {
        Self::with_client(EventStoreClient::new(store), serializer)
    }

    /// Creates a store over an existing client.
    pub fn with_client(client: EventStoreClient<L>, serializer: EventSerializer<A::Event>) -> Self {
        Self {
            client,
            serializer,
            config: AggregateStoreConfig::default(),
            _aggregate: PhantomData,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub const fn with_config(mut self, config: AggregateStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Rebuilds aggregate `id` from its full history.
    ///
    /// # Errors
    /// * `AggregateStoreError::AggregateNotFound` - if the aggregate's stream does not exist
    /// * `AggregateStoreError::Codec` - if a recorded event cannot be decoded
    /// * `AggregateStoreError::Aggregate` - if the aggregate rejects its own history
    #[instrument(skip(self, id), fields(kind = A::KIND, id = %id))]
    pub async fn load(&self, id: AggregateId) -> AggregateStoreResult<AggregateRoot<A>> {
        let stream = stream_name(A::KIND, id)?;
        let mut aggregate = AggregateRoot::new(id);
        if self.config.track_history {
            aggregate = aggregate.with_history_tracking();
        }

        let batch_size = u64::from(self.config.read_batch_size);
        let mut from = ReadFrom::Start;
        let mut replayed = 0_usize;
        loop {
            let options = ReadStreamOptions::forwards().from(from).max_count(batch_size);
            let batch = match self.client.read_to_vec(&stream, options).await {
                Ok(batch) => batch,
                Err(e) if e.is_stream_not_found() => {
                    debug!(stream = %stream, "no stream for aggregate");
                    return Err(AggregateStoreError::AggregateNotFound { kind: A::KIND, id });
                }
                Err(e) => return Err(e.into()),
            };
            let full_batch = batch.len() as u64 >= batch_size;
            for recorded in batch {
                from = ReadFrom::Revision(recorded.revision.next());
                let event = self
                    .serializer
                    .from_recorded(&recorded, id, A::KIND)
                    .map_err(|source| AggregateStoreError::Codec {
                        stream: stream.clone(),
                        source,
                    })?;
                aggregate.raise_event(event)?;
                replayed += 1;
            }
            if !full_batch {
                break;
            }
        }

        debug!(events = replayed, version = %aggregate.version(), "aggregate loaded");
        Ok(aggregate)
    }

    /// Checks whether aggregate `id` has been saved.
    #[instrument(skip(self, id), fields(kind = A::KIND, id = %id))]
    pub async fn exists(&self, id: AggregateId) -> AggregateStoreResult<bool> {
        let stream = stream_name(A::KIND, id)?;
        Ok(self.client.exists(&stream).await?)
    }

    /// Appends the aggregate's staged events.
    ///
    /// Returns `None` without touching the log when nothing is staged. The
    /// append expects no stream for a never-persisted aggregate and otherwise
    /// the exact revision the aggregate was loaded at. `metadata` fills in
    /// whatever the staged events do not set themselves.
    ///
    /// # Errors
    /// * `AggregateStoreError::Conflict` - if another writer appended first
    /// * `AggregateStoreError::Codec` - if a staged event cannot be encoded
    #[instrument(skip_all, fields(kind = A::KIND, id = %aggregate.id()))]
    pub async fn save(
        &self,
        aggregate: &mut AggregateRoot<A>,
        metadata: EventMetadata,
    ) -> AggregateStoreResult<Option<AppendResult>> {
        if !aggregate.has_changes() {
            debug!("no staged events");
            return Ok(None);
        }

        let stream = aggregate.stream_id()?;
        let events = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| self.serializer.to_event_data(event, &metadata))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| AggregateStoreError::Codec {
                stream: stream.clone(),
                source,
            })?;
        let count = events.len();
        let expected = match aggregate.original_version().as_revision() {
            None => ExpectedRevision::NoStream,
            Some(revision) => ExpectedRevision::Exact(revision),
        };

        let result = self
            .client
            .append(&stream, events, expected)
            .await
            .map_err(|e| conflict_or_failure(&stream, e))?;
        if aggregate.applied_events().is_some() {
            aggregate.commit_into_history();
        } else {
            aggregate.mark_committed();
        }

        info!(
            events = count,
            version = %aggregate.version(),
            position = %result.position,
            "aggregate saved"
        );
        Ok(Some(result))
    }
}

fn conflict_or_failure(stream: &StreamId, error: EventStoreError) -> AggregateStoreError {
    if error.is_wrong_expected_revision() {
        warn!(stream = %stream, "concurrent write detected");
        AggregateStoreError::Conflict {
            stream: stream.clone(),
            source: error,
        }
    } else {
        AggregateStoreError::EventStore(error)
    }
}
