//! Catch-up subscription worker.
//!
//! A [`SubscriptionWorker`] follows the global log from its last stored
//! checkpoint, decodes business events and hands them to a [`Publisher`],
//! storing a new checkpoint after each event the publisher accepted. Delivery
//! is at-least-once: an event whose checkpoint was not stored is delivered
//! again after a restart.
//!
//! The worker never gives up. Whenever a subscription attempt ends, whether
//! the log dropped it or an event could not be handled, it waits the
//! configured delay and resubscribes from the last stored checkpoint. Only a
//! [`CancellationSignal`] stops it.
//!
//! ```rust,ignore
//! let worker = SubscriptionWorker::new(store, serializer, Arc::new(publisher), config);
//! let handle = worker.spawn();
//! // ...
//! handle.shutdown().await?;
//! ```

use crate::checkpoint::CheckpointRepository;
use crate::config::{SubscriptionConfig, SubscriptionId};
use crate::errors::{PublishError, SubscriptionError};
use crate::event::{DomainEvent, EventMetadata, RecordedEvent};
use crate::event_store::{EventStoreClient, LogStore, SubscriptionFilter};
use crate::serialization::{deserialize_metadata, EventSerializer};
use crate::stream_name::is_checkpoint_stream;
use crate::types::{EventId, Position, StreamId, StreamRevision, SubscribeFrom, Timestamp};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// A decoded event as handed to a [`Publisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent<E> {
    /// Unique identifier
    pub event_id: EventId,
    /// Logical type name
    pub event_type: String,
    /// The decoded payload
    pub event: E,
    /// Decoded metadata
    pub metadata: EventMetadata,
    /// The stream the event was appended to
    pub stream_id: StreamId,
    /// Revision within that stream
    pub version: StreamRevision,
    /// Position in the global log
    pub position: Position,
    /// When the log recorded the event
    pub created_at: Timestamp,
}

/// Downstream consumer of subscription events.
///
/// A publisher that returns an error gets the same event again after the
/// worker resubscribes, so `publish` should be idempotent per `event_id`.
#[async_trait]
pub trait Publisher<E>: Send + Sync + 'static {
    /// Handles one event.
    async fn publish(&self, event: StreamEvent<E>) -> Result<(), PublishError>;
}

/// Creates a connected cancellation trigger and signal.
pub fn cancellation() -> (CancellationTrigger, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (CancellationTrigger { tx }, CancellationSignal { rx })
}

/// Fires a [`CancellationSignal`].
#[derive(Debug)]
pub struct CancellationTrigger {
    tx: watch::Sender<bool>,
}

impl CancellationTrigger {
    /// Requests cancellation. Calling it again has no effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation requested through a [`CancellationTrigger`].
///
/// If the trigger is dropped without firing, the signal never fires.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Handle to a worker started with [`SubscriptionWorker::spawn`].
///
/// Dropping the handle leaves the worker running.
#[derive(Debug)]
pub struct SubscriptionHandle {
    trigger: CancellationTrigger,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Requests the worker to stop.
    pub fn cancel(&self) {
        self.trigger.cancel();
    }

    /// Waits for the worker task to finish.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }

    /// Cancels the worker and waits for it to finish.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.cancel();
        self.join().await
    }
}

/// Follows the global log on behalf of one subscription id.
pub struct SubscriptionWorker<L, E, P> {
    client: EventStoreClient<L>,
    checkpoints: CheckpointRepository<L>,
    serializer: EventSerializer<E>,
    publisher: Arc<P>,
    config: SubscriptionConfig,
    filter: SubscriptionFilter,
}

impl<L, E, P> std::fmt::Debug for SubscriptionWorker<L, E, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionWorker")
            .field("config", &self.config)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl<L, E, P> SubscriptionWorker<L, E, P>
where
    L: LogStore,
    E: DomainEvent,
    P: Publisher<E>,
{
    /// Creates a worker that skips system events.
    pub fn new(
        store: Arc<L>,
        serializer: EventSerializer<E>,
        publisher: Arc<P>,
        config: SubscriptionConfig,
    ) -> Self {
        let client = EventStoreClient::new(store);
        Self {
            checkpoints: CheckpointRepository::with_client(client.clone()),
            client,
            serializer,
            publisher,
            config,
            filter: SubscriptionFilter::exclude_system_events(),
        }
    }

    /// Only follows streams whose name starts with `prefix`.
    ///
    /// Events of other streams are neither decoded nor checkpointed.
    #[must_use]
    pub fn with_stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filter = self.filter.with_stream_prefix(prefix);
        self
    }

    /// The subscription id checkpoints are stored under.
    pub const fn subscription_id(&self) -> &SubscriptionId {
        &self.config.subscription_id
    }

    /// Runs the worker on a new tokio task.
    pub fn spawn(self) -> SubscriptionHandle {
        let (trigger, signal) = cancellation();
        let task = tokio::spawn(self.run(signal));
        SubscriptionHandle { trigger, task }
    }

    /// Follows the log until `cancel` fires.
    #[instrument(skip_all, fields(subscription = %self.config.subscription_id))]
    pub async fn run(self, mut cancel: CancellationSignal) {
        let delay = self.config.resubscribe_delay.as_duration();
        info!("subscription worker started");

        while !cancel.is_cancelled() {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = self.run_once() => outcome,
            };
            match outcome {
                Ok(()) => warn!(?delay, "subscription ended, resubscribing"),
                Err(SubscriptionError::Dropped(e)) => {
                    warn!(error = %e, ?delay, "subscription dropped, resubscribing");
                }
                Err(e) => {
                    error!(error = %e, ?delay, "event handling failed, resubscribing");
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("subscription worker stopped");
    }

    /// One subscription attempt: resume after the stored checkpoint and
    /// handle events until the subscription ends or an event fails.
    async fn run_once(&self) -> Result<(), SubscriptionError> {
        let subscription_id = &self.config.subscription_id;
        let checkpoint = self.checkpoints.load(subscription_id).await?;
        let mut events = self
            .client
            .subscribe_to_all(SubscribeFrom::from(checkpoint), self.filter.clone())
            .await?;
        info!(after = %checkpoint, "subscribed to $all");

        while let Some(recorded) = events.next().await {
            self.handle(recorded?).await?;
        }
        Ok(())
    }

    async fn handle(&self, recorded: RecordedEvent) -> Result<(), SubscriptionError> {
        let position = recorded.position;
        if is_checkpoint_stream(&recorded.stream_id) {
            trace!(position = %position, "skipping checkpoint event");
            return Ok(());
        }
        if recorded.is_system_event() || recorded.data.is_empty() {
            trace!(
                position = %position,
                event_type = %recorded.event_type,
                "skipping system event"
            );
            return Ok(());
        }

        let codec_error = |source| SubscriptionError::Codec {
            position: position.into_inner(),
            source,
        };
        let event = self
            .serializer
            .deserialize(&recorded.data, &recorded.event_type, &recorded.content_type)
            .map_err(codec_error)?;
        let metadata =
            deserialize_metadata(&recorded.event_type, &recorded.metadata).map_err(codec_error)?;

        self.publisher
            .publish(StreamEvent {
                event_id: recorded.event_id,
                event_type: recorded.event_type,
                event,
                metadata,
                stream_id: recorded.stream_id,
                version: recorded.revision,
                position,
                created_at: recorded.created_at,
            })
            .await
            .map_err(|source| SubscriptionError::Publish {
                position: position.into_inner(),
                source,
            })?;

        self.checkpoints
            .store(&self.config.subscription_id, position)
            .await?;
        debug!(position = %position, "event published");
        Ok(())
    }
}
