//! Shared fixtures for the integration tests: an order aggregate, publishers
//! that record what they receive and a log store wrapper that records the
//! preconditions it was asked to check.

#![allow(dead_code)]

use async_trait::async_trait;
use eventline::prelude::*;
use eventline::errors::EventStoreResult;
use eventline::event_store::RecordedEventStream;
use eventline_memory::InMemoryLogStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub customer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub sku: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub carrier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OrderEvent {
    Created(OrderCreated),
    ItemAdded(ItemAdded),
    Shipped(OrderShipped),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "OrderCreated",
            Self::ItemAdded(_) => "ItemAdded",
            Self::Shipped(_) => "OrderShipped",
        }
    }
}

impl From<OrderCreated> for OrderEvent {
    fn from(event: OrderCreated) -> Self {
        Self::Created(event)
    }
}

impl From<ItemAdded> for OrderEvent {
    fn from(event: ItemAdded) -> Self {
        Self::ItemAdded(event)
    }
}

impl From<OrderShipped> for OrderEvent {
    fn from(event: OrderShipped) -> Self {
        Self::Shipped(event)
    }
}

pub fn created(customer: &str) -> OrderEvent {
    OrderEvent::Created(OrderCreated {
        customer: customer.to_string(),
    })
}

pub fn item(sku: &str, quantity: u32) -> OrderEvent {
    OrderEvent::ItemAdded(ItemAdded {
        sku: sku.to_string(),
        quantity,
    })
}

pub fn shipped(carrier: &str) -> OrderEvent {
    OrderEvent::Shipped(OrderShipped {
        carrier: carrier.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order already created")]
    AlreadyCreated,
    #[error("order not created")]
    NotCreated,
    #[error("order already shipped")]
    AlreadyShipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub customer: Option<String>,
    pub items: Vec<(String, u32)>,
    pub carrier: Option<String>,
}

impl Aggregate for Order {
    const KIND: &'static str = "order";
    type Event = OrderEvent;
    type Error = OrderError;

    fn new(_id: AggregateId) -> Self {
        Self::default()
    }

    fn when(&mut self, event: &Event<OrderEvent>) -> Result<(), OrderError> {
        match &event.payload {
            OrderEvent::Created(created) => {
                if self.customer.is_some() {
                    return Err(OrderError::AlreadyCreated);
                }
                self.customer = Some(created.customer.clone());
            }
            OrderEvent::ItemAdded(added) => {
                if self.customer.is_none() {
                    return Err(OrderError::NotCreated);
                }
                if self.carrier.is_some() {
                    return Err(OrderError::AlreadyShipped);
                }
                self.items.push((added.sku.clone(), added.quantity));
            }
            OrderEvent::Shipped(shipped) => {
                if self.carrier.is_some() {
                    return Err(OrderError::AlreadyShipped);
                }
                self.carrier = Some(shipped.carrier.clone());
            }
        }
        Ok(())
    }
}

pub fn registry() -> TypeRegistry<OrderEvent> {
    TypeRegistry::new()
        .with_type::<OrderCreated>("OrderCreated")
        .and_then(|r| r.with_type::<ItemAdded>("ItemAdded"))
        .and_then(|r| r.with_type::<OrderShipped>("OrderShipped"))
        .unwrap()
}

pub fn serializer() -> EventSerializer<OrderEvent> {
    EventSerializer::new(Arc::new(registry()))
}

pub fn order_id(raw: &str) -> AggregateId {
    raw.parse().unwrap()
}

pub fn subscription_id(raw: &str) -> SubscriptionId {
    SubscriptionId::try_new(raw).unwrap()
}

pub fn subscription_config(raw: &str) -> SubscriptionConfig {
    SubscriptionConfig::new(subscription_id(raw))
        .with_resubscribe_delay(ResubscribeDelayMs::try_new(10).unwrap())
}

/// Records published events and optionally rejects the first few.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<StreamEvent<OrderEvent>>>>,
    attempts: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: usize) -> Self {
        let publisher = Self::default();
        publisher.failures_left.store(failures, Ordering::SeqCst);
        publisher
    }

    pub fn published(&self) -> Vec<StreamEvent<OrderEvent>> {
        self.published.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Polls until at least `count` events were published.
    pub async fn wait_for(&self, count: usize) -> Vec<StreamEvent<OrderEvent>> {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let published = self.published();
                if published.len() >= count {
                    return published;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match waited {
            Ok(published) => published,
            Err(_) => panic!(
                "expected {count} published events, got {}",
                self.published().len()
            ),
        }
    }
}

#[async_trait]
impl Publisher<OrderEvent> for RecordingPublisher {
    async fn publish(&self, event: StreamEvent<OrderEvent>) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(PublishError::Rejected(format!(
                "refusing event at {}",
                event.position
            )));
        }
        self.published.lock().push(event);
        Ok(())
    }
}

/// Passes every call through to an [`InMemoryLogStore`] and records the
/// precondition of every append.
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: InMemoryLogStore,
    appends: Arc<Mutex<Vec<(StreamId, ExpectedRevision)>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appends(&self) -> Vec<(StreamId, ExpectedRevision)> {
        self.appends.lock().clone()
    }
}

#[async_trait]
impl LogStore for RecordingStore {
    async fn append_to_stream(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        events: Vec<EventData>,
    ) -> EventStoreResult<AppendResult> {
        self.appends.lock().push((stream.clone(), expected));
        self.inner.append_to_stream(stream, expected, events).await
    }

    async fn read_stream(
        &self,
        stream: &StreamId,
        options: ReadStreamOptions,
    ) -> EventStoreResult<RecordedEventStream> {
        self.inner.read_stream(stream, options).await
    }

    async fn set_stream_metadata(
        &self,
        stream: &StreamId,
        expected: ExpectedRevision,
        metadata: StreamMetadata,
    ) -> EventStoreResult<AppendResult> {
        self.inner
            .set_stream_metadata(stream, expected, metadata)
            .await
    }

    async fn subscribe_to_all(
        &self,
        from: SubscribeFrom,
        filter: SubscriptionFilter,
    ) -> EventStoreResult<RecordedEventStream> {
        self.inner.subscribe_to_all(from, filter).await
    }
}
