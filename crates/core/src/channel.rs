//! The broker channel trait.

use crate::{AckMode, BrokerError, ConsumerTag, Delivery, DeliveryMode, DeliveryTag, ExchangeKind, QueueOptions};
use async_trait::async_trait;

/// One logical session with the broker.
///
/// Methods take `&mut self`: a channel has a single owner, so publishing and
/// acknowledging from one channel is always single-writer. Dropping a channel
/// closes it; every delivery it has not acknowledged goes back to its queue
/// and is redelivered with [`Delivery::redelivered`] set.
///
/// Declarations are idempotent when repeated with the same options and fail
/// with [`BrokerError::PreconditionFailed`] when the options differ.
#[async_trait]
pub trait Channel: Send {
    async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    /// Declare a queue and return its name (generated when `name` is empty).
    async fn declare_queue(&mut self, name: &str, options: QueueOptions)
        -> Result<String, BrokerError>;

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Delete a queue, dropping its messages and ending its consumers.
    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Drop every ready message in a queue; returns how many were dropped.
    async fn purge_queue(&mut self, queue: &str) -> Result<usize, BrokerError>;

    /// Limit the number of unacknowledged manual-ack deliveries on this
    /// channel. Zero means unlimited.
    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError>;

    /// Publish a message. A message that routes to no queue is dropped.
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        mode: DeliveryMode,
    ) -> Result<(), BrokerError>;

    /// Register a consumer on a queue.
    async fn consume(&mut self, queue: &str, ack: AckMode) -> Result<ConsumerTag, BrokerError>;

    /// Wait for the next delivery to a consumer.
    ///
    /// Returns `Ok(None)` once the broker has ended the consumer (its queue
    /// was deleted or closed and drained). Must be cancel-safe: dropping the
    /// future before it completes loses no message.
    async fn next_delivery(&mut self, consumer: &ConsumerTag)
        -> Result<Option<Delivery>, BrokerError>;

    async fn cancel(&mut self, consumer: &ConsumerTag) -> Result<(), BrokerError>;

    /// Fetch one message without registering a consumer; `None` when empty.
    async fn get(&mut self, queue: &str, ack: AckMode) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Reject a delivery, optionally returning it to its queue.
    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;
}
