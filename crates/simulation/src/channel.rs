use crate::broker::Shared;
use crate::state::{BrokerState, ChannelId, Poll};
use async_trait::async_trait;
use montecarlo_core::{
    AckMode, BrokerError, Channel, ConsumerTag, Delivery, DeliveryMode, DeliveryTag, ExchangeKind,
    QueueOptions,
};
use std::sync::Arc;

/// A channel on an [`InMemoryBroker`](crate::InMemoryBroker).
///
/// Dropping it closes the channel. After a broker restart every operation
/// fails with [`BrokerError::Disconnected`].
pub struct InMemoryChannel {
    id: ChannelId,
    epoch: u64,
    shared: Arc<Shared>,
}

impl InMemoryChannel {
    pub(crate) fn new(id: ChannelId, epoch: u64, shared: Arc<Shared>) -> Self {
        Self { id, epoch, shared }
    }

    /// Deliveries on this channel awaiting ack or reject.
    pub fn unacked(&self) -> usize {
        self.shared.state.lock().unacked_on(self.id)
    }

    /// Run `op` against the broker state if this channel is still connected.
    fn with_state<T>(
        &self,
        notify: bool,
        op: impl FnOnce(&mut BrokerState) -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        let result = {
            let mut state = self.shared.state.lock();
            if state.epoch != self.epoch {
                return Err(BrokerError::Disconnected);
            }
            op(&mut state)
        };
        if notify && result.is_ok() {
            self.shared.notify();
        }
        result
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.epoch != self.epoch {
                return;
            }
            state.close_channel(self.id);
        }
        self.shared.notify();
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.with_state(false, |state| state.declare_exchange(name, kind, durable))
    }

    async fn declare_queue(
        &mut self,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, BrokerError> {
        self.with_state(false, |state| state.declare_queue(self.id, name, options))
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.with_state(false, |state| state.bind(self.id, queue, exchange, routing_key))
    }

    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.with_state(true, |state| state.delete_queue(self.id, queue))
    }

    async fn purge_queue(&mut self, queue: &str) -> Result<usize, BrokerError> {
        self.with_state(false, |state| state.purge(self.id, queue))
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.with_state(false, |state| state.set_prefetch(self.id, count))
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        mode: DeliveryMode,
    ) -> Result<(), BrokerError> {
        self.with_state(true, |state| {
            state
                .publish(self.id, exchange, routing_key, payload, mode)
                .map(|_| ())
        })
    }

    async fn consume(&mut self, queue: &str, ack: AckMode) -> Result<ConsumerTag, BrokerError> {
        self.with_state(false, |state| state.consume(self.id, queue, ack))
    }

    async fn next_delivery(
        &mut self,
        consumer: &ConsumerTag,
    ) -> Result<Option<Delivery>, BrokerError> {
        loop {
            // Register interest before checking, so a notification between
            // the check and the await is not lost.
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.with_state(false, |state| state.poll_consumer(self.id, consumer))? {
                Poll::Ready(delivery) => return Ok(Some(delivery)),
                Poll::Ended => return Ok(None),
                Poll::Empty => changed.await,
            }
        }
    }

    async fn cancel(&mut self, consumer: &ConsumerTag) -> Result<(), BrokerError> {
        self.with_state(true, |state| state.cancel(self.id, consumer))
    }

    async fn get(&mut self, queue: &str, ack: AckMode) -> Result<Option<Delivery>, BrokerError> {
        self.with_state(false, |state| state.get(self.id, queue, ack))
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.with_state(true, |state| state.ack(self.id, tag))
    }

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.with_state(true, |state| state.reject(self.id, tag, requeue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBroker;
    use std::time::Duration;
    use tracing_test::traced_test;

    const WORK: &str = "work";

    async fn work_queue(broker: &InMemoryBroker) -> InMemoryChannel {
        let mut channel = broker.channel();
        channel
            .declare_queue(WORK, QueueOptions::durable())
            .await
            .unwrap();
        channel
    }

    async fn publish_n(channel: &mut InMemoryChannel, n: usize, mode: DeliveryMode) {
        for i in 0..n {
            channel
                .publish("", WORK, format!("m{i}").into_bytes(), mode)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_default_exchange_routes_by_queue_name() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        publish_n(&mut channel, 2, DeliveryMode::Persistent).await;
        // Unroutable messages are dropped silently.
        channel
            .publish("", "nowhere", b"x".to_vec(), DeliveryMode::Transient)
            .await
            .unwrap();

        assert_eq!(broker.queue_len(WORK), Some(2));
        let first = channel.get(WORK, AckMode::Auto).await.unwrap().unwrap();
        assert_eq!(first.payload, b"m0");
        assert_eq!(first.mode, DeliveryMode::Persistent);
        assert!(!first.redelivered);
    }

    #[tokio::test]
    async fn test_fanout_copies_to_every_bound_queue() {
        let broker = InMemoryBroker::new();
        let mut producer = broker.channel();
        producer
            .declare_exchange("config", ExchangeKind::Fanout, false)
            .await
            .unwrap();

        let mut subscribers = Vec::new();
        for _ in 0..3 {
            let mut channel = broker.channel();
            let queue = channel
                .declare_queue("", QueueOptions::exclusive())
                .await
                .unwrap();
            assert!(queue.starts_with("amq.gen-"));
            channel.bind_queue(&queue, "config", "").await.unwrap();
            subscribers.push((channel, queue));
        }
        assert_eq!(broker.binding_count("config"), Some(3));

        producer
            .publish("config", "ignored", b"cfg".to_vec(), DeliveryMode::Persistent)
            .await
            .unwrap();

        for (channel, queue) in &mut subscribers {
            let consumer = channel.consume(queue, AckMode::Auto).await.unwrap();
            let delivery = channel.next_delivery(&consumer).await.unwrap().unwrap();
            assert_eq!(delivery.payload, b"cfg");
            assert_eq!(delivery.exchange, "config");
        }
    }

    #[tokio::test]
    async fn test_direct_exchange_matches_routing_key() {
        let broker = InMemoryBroker::new();
        let mut channel = broker.channel();
        channel
            .declare_exchange("direct", ExchangeKind::Direct, true)
            .await
            .unwrap();
        for name in ["a", "b"] {
            channel.declare_queue(name, QueueOptions::default()).await.unwrap();
            channel.bind_queue(name, "direct", name).await.unwrap();
        }

        channel
            .publish("direct", "b", b"1".to_vec(), DeliveryMode::Transient)
            .await
            .unwrap();
        assert_eq!(broker.queue_len("a"), Some(0));
        assert_eq!(broker.queue_len("b"), Some(1));
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let broker = InMemoryBroker::new();
        let mut channel = broker.channel();
        let err = channel
            .publish("missing", "", b"x".to_vec(), DeliveryMode::Transient)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::UnknownExchange("missing".to_string()));
    }

    #[tokio::test]
    async fn test_redeclare_with_different_options_fails() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        assert_eq!(
            channel.declare_queue(WORK, QueueOptions::durable()).await.unwrap(),
            WORK
        );
        assert!(matches!(
            channel.declare_queue(WORK, QueueOptions::default()).await,
            Err(BrokerError::PreconditionFailed(_))
        ));

        channel
            .declare_exchange("x", ExchangeKind::Fanout, false)
            .await
            .unwrap();
        assert!(matches!(
            channel.declare_exchange("x", ExchangeKind::Direct, false).await,
            Err(BrokerError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_exclusive_queue_is_locked_to_owner() {
        let broker = InMemoryBroker::new();
        let mut owner = broker.channel();
        let queue = owner
            .declare_queue("", QueueOptions::exclusive())
            .await
            .unwrap();

        let mut other = broker.channel();
        assert_eq!(
            other.consume(&queue, AckMode::Auto).await.unwrap_err(),
            BrokerError::ResourceLocked(queue.clone())
        );

        drop(owner);
        assert!(!broker.queue_exists(&queue));
    }

    #[tokio::test]
    async fn test_prefetch_limits_unacked_deliveries() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        publish_n(&mut channel, 3, DeliveryMode::Persistent).await;

        channel.set_prefetch(1).await.unwrap();
        let consumer = channel.consume(WORK, AckMode::Manual).await.unwrap();

        let first = channel.next_delivery(&consumer).await.unwrap().unwrap();
        assert_eq!(channel.unacked(), 1);
        assert_eq!(
            channel.next_delivery(&consumer).await.unwrap_err(),
            BrokerError::PrefetchExceeded { limit: 1 }
        );

        channel.ack(first.tag).await.unwrap();
        let second = channel.next_delivery(&consumer).await.unwrap().unwrap();
        assert_eq!(second.payload, b"m1");
        assert_eq!(broker.unacked_len(WORK), Some(1));
    }

    #[tokio::test]
    async fn test_ack_and_reject_bookkeeping() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        publish_n(&mut channel, 2, DeliveryMode::Persistent).await;

        let a = channel.get(WORK, AckMode::Manual).await.unwrap().unwrap();
        let b = channel.get(WORK, AckMode::Manual).await.unwrap().unwrap();

        channel.ack(a.tag).await.unwrap();
        assert_eq!(
            channel.ack(a.tag).await.unwrap_err(),
            BrokerError::UnknownDeliveryTag(a.tag.0)
        );

        // Reject without requeue discards; with requeue returns to the front.
        channel.reject(b.tag, true).await.unwrap();
        let again = channel.get(WORK, AckMode::Manual).await.unwrap().unwrap();
        assert_eq!(again.payload, b"m1");
        assert!(again.redelivered);
        channel.reject(again.tag, false).await.unwrap();

        assert_eq!(broker.queue_len(WORK), Some(0));
        assert_eq!(broker.unacked_len(WORK), Some(0));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_dropped_channel_requeues_unacked() {
        let broker = InMemoryBroker::new();
        let mut producer = work_queue(&broker).await;
        publish_n(&mut producer, 3, DeliveryMode::Persistent).await;

        let mut crashed = broker.channel();
        let consumer = crashed.consume(WORK, AckMode::Manual).await.unwrap();
        let held = crashed.next_delivery(&consumer).await.unwrap().unwrap();
        assert_eq!(held.payload, b"m0");
        assert_eq!(broker.consumer_count(WORK), Some(1));
        drop(crashed);

        assert_eq!(broker.queue_len(WORK), Some(3));
        assert_eq!(broker.consumer_count(WORK), Some(0));

        let mut survivor = broker.channel();
        let consumer = survivor.consume(WORK, AckMode::Manual).await.unwrap();
        let redelivered = survivor.next_delivery(&consumer).await.unwrap().unwrap();
        assert_eq!(redelivered.payload, b"m0");
        assert!(redelivered.redelivered);
        assert!(logs_contain("Channel closed"));
    }

    #[tokio::test]
    async fn test_next_delivery_waits_for_publish() {
        let broker = InMemoryBroker::new();
        let mut consumer_channel = work_queue(&broker).await;
        let consumer = consumer_channel.consume(WORK, AckMode::Auto).await.unwrap();

        let waiter = tokio::spawn(async move {
            consumer_channel
                .next_delivery(&consumer)
                .await
                .map(|d| d.map(|d| d.payload))
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut producer = broker.channel();
        producer
            .publish("", WORK, b"late".to_vec(), DeliveryMode::Transient)
            .await
            .unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), Some(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_closed_queue_ends_consumers_once_drained() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        publish_n(&mut channel, 1, DeliveryMode::Persistent).await;
        assert!(broker.close_queue(WORK));
        assert!(!broker.close_queue("missing"));

        let consumer = channel.consume(WORK, AckMode::Manual).await.unwrap();
        let delivery = channel.next_delivery(&consumer).await.unwrap().unwrap();

        // Still outstanding: a crash would requeue it, so the consumer keeps
        // waiting rather than ending.
        let waiting = tokio::time::timeout(
            Duration::from_millis(20),
            channel.next_delivery(&consumer),
        )
        .await;
        assert!(waiting.is_err());

        channel.ack(delivery.tag).await.unwrap();
        assert!(channel.next_delivery(&consumer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_queue_ends_consumer() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        let consumer = channel.consume(WORK, AckMode::Auto).await.unwrap();

        let mut admin = broker.channel();
        admin.delete_queue(WORK).await.unwrap();
        // Idempotent.
        admin.delete_queue(WORK).await.unwrap();

        assert!(channel.next_delivery(&consumer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_deletes_auto_delete_queue() {
        let broker = InMemoryBroker::new();
        let mut channel = broker.channel();
        let queue = channel
            .declare_queue("", QueueOptions::exclusive())
            .await
            .unwrap();
        let consumer = channel.consume(&queue, AckMode::Auto).await.unwrap();

        channel.cancel(&consumer).await.unwrap();
        assert!(!broker.queue_exists(&queue));
        assert!(matches!(
            channel.cancel(&consumer).await,
            Err(BrokerError::UnknownConsumer(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_drops_ready_messages() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        publish_n(&mut channel, 4, DeliveryMode::Persistent).await;
        assert_eq!(channel.purge_queue(WORK).await.unwrap(), 4);
        assert_eq!(broker.queue_len(WORK), Some(0));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_restart_keeps_only_persistent_messages_in_durable_queues() {
        let broker = InMemoryBroker::new();
        let mut channel = broker.channel();
        channel
            .declare_exchange("config", ExchangeKind::Fanout, false)
            .await
            .unwrap();
        channel
            .declare_queue(WORK, QueueOptions::durable())
            .await
            .unwrap();
        channel
            .declare_queue("results", QueueOptions::default())
            .await
            .unwrap();

        channel
            .publish("", WORK, b"keep".to_vec(), DeliveryMode::Persistent)
            .await
            .unwrap();
        channel
            .publish("", WORK, b"lose".to_vec(), DeliveryMode::Transient)
            .await
            .unwrap();
        channel
            .publish("", WORK, b"held".to_vec(), DeliveryMode::Persistent)
            .await
            .unwrap();
        channel
            .publish("", "results", b"r".to_vec(), DeliveryMode::Persistent)
            .await
            .unwrap();

        // Take "keep" and hold it unacked across the restart.
        let held = channel.get(WORK, AckMode::Manual).await.unwrap().unwrap();
        assert_eq!(held.payload, b"keep");

        broker.restart();

        assert_eq!(
            channel.ack(held.tag).await.unwrap_err(),
            BrokerError::Disconnected
        );
        assert!(!broker.exchange_exists("config"));
        assert!(!broker.queue_exists("results"));
        assert_eq!(broker.queue_len(WORK), Some(2));

        let mut fresh = broker.channel();
        let first = fresh.get(WORK, AckMode::Auto).await.unwrap().unwrap();
        assert_eq!(first.payload, b"keep");
        assert!(first.redelivered);
        let second = fresh.get(WORK, AckMode::Auto).await.unwrap().unwrap();
        assert_eq!(second.payload, b"held");
        assert!(logs_contain("Broker restarted"));
    }

    #[tokio::test]
    async fn test_restart_wakes_waiting_consumer_with_disconnect() {
        let broker = InMemoryBroker::new();
        let mut channel = work_queue(&broker).await;
        let consumer = channel.consume(WORK, AckMode::Manual).await.unwrap();

        let waiter = tokio::spawn(async move { channel.next_delivery(&consumer).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.restart();

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            BrokerError::Disconnected
        );
    }
}
