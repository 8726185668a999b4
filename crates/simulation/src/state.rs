//! Broker state and its AMQP-like semantics.
//!
//! Everything here is synchronous and runs under the broker mutex; the async
//! channel layer only adds waiting.

use montecarlo_core::{
    AckMode, BrokerError, ConsumerTag, Delivery, DeliveryMode, DeliveryTag, ExchangeKind,
    QueueOptions, DEFAULT_EXCHANGE,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, trace};

pub(crate) type ChannelId = u64;

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    mode: DeliveryMode,
    redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<Binding>,
}

#[derive(Debug)]
struct Queue {
    options: QueueOptions,
    owner: Option<ChannelId>,
    ready: VecDeque<Message>,
    consumers: usize,
    /// Manual-ack deliveries not yet acked or rejected, across all channels.
    outstanding: usize,
    closed: bool,
}

#[derive(Debug)]
struct Consumer {
    queue: String,
    ack: AckMode,
}

#[derive(Debug)]
struct Pending {
    queue: String,
    message: Message,
}

#[derive(Debug, Default)]
struct ChannelState {
    prefetch: u16,
    next_tag: u64,
    next_consumer: u64,
    consumers: HashMap<String, Consumer>,
    unacked: BTreeMap<u64, Pending>,
}

/// Outcome of polling a consumer.
#[derive(Debug)]
pub(crate) enum Poll {
    Ready(Delivery),
    /// The consumer's queue is gone, or closed and drained.
    Ended,
    Empty,
}

#[derive(Debug, Default)]
pub(crate) struct BrokerState {
    /// Bumped on every restart; channels from an older epoch are disconnected.
    pub(crate) epoch: u64,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    channels: HashMap<ChannelId, ChannelState>,
    next_channel: ChannelId,
    next_queue: u64,
}

fn queue_for<'a>(
    queues: &'a mut HashMap<String, Queue>,
    channel: ChannelId,
    name: &str,
) -> Result<&'a mut Queue, BrokerError> {
    let queue = queues
        .get_mut(name)
        .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))?;
    match queue.owner {
        Some(owner) if owner != channel => Err(BrokerError::ResourceLocked(name.to_string())),
        _ => Ok(queue),
    }
}

fn deliver(
    channel: &mut ChannelState,
    queue_name: &str,
    queue: &mut Queue,
    message: Message,
    ack: AckMode,
) -> Delivery {
    channel.next_tag += 1;
    let tag = DeliveryTag(channel.next_tag);
    let delivery = Delivery {
        tag,
        exchange: message.exchange.clone(),
        routing_key: message.routing_key.clone(),
        payload: message.payload.clone(),
        mode: message.mode,
        redelivered: message.redelivered,
    };
    if ack == AckMode::Manual {
        queue.outstanding += 1;
        channel.unacked.insert(
            tag.0,
            Pending {
                queue: queue_name.to_string(),
                message,
            },
        );
    }
    delivery
}

impl BrokerState {
    fn channel_mut(&mut self, id: ChannelId) -> Result<&mut ChannelState, BrokerError> {
        self.channels.get_mut(&id).ok_or(BrokerError::ChannelClosed)
    }

    fn remove_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_some() {
            for exchange in self.exchanges.values_mut() {
                exchange.bindings.retain(|binding| binding.queue != name);
            }
            debug!(queue = name, "Queue deleted");
        }
    }

    /// Return a pending delivery to the front of its queue.
    fn requeue(&mut self, pending: Pending) {
        if let Some(queue) = self.queues.get_mut(&pending.queue) {
            queue.outstanding = queue.outstanding.saturating_sub(1);
            let mut message = pending.message;
            message.redelivered = true;
            queue.ready.push_front(message);
        }
    }

    fn settle(&mut self, pending: &Pending) {
        if let Some(queue) = self.queues.get_mut(&pending.queue) {
            queue.outstanding = queue.outstanding.saturating_sub(1);
        }
    }

    fn release_consumer(&mut self, consumer: Consumer) {
        let delete = match self.queues.get_mut(&consumer.queue) {
            Some(queue) => {
                queue.consumers = queue.consumers.saturating_sub(1);
                queue.options.auto_delete && queue.consumers == 0
            }
            None => false,
        };
        if delete {
            self.remove_queue(&consumer.queue);
        }
    }

    pub(crate) fn open_channel(&mut self) -> ChannelId {
        self.next_channel += 1;
        let id = self.next_channel;
        self.channels.insert(id, ChannelState::default());
        debug!(channel = id, "Channel opened");
        id
    }

    /// Close a channel: requeue its unacked deliveries, end its consumers and
    /// delete its exclusive queues.
    pub(crate) fn close_channel(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.remove(&id) else {
            return;
        };

        let requeued = channel.unacked.len();
        // Reverse tag order so the oldest delivery ends up first.
        for (_, pending) in channel.unacked.into_iter().rev() {
            self.requeue(pending);
        }
        for (_, consumer) in channel.consumers {
            self.release_consumer(consumer);
        }

        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == Some(id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.remove_queue(&name);
        }

        debug!(channel = id, requeued, "Channel closed");
    }

    pub(crate) fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be redeclared".to_string(),
            ));
        }
        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind || existing.durable != durable => {
                Err(BrokerError::PreconditionFailed(format!(
                    "exchange {name} already declared with different options"
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        durable,
                        bindings: Vec::new(),
                    },
                );
                debug!(exchange = name, ?kind, durable, "Exchange declared");
                Ok(())
            }
        }
    }

    pub(crate) fn declare_queue(
        &mut self,
        channel: ChannelId,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, BrokerError> {
        self.channel_mut(channel)?;

        let name = if name.is_empty() {
            self.next_queue += 1;
            format!("amq.gen-{}", self.next_queue)
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if matches!(existing.owner, Some(owner) if owner != channel) {
                return Err(BrokerError::ResourceLocked(name));
            }
            if existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue {name} already declared with different options"
                )));
            }
            return Ok(name);
        }

        self.queues.insert(
            name.clone(),
            Queue {
                options,
                owner: options.exclusive.then_some(channel),
                ready: VecDeque::new(),
                consumers: 0,
                outstanding: 0,
                closed: false,
            },
        );
        debug!(queue = %name, ?options, "Queue declared");
        Ok(name)
    }

    pub(crate) fn bind(
        &mut self,
        channel: ChannelId,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel_mut(channel)?;
        queue_for(&mut self.queues, channel, queue)?;
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "queues cannot be bound to the default exchange".to_string(),
            ));
        }
        let target = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

        let binding = Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !target.bindings.contains(&binding) {
            target.bindings.push(binding);
            debug!(queue, exchange, routing_key, "Queue bound");
        }
        Ok(())
    }

    /// Idempotent: deleting a missing queue succeeds.
    pub(crate) fn delete_queue(&mut self, channel: ChannelId, queue: &str) -> Result<(), BrokerError> {
        self.channel_mut(channel)?;
        match queue_for(&mut self.queues, channel, queue).map(|_| ()) {
            Ok(()) => {
                self.remove_queue(queue);
                Ok(())
            }
            Err(BrokerError::UnknownQueue(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn purge(&mut self, channel: ChannelId, queue: &str) -> Result<usize, BrokerError> {
        self.channel_mut(channel)?;
        let queue_state = queue_for(&mut self.queues, channel, queue)?;
        let purged = queue_state.ready.len();
        queue_state.ready.clear();
        debug!(queue, purged, "Queue purged");
        Ok(purged)
    }

    pub(crate) fn set_prefetch(&mut self, channel: ChannelId, count: u16) -> Result<(), BrokerError> {
        self.channel_mut(channel)?.prefetch = count;
        Ok(())
    }

    /// Route a message; returns the number of queues it reached.
    pub(crate) fn publish(
        &mut self,
        channel: ChannelId,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        mode: DeliveryMode,
    ) -> Result<usize, BrokerError> {
        self.channel_mut(channel)?;

        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            let target = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
            let mut queues: Vec<String> = target
                .bindings
                .iter()
                .filter(|binding| match target.kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Direct => binding.routing_key == routing_key,
                })
                .map(|binding| binding.queue.clone())
                .collect();
            queues.sort();
            queues.dedup();
            queues
        };

        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            mode,
            redelivered: false,
        };
        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message.clone());
            }
        }

        if targets.is_empty() {
            trace!(exchange, routing_key, "Message unroutable; dropped");
        } else {
            trace!(exchange, routing_key, queues = targets.len(), "Message routed");
        }
        Ok(targets.len())
    }

    pub(crate) fn consume(
        &mut self,
        channel: ChannelId,
        queue: &str,
        ack: AckMode,
    ) -> Result<ConsumerTag, BrokerError> {
        let queue_state = queue_for(&mut self.queues, channel, queue)?;
        let state = self.channels.get_mut(&channel).ok_or(BrokerError::ChannelClosed)?;

        queue_state.consumers += 1;
        state.next_consumer += 1;
        let tag = format!("ctag-{channel}.{}", state.next_consumer);
        state.consumers.insert(
            tag.clone(),
            Consumer {
                queue: queue.to_string(),
                ack,
            },
        );
        debug!(queue, consumer = %tag, ?ack, "Consumer registered");
        Ok(ConsumerTag(tag))
    }

    pub(crate) fn poll_consumer(
        &mut self,
        channel: ChannelId,
        consumer: &ConsumerTag,
    ) -> Result<Poll, BrokerError> {
        let state = self.channels.get_mut(&channel).ok_or(BrokerError::ChannelClosed)?;
        let (queue_name, ack) = match state.consumers.get(&consumer.0) {
            Some(c) => (c.queue.clone(), c.ack),
            None => return Err(BrokerError::UnknownConsumer(consumer.0.clone())),
        };

        let Some(queue) = self.queues.get_mut(&queue_name) else {
            state.consumers.remove(&consumer.0);
            return Ok(Poll::Ended);
        };

        if ack == AckMode::Manual
            && state.prefetch > 0
            && state.unacked.len() >= usize::from(state.prefetch)
        {
            return Err(BrokerError::PrefetchExceeded {
                limit: state.prefetch,
            });
        }

        match queue.ready.pop_front() {
            Some(message) => Ok(Poll::Ready(deliver(state, &queue_name, queue, message, ack))),
            None if queue.closed && queue.outstanding == 0 => Ok(Poll::Ended),
            None => Ok(Poll::Empty),
        }
    }

    pub(crate) fn cancel(&mut self, channel: ChannelId, consumer: &ConsumerTag) -> Result<(), BrokerError> {
        let removed = self
            .channel_mut(channel)?
            .consumers
            .remove(&consumer.0)
            .ok_or_else(|| BrokerError::UnknownConsumer(consumer.0.clone()))?;
        debug!(consumer = %consumer, queue = %removed.queue, "Consumer cancelled");
        self.release_consumer(removed);
        Ok(())
    }

    pub(crate) fn get(
        &mut self,
        channel: ChannelId,
        queue: &str,
        ack: AckMode,
    ) -> Result<Option<Delivery>, BrokerError> {
        let queue_state = queue_for(&mut self.queues, channel, queue)?;
        let state = self.channels.get_mut(&channel).ok_or(BrokerError::ChannelClosed)?;
        Ok(queue_state
            .ready
            .pop_front()
            .map(|message| deliver(state, queue, queue_state, message, ack)))
    }

    pub(crate) fn ack(&mut self, channel: ChannelId, tag: DeliveryTag) -> Result<(), BrokerError> {
        let pending = self
            .channel_mut(channel)?
            .unacked
            .remove(&tag.0)
            .ok_or(BrokerError::UnknownDeliveryTag(tag.0))?;
        self.settle(&pending);
        Ok(())
    }

    pub(crate) fn reject(
        &mut self,
        channel: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let pending = self
            .channel_mut(channel)?
            .unacked
            .remove(&tag.0)
            .ok_or(BrokerError::UnknownDeliveryTag(tag.0))?;
        if requeue {
            self.requeue(pending);
        } else {
            self.settle(&pending);
        }
        Ok(())
    }

    pub(crate) fn close_queue(&mut self, name: &str) -> bool {
        match self.queues.get_mut(name) {
            Some(queue) => {
                queue.closed = true;
                debug!(queue = name, "Queue closed");
                true
            }
            None => false,
        }
    }

    /// Simulate a broker restart. Unacked deliveries return to their queues
    /// first; then only durable exchanges, durable queues and the persistent
    /// messages inside them survive.
    pub(crate) fn restart(&mut self) {
        let channels: Vec<ChannelId> = self.channels.keys().copied().collect();
        for id in channels {
            if let Some(channel) = self.channels.remove(&id) {
                for (_, pending) in channel.unacked.into_iter().rev() {
                    self.requeue(pending);
                }
            }
        }

        self.queues.retain(|_, queue| queue.options.durable && !queue.options.exclusive);
        let mut dropped = 0;
        for queue in self.queues.values_mut() {
            let before = queue.ready.len();
            queue.ready.retain(|message| message.mode == DeliveryMode::Persistent);
            dropped += before - queue.ready.len();
            queue.consumers = 0;
            queue.outstanding = 0;
            queue.owner = None;
        }

        self.exchanges.retain(|_, exchange| exchange.durable);
        let queues = &self.queues;
        for exchange in self.exchanges.values_mut() {
            exchange
                .bindings
                .retain(|binding| queues.contains_key(&binding.queue));
        }

        self.epoch += 1;
        debug!(
            epoch = self.epoch,
            queues = self.queues.len(),
            dropped,
            "Broker restarted"
        );
    }

    pub(crate) fn queue_len(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|queue| queue.ready.len())
    }

    pub(crate) fn outstanding(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|queue| queue.outstanding)
    }

    pub(crate) fn consumer_count(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|queue| queue.consumers)
    }

    pub(crate) fn binding_count(&self, exchange: &str) -> Option<usize> {
        self.exchanges.get(exchange).map(|e| e.bindings.len())
    }

    pub(crate) fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    pub(crate) fn unacked_on(&self, channel: ChannelId) -> usize {
        self.channels
            .get(&channel)
            .map(|state| state.unacked.len())
            .unwrap_or(0)
    }
}
