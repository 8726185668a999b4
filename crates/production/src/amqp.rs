//! [`Channel`] over an AMQP 0-9-1 server, via `lapin`.
//!
//! The mapping is one to one: every trait method is the AMQP method of the
//! same meaning, and delivery tags are the server's channel-scoped tags.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
    BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions, QueuePurgeOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, Consumer};
use montecarlo_core::{
    AckMode, BrokerError, Channel, ConsumerTag, Delivery, DeliveryMode, DeliveryTag,
    ExchangeKind, QueueOptions,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Local server, default vhost.
pub const DEFAULT_AMQP_URI: &str = "amqp://127.0.0.1:5672/%2f";

/// AMQP `delivery-mode` property values.
const TRANSIENT: u8 = 1;
const PERSISTENT: u8 = 2;

fn broker_error(error: lapin::Error) -> BrokerError {
    match &error {
        lapin::Error::InvalidChannelState(_) => BrokerError::ChannelClosed,
        lapin::Error::InvalidConnectionState(_) | lapin::Error::IOError(_) => {
            BrokerError::Disconnected
        }
        lapin::Error::ProtocolError(amqp) => {
            let message = amqp.get_message().as_str().to_string();
            match amqp.kind() {
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                    BrokerError::PreconditionFailed(message)
                }
                AMQPErrorKind::Soft(AMQPSoftError::RESOURCELOCKED) => {
                    BrokerError::ResourceLocked(message)
                }
                AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) if message.contains("exchange") => {
                    BrokerError::UnknownExchange(message)
                }
                AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => BrokerError::UnknownQueue(message),
                _ => BrokerError::Transport(error.to_string()),
            }
        }
        _ => BrokerError::Transport(error.to_string()),
    }
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
    }
}

fn queue_declare_options(options: QueueOptions) -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: options.durable,
        exclusive: options.exclusive,
        auto_delete: options.auto_delete,
        ..QueueDeclareOptions::default()
    }
}

fn properties(mode: DeliveryMode) -> BasicProperties {
    let delivery_mode = match mode {
        DeliveryMode::Transient => TRANSIENT,
        DeliveryMode::Persistent => PERSISTENT,
    };
    BasicProperties::default().with_delivery_mode(delivery_mode)
}

/// Messages from foreign publishers may omit the property; AMQP treats that
/// as transient.
fn delivery_mode(properties: &BasicProperties) -> DeliveryMode {
    match *properties.delivery_mode() {
        Some(PERSISTENT) => DeliveryMode::Persistent,
        _ => DeliveryMode::Transient,
    }
}

fn no_ack(ack: AckMode) -> bool {
    ack == AckMode::Auto
}

fn delivery(message: lapin::message::Delivery) -> Delivery {
    Delivery {
        tag: DeliveryTag(message.delivery_tag),
        exchange: message.exchange.as_str().to_string(),
        routing_key: message.routing_key.as_str().to_string(),
        mode: delivery_mode(&message.properties),
        redelivered: message.redelivered,
        payload: message.data,
    }
}

/// Connection to an AMQP server. Open one [`AmqpChannel`] per runner.
pub struct AmqpBroker {
    connection: Connection,
}

impl AmqpBroker {
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(broker_error)?;
        info!("Connected to AMQP broker");
        Ok(Self { connection })
    }

    pub async fn channel(&self) -> Result<AmqpChannel, BrokerError> {
        let channel = self.connection.create_channel().await.map_err(broker_error)?;
        debug!(channel = channel.id(), "AMQP channel opened");
        Ok(AmqpChannel {
            channel,
            consumers: HashMap::new(),
        })
    }

    /// Close the connection and every channel on it.
    pub async fn close(self) -> Result<(), BrokerError> {
        self.connection
            .close(200, "OK")
            .await
            .map_err(broker_error)
    }
}

/// An AMQP channel and the consumers registered on it.
pub struct AmqpChannel {
    channel: lapin::Channel,
    consumers: HashMap<String, Consumer>,
}

impl AmqpChannel {
    pub async fn close(self) -> Result<(), BrokerError> {
        self.channel.close(200, "OK").await.map_err(broker_error)
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)
    }

    async fn declare_queue(
        &mut self,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, BrokerError> {
        let queue = self
            .channel
            .queue_declare(name, queue_declare_options(options), FieldTable::default())
            .await
            .map_err(broker_error)?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)
    }

    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn purge_queue(&mut self, queue: &str) -> Result<usize, BrokerError> {
        let purged = self
            .channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(broker_error)?;
        Ok(purged as usize)
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        mode: DeliveryMode,
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties(mode),
            )
            .await
            .map_err(broker_error)?
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    async fn consume(&mut self, queue: &str, ack: AckMode) -> Result<ConsumerTag, BrokerError> {
        // An empty tag lets the server generate one.
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: no_ack(ack),
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)?;
        let tag = consumer.tag().as_str().to_string();
        debug!(queue, consumer = %tag, "AMQP consumer registered");
        self.consumers.insert(tag.clone(), consumer);
        Ok(ConsumerTag(tag))
    }

    async fn next_delivery(
        &mut self,
        consumer: &ConsumerTag,
    ) -> Result<Option<Delivery>, BrokerError> {
        let stream = self
            .consumers
            .get_mut(&consumer.0)
            .ok_or_else(|| BrokerError::UnknownConsumer(consumer.0.clone()))?;
        match stream.next().await {
            Some(message) => Ok(Some(delivery(message.map_err(broker_error)?))),
            None => {
                self.consumers.remove(&consumer.0);
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self, consumer: &ConsumerTag) -> Result<(), BrokerError> {
        if self.consumers.remove(&consumer.0).is_none() {
            return Err(BrokerError::UnknownConsumer(consumer.0.clone()));
        }
        self.channel
            .basic_cancel(&consumer.0, BasicCancelOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn get(&mut self, queue: &str, ack: AckMode) -> Result<Option<Delivery>, BrokerError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: no_ack(ack) })
            .await
            .map_err(broker_error)?;
        Ok(message.map(|message| delivery(message.delivery)))
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag.0, BasicAckOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(tag.0, BasicRejectOptions { requeue })
            .await
            .map_err(broker_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::AMQPError;
    use lapin::{ChannelState, ConnectionState};

    fn protocol_error(kind: AMQPSoftError, message: &str) -> lapin::Error {
        lapin::Error::ProtocolError(AMQPError::new(AMQPErrorKind::Soft(kind), message.into()))
    }

    #[test]
    fn test_exchange_kinds() {
        assert!(matches!(
            exchange_kind(ExchangeKind::Fanout),
            lapin::ExchangeKind::Fanout
        ));
        assert!(matches!(
            exchange_kind(ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        ));
    }

    #[test]
    fn test_queue_options_carry_every_flag() {
        let durable = queue_declare_options(QueueOptions::durable());
        assert!(durable.durable && !durable.exclusive && !durable.auto_delete);
        assert!(!durable.passive && !durable.nowait);

        let private = queue_declare_options(QueueOptions::exclusive());
        assert!(!private.durable && private.exclusive && private.auto_delete);
    }

    #[test]
    fn test_delivery_mode_property() {
        assert_eq!(*properties(DeliveryMode::Persistent).delivery_mode(), Some(2));
        assert_eq!(*properties(DeliveryMode::Transient).delivery_mode(), Some(1));

        for mode in [DeliveryMode::Persistent, DeliveryMode::Transient] {
            assert_eq!(delivery_mode(&properties(mode)), mode);
        }
        assert_eq!(delivery_mode(&BasicProperties::default()), DeliveryMode::Transient);
    }

    #[test]
    fn test_ack_mode_maps_to_no_ack() {
        assert!(no_ack(AckMode::Auto));
        assert!(!no_ack(AckMode::Manual));
    }

    #[test]
    fn test_client_errors_map_to_broker_errors() {
        assert_eq!(
            broker_error(lapin::Error::InvalidChannelState(ChannelState::Closed)),
            BrokerError::ChannelClosed
        );
        assert_eq!(
            broker_error(lapin::Error::InvalidConnectionState(ConnectionState::Closed)),
            BrokerError::Disconnected
        );
        assert!(matches!(
            broker_error(protocol_error(
                AMQPSoftError::PRECONDITIONFAILED,
                "PRECONDITION_FAILED - inequivalent arg 'durable'"
            )),
            BrokerError::PreconditionFailed(_)
        ));
        assert!(matches!(
            broker_error(protocol_error(
                AMQPSoftError::RESOURCELOCKED,
                "RESOURCE_LOCKED - cannot obtain exclusive access"
            )),
            BrokerError::ResourceLocked(_)
        ));
        assert!(matches!(
            broker_error(protocol_error(
                AMQPSoftError::NOTFOUND,
                "NOT_FOUND - no queue 'Escenarios' in vhost '/'"
            )),
            BrokerError::UnknownQueue(_)
        ));
        assert!(matches!(
            broker_error(protocol_error(
                AMQPSoftError::NOTFOUND,
                "NOT_FOUND - no exchange 'Cofiguracion' in vhost '/'"
            )),
            BrokerError::UnknownExchange(_)
        ));
        assert!(matches!(
            broker_error(protocol_error(AMQPSoftError::ACCESSREFUSED, "ACCESS_REFUSED")),
            BrokerError::Transport(_)
        ));
    }
}
