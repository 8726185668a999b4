//! Broker abstraction shared by producers and consumers.
//!
//! The broker is an external collaborator with AMQP-like semantics. Code that
//! talks to it depends only on the [`Channel`] trait; the in-process broker in
//! `montecarlo-simulation` is one implementation.

mod channel;
mod delivery;
mod error;
mod options;

pub use channel::Channel;
pub use delivery::{ConsumerTag, Delivery, DeliveryTag};
pub use error::BrokerError;
pub use options::{AckMode, DeliveryMode, ExchangeKind, QueueOptions, DEFAULT_EXCHANGE};
