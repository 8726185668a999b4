//! In-process message broker.
//!
//! [`InMemoryBroker`] implements the broker primitives the producer and
//! consumers rely on, with AMQP-like semantics:
//!
//! - fanout and direct exchanges, plus the default exchange routing by queue
//!   name
//! - durable, exclusive and auto-delete queues, with generated names for
//!   anonymous declarations
//! - per-channel prefetch, manual ack and reject with optional requeue
//! - unacknowledged deliveries return to their queue, flagged as
//!   redelivered, when a channel is dropped
//! - [`InMemoryBroker::restart`] keeps only durable queues and the persistent
//!   messages inside them
//!
//! ```text
//!   producer ──publish──▶ exchange ──bindings──▶ queue ──▶ consumer
//!                                                  ▲           │
//!                                                  └─requeue───┘ (drop / reject)
//! ```

mod broker;
mod channel;
mod state;

pub use broker::InMemoryBroker;
pub use channel::InMemoryChannel;
