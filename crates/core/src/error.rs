use thiserror::Error;

/// Broker failures. None of these are retried; callers treat them as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Broker connection lost")]
    Disconnected,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown consumer: {0}")]
    UnknownConsumer(String),

    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("Queue {0} is exclusive to another channel")]
    ResourceLocked(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Prefetch limit of {limit} unacknowledged deliveries reached")]
    PrefetchExceeded { limit: u16 },

    /// A broker client failure with no closer match above.
    #[error("Broker transport error: {0}")]
    Transport(String),
}
