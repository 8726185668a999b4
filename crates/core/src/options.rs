use serde::{Deserialize, Serialize};

/// Name of the default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Exchange routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Copy every message to every bound queue, ignoring routing keys.
    Fanout,
    /// Route to queues bound with a key equal to the routing key.
    Direct,
}

/// Whether a message survives a broker restart (in a durable queue).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

/// How a consumer acknowledges deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// The broker forgets a message as soon as it is delivered.
    Auto,
    /// Each delivery must be acked or rejected explicitly.
    Manual,
}

/// Queue declaration flags.
///
/// An empty name in [`Channel::declare_queue`](crate::Channel::declare_queue)
/// asks the broker to generate one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue (and its persistent messages) survives a broker restart.
    pub durable: bool,
    /// Only the declaring channel may use the queue; deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer is cancelled.
    pub auto_delete: bool,
}

impl QueueOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Self::default()
        }
    }

    /// Private, server-lifetime-bound subscription queue.
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            auto_delete: true,
            ..Self::default()
        }
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_option_presets() {
        assert!(QueueOptions::durable().durable);
        assert!(!QueueOptions::durable().exclusive);

        let private = QueueOptions::exclusive();
        assert!(private.exclusive && private.auto_delete && !private.durable);

        let custom = QueueOptions::default().with_durable(true).with_auto_delete(true);
        assert!(custom.durable && custom.auto_delete && !custom.exclusive);
    }
}
