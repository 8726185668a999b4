use crate::DeliveryMode;
use std::fmt;

/// Channel-scoped identifier of one delivery, used to ack or reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a consumer registered on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub mode: DeliveryMode,
    /// Set when the message was delivered before and never acknowledged.
    pub redelivered: bool,
}
