//! Wire messages exchanged between the distributor, workers and result
//! consumers, plus the broker topology they travel over.

pub mod codec;
mod configuration;
mod result;
mod scenario;
pub mod topology;

pub use codec::{decode_message, encode_message, CodecError, WireMessage};
pub use configuration::ConfigurationMessage;
pub use result::ResultMessage;
pub use scenario::ScenarioMessage;
pub use topology::Topology;
