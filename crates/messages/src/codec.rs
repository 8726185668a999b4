//! JSON encoding and decoding of wire messages.
//!
//! # Wire Format
//!
//! Every message is a single JSON object, UTF-8 encoded:
//!
//! ```text
//! configuration  {"formula": "<expr>", "<constant>": <number>, ...}
//! scenario       {"<variable>": <number>, ...}     keys sorted
//! result         {"resultado": <number>}
//! ```
//!
//! The message type is implied by the exchange or queue it travels on, not by
//! a field in the payload.

use crate::{ConfigurationMessage, ResultMessage, ScenarioMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Empty {kind} payload")]
    Empty { kind: &'static str },

    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A message type with a JSON wire form.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Human-readable type name, for errors and logs.
    const KIND: &'static str;
}

impl WireMessage for ConfigurationMessage {
    const KIND: &'static str = "configuration";
}

impl WireMessage for ScenarioMessage {
    const KIND: &'static str = "scenario";
}

impl WireMessage for ResultMessage {
    const KIND: &'static str = "result";
}

/// Encode a message to wire format.
pub fn encode_message<M: WireMessage>(message: &M) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(|source| CodecError::Encode {
        kind: M::KIND,
        source,
    })
}

/// Decode a message from wire format.
pub fn decode_message<M: WireMessage>(data: &[u8]) -> Result<M, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty { kind: M::KIND });
    }
    serde_json::from_slice(data).map_err(|source| CodecError::Decode {
        kind: M::KIND,
        source,
    })
}
