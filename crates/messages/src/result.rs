use serde::{Deserialize, Serialize};

/// Outcome of evaluating one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(rename = "resultado")]
    pub value: f64,
}

impl ResultMessage {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}
