//! Broker object names.
//!
//! The defaults match the names used by deployed producers and consumers, so
//! they must not change without coordinating both sides.

use serde::{Deserialize, Serialize};

/// Fanout exchange carrying the model configuration.
pub const CONFIGURATION_EXCHANGE: &str = "Cofiguracion";

/// Durable work queue carrying scenarios.
pub const SCENARIO_QUEUE: &str = "Escenarios";

/// Queue carrying evaluation results.
pub const RESULT_QUEUE: &str = "Resultados";

/// Names of the exchange and queues one run uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub configuration_exchange: String,
    pub scenario_queue: String,
    pub result_queue: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            configuration_exchange: CONFIGURATION_EXCHANGE.to_string(),
            scenario_queue: SCENARIO_QUEUE.to_string(),
            result_queue: RESULT_QUEUE.to_string(),
        }
    }
}

impl Topology {
    /// Prefix every name, so several runs can share one broker.
    pub fn namespaced(prefix: &str) -> Self {
        Self {
            configuration_exchange: format!("{prefix}.{CONFIGURATION_EXCHANGE}"),
            scenario_queue: format!("{prefix}.{SCENARIO_QUEUE}"),
            result_queue: format!("{prefix}.{RESULT_QUEUE}"),
        }
    }
}
