use indexmap::IndexMap;
use montecarlo_types::BroadcastConfiguration;
use serde::{Deserialize, Serialize};

/// Formula and constants, broadcast once per run.
///
/// On the wire the constants sit next to `formula` in one flat object:
/// `{"formula": "x + y", "y": 2.0}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationMessage {
    #[serde(default)]
    pub formula: String,

    #[serde(flatten)]
    pub constants: IndexMap<String, f64>,
}

impl ConfigurationMessage {
    pub fn new(formula: impl Into<String>, constants: IndexMap<String, f64>) -> Self {
        Self {
            formula: formula.into(),
            constants,
        }
    }
}

impl From<BroadcastConfiguration<'_>> for ConfigurationMessage {
    fn from(broadcast: BroadcastConfiguration<'_>) -> Self {
        Self::new(broadcast.formula, broadcast.constants.clone())
    }
}
