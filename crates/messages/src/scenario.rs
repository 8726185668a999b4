use montecarlo_types::Scenario;
use serde::{Deserialize, Serialize};

/// One work-queue entry: a sampled scenario, keys sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioMessage(pub Scenario);

impl ScenarioMessage {
    pub fn scenario(&self) -> &Scenario {
        &self.0
    }

    pub fn into_scenario(self) -> Scenario {
        self.0
    }
}

impl From<Scenario> for ScenarioMessage {
    fn from(scenario: Scenario) -> Self {
        Self(scenario)
    }
}
