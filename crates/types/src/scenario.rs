//! Sampled scenarios.

use montecarlo_formula::Environment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One concrete assignment of sampled values to model variables.
///
/// Keys are kept sorted, so two scenarios with the same assignments always
/// serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scenario(BTreeMap<String, f64>);

impl Scenario {
    pub fn new(values: BTreeMap<String, f64>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }
}

impl FromIterator<(String, f64)> for Scenario {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Environment for Scenario {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name)
    }
}
