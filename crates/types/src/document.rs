//! Model definition document (JSON).
//!
//! # Format
//!
//! ```json
//! {
//!   "formula": "precio * cantidad - costo",
//!   "iteraciones": 10000,
//!   "num_variables": 2,
//!   "constantes": { "costo": 50 },
//!   "variables": {
//!     "cantidad": {
//!       "tipo": "discreta",
//!       "parametros": { "valores": [1, 2, 3], "probabilidades": [0.2, 0.5, 0.3] }
//!     },
//!     "precio": {
//!       "tipo": "continua",
//!       "parametros": {
//!         "distribucion": "normal", "media": 100, "desviacion": 15,
//!         "limite_inferior": 60, "limite_superior": 140
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Uniform variables use `"distribucion": "uniforme"` with `limite_inferior`
//! and `limite_superior`. Constant variables use `"tipo": "constante"` with
//! `"parametros": { "valor": <number> }`.

use crate::{Bounds, ConfigurationError, VariableDefinition};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw model document as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub formula: String,

    #[serde(rename = "iteraciones")]
    pub iterations: u64,

    pub num_variables: usize,

    #[serde(rename = "constantes")]
    pub constants: IndexMap<String, f64>,

    pub variables: IndexMap<String, VariableDocument>,
}

/// Variable family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    #[serde(rename = "discreta")]
    Discrete,
    #[serde(rename = "continua")]
    Continuous,
    #[serde(rename = "constante")]
    Constant,
}

/// Continuous distribution name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuousDistribution {
    #[serde(rename = "uniforme")]
    Uniform,
    #[serde(rename = "normal")]
    Normal,
}

/// One variable entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDocument {
    #[serde(rename = "tipo")]
    pub kind: VariableKind,

    #[serde(rename = "parametros")]
    pub parameters: ParameterDocument,
}

/// Union of every variant's parameters; which ones are required depends on
/// the variable kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDocument {
    #[serde(rename = "valores", default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,

    #[serde(rename = "probabilidades", default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<f64>>,

    #[serde(rename = "distribucion", default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<ContinuousDistribution>,

    #[serde(rename = "limite_inferior", default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,

    #[serde(rename = "limite_superior", default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,

    #[serde(rename = "media", default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,

    #[serde(rename = "desviacion", default, skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,

    #[serde(rename = "valor", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

fn require<T: Clone>(
    field: &Option<T>,
    variable: &str,
    parameter: &'static str,
) -> Result<T, ConfigurationError> {
    field
        .clone()
        .ok_or_else(|| ConfigurationError::MissingParameter {
            variable: variable.to_string(),
            parameter,
        })
}

impl VariableDocument {
    /// Convert to a typed definition. Parameter invariants are checked
    /// separately by [`VariableDefinition::validate`].
    pub fn to_definition(&self, variable: &str) -> Result<VariableDefinition, ConfigurationError> {
        let p = &self.parameters;
        let definition = match self.kind {
            VariableKind::Constant => VariableDefinition::Constant {
                value: require(&p.value, variable, "valor")?,
            },
            VariableKind::Discrete => VariableDefinition::Discrete {
                values: require(&p.values, variable, "valores")?,
                probabilities: require(&p.probabilities, variable, "probabilidades")?,
            },
            VariableKind::Continuous => {
                match require(&p.distribution, variable, "distribucion")? {
                    ContinuousDistribution::Uniform => VariableDefinition::Uniform {
                        lo: require(&p.lower, variable, "limite_inferior")?,
                        hi: require(&p.upper, variable, "limite_superior")?,
                    },
                    ContinuousDistribution::Normal => VariableDefinition::Normal {
                        mean: require(&p.mean, variable, "media")?,
                        stddev: require(&p.stddev, variable, "desviacion")?,
                        // Clipping only applies when both limits are given.
                        bounds: match (p.lower, p.upper) {
                            (Some(lo), Some(hi)) => Some(Bounds::new(lo, hi)),
                            _ => None,
                        },
                    },
                }
            }
        };
        Ok(definition)
    }

    /// Inverse of [`VariableDocument::to_definition`].
    pub fn from_definition(definition: &VariableDefinition) -> Self {
        let (kind, parameters) = match definition {
            VariableDefinition::Constant { value } => (
                VariableKind::Constant,
                ParameterDocument {
                    value: Some(*value),
                    ..Default::default()
                },
            ),
            VariableDefinition::Discrete {
                values,
                probabilities,
            } => (
                VariableKind::Discrete,
                ParameterDocument {
                    values: Some(values.clone()),
                    probabilities: Some(probabilities.clone()),
                    ..Default::default()
                },
            ),
            VariableDefinition::Uniform { lo, hi } => (
                VariableKind::Continuous,
                ParameterDocument {
                    distribution: Some(ContinuousDistribution::Uniform),
                    lower: Some(*lo),
                    upper: Some(*hi),
                    ..Default::default()
                },
            ),
            VariableDefinition::Normal {
                mean,
                stddev,
                bounds,
            } => (
                VariableKind::Continuous,
                ParameterDocument {
                    distribution: Some(ContinuousDistribution::Normal),
                    mean: Some(*mean),
                    stddev: Some(*stddev),
                    lower: bounds.map(|b| b.lo),
                    upper: bounds.map(|b| b.hi),
                    ..Default::default()
                },
            ),
        };
        Self { kind, parameters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(json: &str) -> VariableDocument {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_discrete_document() {
        let doc = variable(
            r#"{"tipo": "discreta", "parametros": {"valores": [1, 2], "probabilidades": [0.4, 0.6]}}"#,
        );
        assert_eq!(
            doc.to_definition("x").unwrap(),
            VariableDefinition::Discrete {
                values: vec![1.0, 2.0],
                probabilities: vec![0.4, 0.6],
            }
        );
    }

    #[test]
    fn test_normal_with_and_without_bounds() {
        let bounded = variable(
            r#"{"tipo": "continua", "parametros": {"distribucion": "normal", "media": 10, "desviacion": 2,
                "limite_inferior": 5, "limite_superior": 15}}"#,
        );
        assert_eq!(
            bounded.to_definition("n").unwrap(),
            VariableDefinition::Normal {
                mean: 10.0,
                stddev: 2.0,
                bounds: Some(Bounds::new(5.0, 15.0)),
            }
        );

        // A single limit does not clip.
        let half = variable(
            r#"{"tipo": "continua", "parametros": {"distribucion": "normal", "media": 10, "desviacion": 2,
                "limite_inferior": 5}}"#,
        );
        assert_eq!(
            half.to_definition("n").unwrap(),
            VariableDefinition::Normal {
                mean: 10.0,
                stddev: 2.0,
                bounds: None,
            }
        );
    }

    #[test]
    fn test_missing_parameter() {
        let doc = variable(r#"{"tipo": "continua", "parametros": {"distribucion": "uniforme", "limite_inferior": 0}}"#);
        let err = doc.to_definition("u").unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingParameter {
                parameter: "limite_superior",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let result: Result<VariableDocument, _> =
            serde_json::from_str(r#"{"tipo": "binomial", "parametros": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_definition_document_round_trip() {
        let definitions = [
            VariableDefinition::Constant { value: 4.0 },
            VariableDefinition::Uniform { lo: -1.0, hi: 1.0 },
            VariableDefinition::Normal {
                mean: 0.0,
                stddev: 1.0,
                bounds: Some(Bounds::new(-2.0, 2.0)),
            },
        ];
        for definition in definitions {
            let doc = VariableDocument::from_definition(&definition);
            assert_eq!(doc.to_definition("v").unwrap(), definition);
        }
    }
}
