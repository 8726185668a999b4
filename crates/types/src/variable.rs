//! Variable sampling definitions.

use crate::ConfigurationError;
use indexmap::IndexMap;

/// Allowed deviation of a discrete distribution's probability sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Inclusive clipping range for a normal draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lo: f64,
    pub hi: f64,
}

impl Bounds {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }
}

/// How a single model variable is sampled.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableDefinition {
    /// Fixed value; consumes no randomness.
    Constant { value: f64 },

    /// Weighted choice among `values`.
    Discrete {
        values: Vec<f64>,
        probabilities: Vec<f64>,
    },

    /// Continuous uniform over `[lo, hi)`.
    Uniform { lo: f64, hi: f64 },

    /// Normal distribution, hard-clipped into `bounds` when present.
    ///
    /// Clipping piles the tail mass onto the bounds; this is not a truncated
    /// normal.
    Normal {
        mean: f64,
        stddev: f64,
        bounds: Option<Bounds>,
    },
}

/// Largest `hi - lo` a uniform range may span.
///
/// Samplers stretch the span by `1 / (1 - EPSILON)`, which must stay finite.
pub const MAX_UNIFORM_SPAN: f64 = f64::MAX * (1.0 - f64::EPSILON);

/// Variable definitions keyed by name, in declaration order.
pub type VariableDefinitions = IndexMap<String, VariableDefinition>;

fn finite(name: &str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::NonFinite {
            name: name.to_string(),
            value,
        })
    }
}

impl VariableDefinition {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VariableDefinition::Constant { .. } => "constant",
            VariableDefinition::Discrete { .. } => "discrete",
            VariableDefinition::Uniform { .. } => "uniform",
            VariableDefinition::Normal { .. } => "normal",
        }
    }

    /// Check the variant's parameter invariants.
    pub fn validate(&self, variable: &str) -> Result<(), ConfigurationError> {
        match self {
            VariableDefinition::Constant { value } => finite(variable, *value),

            VariableDefinition::Discrete {
                values,
                probabilities,
            } => {
                if values.is_empty() {
                    return Err(ConfigurationError::EmptyDiscrete {
                        variable: variable.to_string(),
                    });
                }
                if values.len() != probabilities.len() {
                    return Err(ConfigurationError::LengthMismatch {
                        variable: variable.to_string(),
                        values: values.len(),
                        probabilities: probabilities.len(),
                    });
                }
                for &value in values {
                    finite(variable, value)?;
                }
                for &probability in probabilities {
                    if !probability.is_finite() || probability < 0.0 {
                        return Err(ConfigurationError::InvalidProbability {
                            variable: variable.to_string(),
                            probability,
                        });
                    }
                }
                let sum: f64 = probabilities.iter().sum();
                if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                    return Err(ConfigurationError::ProbabilitySum {
                        variable: variable.to_string(),
                        sum,
                    });
                }
                Ok(())
            }

            VariableDefinition::Uniform { lo, hi } => {
                finite(variable, *lo)?;
                finite(variable, *hi)?;
                if lo >= hi {
                    return Err(ConfigurationError::InvertedRange {
                        variable: variable.to_string(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
                let span = hi - lo;
                if !span.is_finite() || span > MAX_UNIFORM_SPAN {
                    return Err(ConfigurationError::RangeOverflow {
                        variable: variable.to_string(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
                Ok(())
            }

            VariableDefinition::Normal {
                mean,
                stddev,
                bounds,
            } => {
                finite(variable, *mean)?;
                finite(variable, *stddev)?;
                if *stddev <= 0.0 {
                    return Err(ConfigurationError::NonPositiveStddev {
                        variable: variable.to_string(),
                        stddev: *stddev,
                    });
                }
                if let Some(Bounds { lo, hi }) = bounds {
                    finite(variable, *lo)?;
                    finite(variable, *hi)?;
                    if lo >= hi {
                        return Err(ConfigurationError::InvertedRange {
                            variable: variable.to_string(),
                            lo: *lo,
                            hi: *hi,
                        });
                    }
                }
                Ok(())
            }
        }
    }
}
