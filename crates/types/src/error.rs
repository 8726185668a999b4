//! Configuration error type.

use montecarlo_formula::ParseError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A model or handshake configuration is unusable.
///
/// Always fatal: nothing downstream can do meaningful work with an invalid
/// configuration, so these are never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed model document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("iterations must be greater than zero")]
    NoIterations,

    #[error("num_variables is {declared} but {actual} variables are defined")]
    VariableCountMismatch { declared: usize, actual: usize },

    #[error("variable `{variable}` is missing parameter `{parameter}`")]
    MissingParameter {
        variable: String,
        parameter: &'static str,
    },

    #[error("variable `{variable}` has no values")]
    EmptyDiscrete { variable: String },

    #[error("variable `{variable}` has {values} values but {probabilities} probabilities")]
    LengthMismatch {
        variable: String,
        values: usize,
        probabilities: usize,
    },

    #[error("probabilities of `{variable}` sum to {sum}, expected 1")]
    ProbabilitySum { variable: String, sum: f64 },

    #[error("variable `{variable}` has invalid probability {probability}")]
    InvalidProbability { variable: String, probability: f64 },

    #[error("variable `{variable}` has inverted range [{lo}, {hi}]")]
    InvertedRange { variable: String, lo: f64, hi: f64 },

    #[error("variable `{variable}` has range [{lo}, {hi}] too wide to sample")]
    RangeOverflow { variable: String, lo: f64, hi: f64 },

    #[error("variable `{variable}` has non-positive standard deviation {stddev}")]
    NonPositiveStddev { variable: String, stddev: f64 },

    #[error("`{name}` has non-finite value {value}")]
    NonFinite { name: String, value: f64 },

    #[error("formula does not parse: {0}")]
    InvalidFormula(#[from] ParseError),

    #[error("formula references undeclared names: {}", .0.join(", "))]
    UndeclaredNames(Vec<String>),

    #[error("`{0}` is reserved and cannot name a constant")]
    ReservedName(String),

    #[error("configuration has an empty formula")]
    EmptyFormula,

    #[error("configuration has no constants")]
    EmptyConstants,

    #[error("no configuration received within {0:?}")]
    NotReceived(Duration),
}
