//! Core types for distributed Monte Carlo models.
//!
//! - [`VariableDefinition`]: closed set of sampling variants
//! - [`ModelConfiguration`]: validated formula, constants and variables
//! - [`Scenario`]: one sampled assignment of variable values
//! - [`ModelDocument`]: the on-disk JSON model format

mod document;
mod error;
mod model;
mod scenario;
mod variable;

pub use document::{
    ContinuousDistribution, ModelDocument, ParameterDocument, VariableDocument, VariableKind,
};
pub use error::ConfigurationError;
pub use model::{BroadcastConfiguration, ModelConfiguration, RESERVED_CONSTANT_NAMES};
pub use scenario::Scenario;
pub use variable::{
    Bounds, VariableDefinition, VariableDefinitions, MAX_UNIFORM_SPAN, PROBABILITY_TOLERANCE,
};
