//! Validated model configuration.

use crate::{ConfigurationError, ModelDocument, VariableDefinition, VariableDefinitions, VariableDocument};
use indexmap::IndexMap;
use montecarlo_formula::Formula;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

/// Constant names that collide with fields of the broadcast message, where
/// constants are flattened next to the formula.
pub const RESERVED_CONSTANT_NAMES: &[&str] = &["formula"];

/// The part of a model every worker needs: the formula and the constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BroadcastConfiguration<'a> {
    pub formula: &'a str,
    pub constants: &'a IndexMap<String, f64>,
}

/// A validated Monte Carlo model.
///
/// Construction validates every invariant (distribution parameters, formula
/// syntax, formula names ⊆ constants ∪ variables), so holding a
/// `ModelConfiguration` means the model is usable. It is immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct ModelConfiguration {
    formula: Formula,
    constants: IndexMap<String, f64>,
    variables: VariableDefinitions,
    iterations: u64,
}

impl ModelConfiguration {
    /// Build and validate a model.
    pub fn new(
        formula: &str,
        constants: IndexMap<String, f64>,
        variables: VariableDefinitions,
        iterations: u64,
    ) -> Result<Self, ConfigurationError> {
        if iterations == 0 {
            return Err(ConfigurationError::NoIterations);
        }

        for (name, value) in &constants {
            if RESERVED_CONSTANT_NAMES.contains(&name.as_str()) {
                return Err(ConfigurationError::ReservedName(name.clone()));
            }
            if !value.is_finite() {
                return Err(ConfigurationError::NonFinite {
                    name: name.clone(),
                    value: *value,
                });
            }
        }

        for (name, definition) in &variables {
            definition.validate(name)?;
        }

        let formula = Formula::parse(formula)?;
        let undeclared: Vec<String> = formula
            .free_identifiers()
            .into_iter()
            .filter(|name| !constants.contains_key(name) && !variables.contains_key(name))
            .collect();
        if !undeclared.is_empty() {
            return Err(ConfigurationError::UndeclaredNames(undeclared));
        }

        if constants.is_empty() {
            warn!("Model declares no constants; workers will refuse this configuration");
        }

        Ok(Self {
            formula,
            constants,
            variables,
            iterations,
        })
    }

    /// Build from a parsed model document.
    pub fn from_document(document: ModelDocument) -> Result<Self, ConfigurationError> {
        if document.num_variables != document.variables.len() {
            return Err(ConfigurationError::VariableCountMismatch {
                declared: document.num_variables,
                actual: document.variables.len(),
            });
        }

        let variables = document
            .variables
            .iter()
            .map(|(name, doc)| Ok((name.clone(), doc.to_definition(name)?)))
            .collect::<Result<VariableDefinitions, ConfigurationError>>()?;

        let model = Self::new(
            &document.formula,
            document.constants,
            variables,
            document.iterations,
        )?;

        info!(
            formula = %model.formula,
            constants = model.constants.len(),
            variables = model.variables.len(),
            iterations = model.iterations,
            "Model loaded"
        );

        Ok(model)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        Self::from_document(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigurationError> {
        Self::from_document(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Formula and constants, as broadcast to workers.
    pub fn configuration_for_broadcast(&self) -> BroadcastConfiguration<'_> {
        BroadcastConfiguration {
            formula: self.formula.source(),
            constants: &self.constants,
        }
    }

    pub fn variable_definitions(&self) -> &VariableDefinitions {
        &self.variables
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn constants(&self) -> &IndexMap<String, f64> {
        &self.constants
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// True when every variable draws from a finite value set, which is when
    /// duplicate scenarios become likely.
    pub fn is_discrete_space(&self) -> bool {
        self.variables.values().all(|definition| {
            matches!(
                definition,
                VariableDefinition::Constant { .. } | VariableDefinition::Discrete { .. }
            )
        })
    }

    /// Render back into a document.
    pub fn to_document(&self) -> ModelDocument {
        ModelDocument {
            formula: self.formula.source().to_string(),
            iterations: self.iterations,
            num_variables: self.variables.len(),
            constants: self.constants.clone(),
            variables: self
                .variables
                .iter()
                .map(|(name, definition)| (name.clone(), VariableDocument::from_definition(definition)))
                .collect(),
        }
    }
}
