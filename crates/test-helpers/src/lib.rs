//! Shared fixtures for tests across the workspace.

use indexmap::IndexMap;
use montecarlo_messages::ConfigurationMessage;
use montecarlo_types::{ModelConfiguration, Scenario};
use std::io::Write;
use tempfile::NamedTempFile;

/// Mixed model: bounded normal price, discrete quantity, one constant.
pub const PRICING_MODEL: &str = r#"{
    "formula": "precio * cantidad - costo",
    "iteraciones": 1000,
    "num_variables": 2,
    "constantes": {"costo": 50},
    "variables": {
        "precio": {
            "tipo": "continua",
            "parametros": {"distribucion": "normal", "media": 100, "desviacion": 15,
                           "limite_inferior": 60, "limite_superior": 140}
        },
        "cantidad": {
            "tipo": "discreta",
            "parametros": {"valores": [1, 2, 3], "probabilidades": [0.2, 0.5, 0.3]}
        }
    }
}"#;

fn model(json: String) -> ModelConfiguration {
    match ModelConfiguration::from_json_str(&json) {
        Ok(model) => model,
        Err(e) => panic!("fixture model is invalid: {e}"),
    }
}

/// `precio * cantidad - costo` with the given iteration count.
pub fn pricing_model(iterations: u64) -> ModelConfiguration {
    model(PRICING_MODEL.replace("\"iteraciones\": 1000", &format!("\"iteraciones\": {iterations}")))
}

/// Two fair coins; only four distinct scenarios exist.
pub fn discrete_model(iterations: u64) -> ModelConfiguration {
    model(format!(
        r#"{{
            "formula": "x + y + c",
            "iteraciones": {iterations},
            "num_variables": 2,
            "constantes": {{"c": 0}},
            "variables": {{
                "x": {{"tipo": "discreta", "parametros": {{"valores": [0, 1], "probabilidades": [0.5, 0.5]}}}},
                "y": {{"tipo": "discreta", "parametros": {{"valores": [0, 1], "probabilidades": [0.5, 0.5]}}}}
            }}
        }}"#
    ))
}

/// Uniform times unbounded normal; repeats are practically impossible.
pub fn continuous_model(iterations: u64) -> ModelConfiguration {
    model(format!(
        r#"{{
            "formula": "x * y + c",
            "iteraciones": {iterations},
            "num_variables": 2,
            "constantes": {{"c": 1}},
            "variables": {{
                "x": {{"tipo": "continua", "parametros": {{"distribucion": "uniforme",
                        "limite_inferior": 0, "limite_superior": 10}}}},
                "y": {{"tipo": "continua", "parametros": {{"distribucion": "normal",
                        "media": 5, "desviacion": 1}}}}
            }}
        }}"#
    ))
}

/// Write a model document to a temporary file.
pub fn write_model(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(json.as_bytes()).expect("write model");
    file
}

pub fn scenario(values: &[(&str, f64)]) -> Scenario {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

pub fn configuration(formula: &str, constants: &[(&str, f64)]) -> ConfigurationMessage {
    let constants: IndexMap<String, f64> = constants
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect();
    ConfigurationMessage::new(formula, constants)
}
