//! Distributor and worker configuration.
//!
//! Both configs are builder-style structs with sensible defaults, and can be
//! read from TOML:
//!
//! ```toml
//! seed = 42
//! threads = 8
//!
//! [duplicate_policy]
//! policy = "regenerate"
//! max_attempts = 20000
//!
//! [topology]
//! scenario_queue = "Escenarios"
//! ```
//!
//! Durations are written in humantime form (`"30s"`, `"2m"`).

use montecarlo_messages::Topology;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

/// What the distributor does when a generated scenario is an exact repeat of
/// one already published in this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Drop the repeat. Fewer than `iterations` scenarios may be delivered.
    #[default]
    Skip,

    /// Keep drawing replacements until `iterations` unique scenarios are
    /// delivered or `max_attempts` scenarios have been drawn in total.
    Regenerate { max_attempts: u64 },
}

impl DuplicatePolicy {
    /// Total draws allowed for a run of `iterations` scenarios.
    pub fn draw_budget(&self, iterations: u64) -> u64 {
        match self {
            DuplicatePolicy::Skip => iterations,
            DuplicatePolicy::Regenerate { max_attempts } => (*max_attempts).max(iterations),
        }
    }
}

/// Configuration for a [`Distributor`](crate::Distributor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub topology: Topology,

    /// Generation seed; a fresh one is drawn (and logged) when unset.
    pub seed: Option<u64>,

    /// Generation threads; hardware concurrency when unset.
    pub threads: Option<usize>,

    pub duplicate_policy: DuplicatePolicy,
}

impl DistributorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        read_toml(path.as_ref())
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

/// Configuration for a [`Worker`](crate::Worker).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub topology: Topology,

    /// Drop every scenario already waiting in the work queue at startup.
    pub purge_on_start: bool,

    /// Give up when no configuration arrives in time; wait forever when unset.
    #[serde(with = "humantime_option")]
    pub config_timeout: Option<Duration>,
}

impl WorkerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        read_toml(path.as_ref())
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_purge_on_start(mut self, purge: bool) -> Self {
        self.purge_on_start = purge;
        self
    }

    pub fn with_config_timeout(mut self, timeout: Duration) -> Self {
        self.config_timeout = Some(timeout);
        self
    }
}

mod humantime_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_distributor_config_from_toml() {
        let config = DistributorConfig::from_toml_str(
            r#"
            seed = 42
            threads = 4

            [duplicate_policy]
            policy = "regenerate"
            max_attempts = 500

            [topology]
            scenario_queue = "Escenarios-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, Some(42));
        assert_eq!(config.threads, Some(4));
        assert_eq!(
            config.duplicate_policy,
            DuplicatePolicy::Regenerate { max_attempts: 500 }
        );
        assert_eq!(config.topology.scenario_queue, "Escenarios-test");
        // Unset topology names keep their defaults.
        assert_eq!(config.topology.configuration_exchange, "Cofiguracion");
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            DistributorConfig::from_toml_str("").unwrap(),
            DistributorConfig::default()
        );
        assert_eq!(WorkerConfig::from_toml_str("").unwrap(), WorkerConfig::default());
    }

    #[test]
    fn test_worker_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "purge_on_start = true\nconfig_timeout = \"1m 30s\"").unwrap();

        let config = WorkerConfig::from_path(file.path()).unwrap();
        assert!(config.purge_on_start);
        assert_eq!(config.config_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = WorkerConfig::from_toml_str("config_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigFileError::Toml(_)));
    }

    #[test]
    fn test_draw_budget() {
        assert_eq!(DuplicatePolicy::Skip.draw_budget(100), 100);
        assert_eq!(
            DuplicatePolicy::Regenerate { max_attempts: 250 }.draw_budget(100),
            250
        );
        // Never fewer draws than requested scenarios.
        assert_eq!(
            DuplicatePolicy::Regenerate { max_attempts: 10 }.draw_budget(100),
            100
        );
    }
}
