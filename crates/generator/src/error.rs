use montecarlo_types::ConfigurationError;
use thiserror::Error;

/// Errors raised while building a generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Cannot build distribution for {variable}: {reason}")]
    Distribution { variable: String, reason: String },

    #[error("Failed to build generation thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
