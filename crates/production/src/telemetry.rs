//! Log output for binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `default_filter`. Returns false if a subscriber was
/// already installed, which is harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
