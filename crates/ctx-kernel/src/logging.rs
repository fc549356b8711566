//! Tracing subscriber setup for the binary

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Install the global subscriber
///
/// `RUST_LOG` wins over [`EngineConfig::log_filter`]. Lines go to stderr,
/// as JSON when [`EngineConfig::log_json`] is set.
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init_tracing(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
