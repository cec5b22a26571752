//! Tracing initialisation shared by both binaries.

use crate::config::LoggingConfig;

/// Initialise structured tracing: JSON in production-style deployments,
/// pretty console output for development.
pub fn init(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cfg.level.parse().unwrap_or_default());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if cfg.format == "console" {
        subscriber.init();
    } else {
        subscriber.json().init();
    }
}
