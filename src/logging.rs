use tracing_subscriber::EnvFilter;

use crate::config;

/// Install the global subscriber. An explicit CLI override beats `RUST_LOG`,
/// which beats the configured level.
pub fn init(cfg: &config::Logging, override_level: Option<&str>) {
    let filter = match override_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
