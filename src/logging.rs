use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this a
/// second time (e.g. from concurrent tests) is a no-op.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // An Err means a subscriber is already installed; keep the existing one.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

pub fn init_from_config(config: &AppConfig) {
    init_tracing(&config.log_level, config.log_json);
}
