//! Logging setup on top of `tracing-subscriber`.
//!
//! - `config`: `LoggingConfig` and `LogFormat`.
//! - `filters`: `EnvFilter` construction (`RUST_LOG` wins over config).

pub mod config;
mod filters;

pub use self::config::{LogFormat, LoggingConfig};
pub use filters::build_filter_from_config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Installs the global subscriber. Fails when the config is invalid or a
/// global subscriber is already set.
pub fn init_logging(
    mut config: LoggingConfig
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.apply_env_overrides();
    config.validate()?;

    let env_filter = build_filter_from_config(&config);
    let layer = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(config.ansi)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(config.ansi)
            .with_target(true)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = %config.format,
        "logging initialized"
    );
    Ok(())
}
