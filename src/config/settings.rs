use std::{sync::Arc, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

use crate::{
    client::ConnectOptions,
    logging::{LogFormat, LoggingConfig},
    pubsub::Broker,
};

/// Process-level settings. Defaults are overridden by `REDMUX_*`
/// environment variables (`REDMUX_URI`, `REDMUX_EVENT_CAPACITY`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub uri: String,
    pub event_capacity: usize,
    /// Per-channel buffer of the in-process broker.
    pub broker_capacity: usize,
    pub connect_timeout_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .set_default("uri", "redis://127.0.0.1:6379")?
            .set_default("event_capacity", 1024)?
            .set_default("broker_capacity", 256)?
            .set_default("connect_timeout_ms", 5000)?
            .set_default("log_level", "info")?
            .set_default("log_format", "pretty")?
            .add_source(Environment::with_prefix("REDMUX").try_parsing(true))
            .build()?;

        cfg.try_deserialize()
    }

    pub fn connection_options(&self) -> ConnectOptions {
        ConnectOptions {
            event_capacity: self.event_capacity.max(1),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    /// A fresh in-process broker sized by `broker_capacity`.
    pub fn broker(&self) -> Arc<Broker> {
        Arc::new(Broker::new(self.broker_capacity))
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.log_level.clone())
            .with_format(self.log_format)
    }
}
