use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Output layout of the console layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level for this crate (`trace` .. `error`).
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
    /// Extra `target=level` directives appended after the base level.
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            ansi: true,
            directives: Vec::new(),
        }
    }
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    pub fn with_level(
        mut self,
        level: impl Into<String>,
    ) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(
        mut self,
        format: LogFormat,
    ) -> Self {
        self.format = format;
        self
    }

    /// `REDMUX_LOG_LEVEL`, `REDMUX_LOG_FORMAT` and `NO_COLOR` override the
    /// values set in code.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("REDMUX_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = std::env::var("REDMUX_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.format = format;
        }
        if std::env::var_os("NO_COLOR").is_some() {
            self.ansi = false;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(format!("invalid log level: {}", self.level));
        }
        if let Some(bad) = self.directives.iter().find(|d| d.trim().is_empty()) {
            return Err(format!("empty filter directive: {bad:?}"));
        }
        Ok(())
    }

    /// Builds the `EnvFilter` directive string, e.g.
    /// `warn,redmux=debug,redmux::mux::dispatch=trace`.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        let mut parts = vec![format!("warn,redmux={level}")];
        parts.extend(self.directives.iter().map(|d| d.trim().to_string()));
        parts.join(",")
    }
}
