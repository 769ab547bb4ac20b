//! Log subscriber for hosts that embed the engine.
//!
//! The engine only emits `tracing` events; the host installs one subscriber
//! at startup, usually through `EngineConfig::init_logging` which reads the
//! `[logging]` section. `RUST_LOG` replaces the configured filter when set.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Crates whose events follow the configured level. Everything else is
/// held at `warn` so HTTP client chatter stays out of the log.
const CRATE_TARGETS: [&str; 3] = ["crossdesk_core", "crossdesk_providers", "crossdesk_engine"];

/// Errors from [`init_tracing`]
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to parse log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("unknown log format: {0}")]
    UnknownFormat(String),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingOutputFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

impl FromStr for TracingOutputFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TracingError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level for the crossdesk crates.
    pub level: Level,
    pub format: TracingOutputFormat,
    /// Include file and line of each event.
    pub include_location: bool,
    /// Full `EnvFilter` directive used instead of the per-crate default.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingOutputFormat::Pretty,
            include_location: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Debug-level compact lines with source locations.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            format: TracingOutputFormat::Compact,
            include_location: true,
            filter: None,
        }
    }

    /// Info-level JSON lines for a long-running service.
    #[must_use]
    pub fn service() -> Self {
        Self {
            format: TracingOutputFormat::Json,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// The directive applied when `RUST_LOG` is unset.
    pub fn directive(&self) -> String {
        match self.filter.as_deref().map(str::trim) {
            Some(filter) if !filter.is_empty() => filter.to_string(),
            _ => default_directive(self.level),
        }
    }
}

/// `warn` for dependencies, `level` for the crossdesk crates.
pub fn default_directive(level: Level) -> String {
    let level = level.to_string().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(CRATE_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(config: &TracingConfig) -> Result<EnvFilter, TracingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.trim().is_empty() => Ok(EnvFilter::try_new(from_env)?),
        _ => Ok(EnvFilter::try_new(config.directive())?),
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails when a subscriber is already installed or the filter does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = env_filter(&config)?;
    let location = config.include_location;

    let layer = match config.format {
        TracingOutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        TracingOutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(location)
            .with_line_number(location)
            .without_time()
            .boxed(),
        TracingOutputFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_file(location)
            .with_line_number(location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_quiets_dependencies() {
        assert_eq!(
            default_directive(Level::DEBUG),
            "warn,crossdesk_core=debug,crossdesk_providers=debug,crossdesk_engine=debug"
        );
        assert!(EnvFilter::try_new(default_directive(Level::TRACE)).is_ok());
    }

    #[test]
    fn explicit_filter_wins_unless_blank() {
        let config = TracingConfig::default().with_filter("crossdesk_engine=trace");
        assert_eq!(config.directive(), "crossdesk_engine=trace");

        let blank = TracingConfig::default().with_filter("  ");
        assert_eq!(blank.directive(), default_directive(Level::INFO));
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<TracingOutputFormat>().unwrap(), TracingOutputFormat::Json);
        assert_eq!(" compact ".parse::<TracingOutputFormat>().unwrap(), TracingOutputFormat::Compact);
        assert!(matches!(
            "xml".parse::<TracingOutputFormat>(),
            Err(TracingError::UnknownFormat(_))
        ));
    }

    #[test]
    fn presets() {
        let debug = TracingConfig::cli_debug();
        assert_eq!(debug.level, Level::DEBUG);
        assert_eq!(debug.format, TracingOutputFormat::Compact);
        assert!(debug.include_location);

        let service = TracingConfig::service();
        assert_eq!(service.level, Level::INFO);
        assert_eq!(service.format, TracingOutputFormat::Json);
    }

    #[test]
    fn second_install_fails() {
        // Only this test installs a global subscriber.
        let config = TracingConfig::cli_debug().with_filter("crossdesk_core=info");
        init_tracing(config.clone()).unwrap();
        assert!(matches!(init_tracing(config), Err(TracingError::Init(_))));
    }
}
