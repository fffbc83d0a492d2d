//! Logging setup driven by the `logging` section of [`PhaseConfig`].
//!
//! Phase transitions are logged at `info`, rejected requests at `debug` and
//! role misuse at `warn`, so `level: info` shows the phase timeline and
//! `level: warn` only shows misuse. `GEPHASE_LOG_LEVEL` overrides the
//! configured level for a single run.
//!
//! [`PhaseConfig`]: crate::config::PhaseConfig

use std::io::IsTerminal;

use serde::{Deserialize, Serialize};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

/// Environment variable that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "GEPHASE_LOG_LEVEL";

/// Filter used when neither the config nor the environment gives one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One line per record, for people following a session.
    #[default]
    Human,
    /// Newline-delimited JSON, for log shippers.
    Json,
}

/// When human output carries ANSI colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorChoice {
    /// Color when stderr is a terminal and `NO_COLOR` is unset.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn use_ansi(self) -> bool {
        match self {
            Self::Auto => std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// The `logging` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// `tracing` filter directives, e.g. `info` or `warn,gephase=debug`
    pub level: String,

    pub color: ColorChoice,

    /// Include the module path of each record
    pub targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            level: DEFAULT_LOG_LEVEL.to_owned(),
            color: ColorChoice::Auto,
            targets: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the filter from `level`, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed directives.
    pub fn filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_new(self.level.trim())
    }

    /// The directive string in effect: `GEPHASE_LOG_LEVEL` when set and
    /// non-empty, otherwise `level`.
    #[must_use]
    pub fn effective_level(&self) -> String {
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.level.trim().to_owned())
    }
}

/// Installs the global `tracing` subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed; the first one
/// wins, so repeated calls (tests, several subsystems) are harmless. An
/// unparsable level falls back to [`DEFAULT_LOG_LEVEL`] and is reported
/// once the subscriber is up.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let level = config.effective_level();
    let (filter, rejected) = match EnvFilter::try_new(&level) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(DEFAULT_LOG_LEVEL), Some(err)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.targets)
        .with_writer(std::io::stderr);
    let installed = match config.format {
        LogFormat::Human => builder.with_ansi(config.color.use_ansi()).try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };

    if let Some(err) = rejected {
        warn!(%level, error = %err, fallback = DEFAULT_LOG_LEVEL, "invalid log level");
    }
    installed
}
