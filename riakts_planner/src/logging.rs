//! Common CLI flags for logging
use std::{fmt, io, str::FromStr};

use tracing_subscriber::{EnvFilter, filter::ParseError};

/// Used when neither `--log-filter` nor `-v` is given.
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),

    #[error("unable to install the global log subscriber: {0}")]
    SetGlobalDefault(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogFormat {
    Full,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Valid options: full, pretty, json"
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub(crate) struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,riakts_query=trace` specifies debug logging for all modules
    /// except for the `riakts_query` crate, which will log at trace level.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER")]
    pub(crate) log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug'
    ///
    /// -vvv 'trace'
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub(crate) log_verbose_count: u8,

    /// Logs: message format
    ///
    /// Can be one of: full, pretty, json
    #[clap(long = "log-format", env = "LOG_FORMAT", default_value = "full")]
    pub(crate) log_format: LogFormat,
}

impl LoggingConfig {
    /// The filter in effect: `-v` wins over `--log-filter`, which wins over the default.
    pub(crate) fn env_filter(&self) -> Result<EnvFilter, Error> {
        let directives = match self.log_verbose_count {
            0 => self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Ok(EnvFilter::try_new(directives)?)
    }

    /// Install a global subscriber writing to stderr, leaving stdout to command output.
    pub(crate) fn install_global_subscriber(&self) -> Result<(), Error> {
        use tracing_subscriber::{fmt::layer, prelude::*};

        let filter = self.env_filter()?;
        let registry = tracing_subscriber::registry().with(filter);
        let fmt_layer = layer().with_writer(io::stderr);
        match self.log_format {
            LogFormat::Full => registry.with(fmt_layer).try_init()?,
            LogFormat::Pretty => registry.with(fmt_layer.pretty()).try_init()?,
            LogFormat::Json => registry.with(fmt_layer.json()).try_init()?,
        }
        Ok(())
    }
}
