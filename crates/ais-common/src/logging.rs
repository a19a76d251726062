//! Logging setup for AIS binaries
//!
//! `init_logging` installs the global `tracing` subscriber once per process. Output goes
//! to the console, a daily rotated file, or both, as text or JSON lines. Library crates
//! never touch the subscriber; they emit `tracing` events with structured fields:
//!
//! ```rust,ignore
//! warn!(period_key = %item.period_key, error = %err, "Fetch failed");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ais_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! let _guard = init_logging(&config).unwrap();
//! ```

use crate::error::{env_or, env_parse, AisError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        if level == Level::TRACE {
            LogLevel::Trace
        } else if level == Level::DEBUG {
            LogLevel::Debug
        } else if level == Level::INFO {
            LogLevel::Info
        } else if level == Level::WARN {
            LogLevel::Warn
        } else {
            LogLevel::Error
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = AisError;

    /// Accepts anything `tracing::Level` does (`warn`, `WARN`, `3`) plus `warning`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("warning") {
            return Ok(LogLevel::Warn);
        }
        Level::from_str(trimmed)
            .map(LogLevel::from)
            .map_err(|_| AisError::config(format!("unknown log level '{}'", s)))
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn writes_console(self) -> bool {
        self != LogOutput::File
    }

    fn writes_file(self) -> bool {
        self != LogOutput::Console
    }
}

impl FromStr for LogOutput {
    type Err = AisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            other => Err(AisError::config(format!("unknown log output '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = AisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AisError::config(format!("unknown log format '{}'", other))),
        }
    }
}

/// Subscriber settings. Build with [`LogConfig::builder`] or [`LogConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Only used when `output` includes a file
    pub log_dir: PathBuf,
    /// Rotated files are named `<prefix>.<YYYY-MM-DD>`
    pub log_file_prefix: String,
    /// Extra `EnvFilter` directives, comma separated (e.g. `aws_smithy_runtime=warn`)
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "ais".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl fmt::Display for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level={:?} output={:?} format={:?}", self.level, self.output, self.format)?;
        if self.output.writes_file() {
            write!(f, " file={}/{}", self.log_dir.display(), self.log_file_prefix)?;
        }
        Ok(())
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// Defaults overlaid with `LOG_*` environment variables.
    ///
    /// Reads `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILE_PREFIX`,
    /// `LOG_FILTER`, `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_THREAD_IDS` and
    /// `LOG_INCLUDE_TARGETS`.
    pub fn from_env() -> crate::Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields that have a `LOG_*` variable set. Malformed values are errors.
    pub fn merge_env(self) -> crate::Result<Self> {
        let log_dir = env_or("LOG_DIR", &self.log_dir.to_string_lossy());
        let filter_directives = std::env::var("LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or(self.filter_directives);

        Ok(Self {
            level: env_parse("LOG_LEVEL", self.level)?,
            output: env_parse("LOG_OUTPUT", self.output)?,
            format: env_parse("LOG_FORMAT", self.format)?,
            log_dir: PathBuf::from(log_dir),
            log_file_prefix: env_or("LOG_FILE_PREFIX", &self.log_file_prefix),
            filter_directives,
            include_location: env_parse("LOG_INCLUDE_LOCATION", self.include_location)?,
            include_thread_ids: env_parse("LOG_INCLUDE_THREAD_IDS", self.include_thread_ids)?,
            include_targets: env_parse("LOG_INCLUDE_TARGETS", self.include_targets)?,
        })
    }

    /// `RUST_LOG` first, then the configured level, then any extra directives.
    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .from_env_lossy();

        let extra = self.filter_directives.as_deref().unwrap_or_default();
        for directive in extra.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let parsed = directive
                .parse()
                .with_context(|| format!("Invalid log filter directive '{}'", directive))?;
            filter = filter.add_directive(parsed);
        }

        Ok(filter)
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(self.include_targets)
            .with_thread_ids(self.include_thread_ids)
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_span_events(FmtSpan::CLOSE);

        match self.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().flatten_event(true).boxed(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    /// Append directives to any already set.
    pub fn filter(mut self, directives: &str) -> Self {
        self.config.filter_directives = Some(match self.config.filter_directives.take() {
            Some(existing) => format!("{},{}", existing, directives),
            None => directives.to_string(),
        });
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Flushes the file writer when dropped. Hold it until `main` returns.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<LoggingGuard> {
    let filter = config.env_filter()?;

    let console = config
        .output
        .writes_console()
        .then(|| config.layer(std::io::stdout, true));

    let (file, guard) = if config.output.writes_file() {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(config.layer(writer, false)), Some(guard))
    } else {
        (None, None)
    };

    let layers: Vec<BoxedLayer> = console.into_iter().chain(file).collect();

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(config = %config, "Logging initialized");

    Ok(LoggingGuard { _file: guard })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing_follows_tracing() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!("loud".parse::<LogLevel>(), Err(AisError::Config(_))));
    }

    #[test]
    fn test_output_targets() {
        assert!(LogOutput::Both.writes_console() && LogOutput::Both.writes_file());
        assert!(!LogOutput::Console.writes_file());
        assert!(!LogOutput::File.writes_console());
        assert_eq!(" Stdout ".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert!("syslog".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_builder_appends_filters() {
        let config = LogConfig::builder()
            .level(LogLevel::Debug)
            .format(LogFormat::Json)
            .log_file_prefix("ais-ingest")
            .filter("aws_smithy_runtime=warn")
            .filter("hyper=info")
            .build();

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file_prefix, "ais-ingest");
        assert_eq!(
            config.filter_directives.as_deref(),
            Some("aws_smithy_runtime=warn,hyper=info")
        );
    }

    #[test]
    fn test_display_mentions_file_only_when_written() {
        let console = LogConfig::default();
        assert!(!console.to_string().contains("file="));

        let file = LogConfig::builder()
            .output(LogOutput::File)
            .log_dir("/var/log/ais")
            .log_file_prefix("ais-ingest")
            .build();
        assert!(file.to_string().ends_with("file=/var/log/ais/ais-ingest"));
    }

    #[test]
    fn test_bad_filter_directive_is_rejected() {
        let config = LogConfig::builder().filter("ais_ingest=loud").build();
        assert!(config.env_filter().is_err());
    }

    #[test]
    fn test_merge_env_rejects_malformed_flag() {
        std::env::set_var("LOG_INCLUDE_THREAD_IDS", "sometimes");
        let result = LogConfig::default().merge_env();
        std::env::remove_var("LOG_INCLUDE_THREAD_IDS");

        assert!(matches!(result, Err(AisError::InvalidEnv { .. })));
    }
}
