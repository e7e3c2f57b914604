//! Logging setup on `tracing-subscriber`.
//!
//! The engine logs through `tracing` everywhere; this module installs the
//! global subscriber. Most applications call [`init_from_config`] with the
//! `[logging]` section, or let [`TetherRuntime`](crate::TetherRuntime) do it.
//!
//! ```rust,ignore
//! LoggingBuilder::new()
//!     .with_level(Level::DEBUG)
//!     .directive("tether_framework::dispatcher=trace")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .try_init()?;
//! ```

use std::path::PathBuf;

use tracing::{Level, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEvents};
use crate::error::RuntimeResult;

const DEFAULT_LOG_FILE: &str = "tether.log";

fn fmt_span(events: SpanEvents) -> FmtSpan {
    let mut span = FmtSpan::NONE;
    if events.new {
        span |= FmtSpan::NEW;
    }
    if events.enter {
        span |= FmtSpan::ENTER;
    }
    if events.exit {
        span |= FmtSpan::EXIT;
    }
    if events.close {
        span |= FmtSpan::CLOSE;
    }
    span
}

/// Installs the subscriber described by `config`.
///
/// Returns an error if a global subscriber is already set.
pub fn init_from_config(config: &LoggingConfig) -> RuntimeResult<()> {
    LoggingBuilder::from_config(config).try_init()
}

/// A builder for the global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    directives: Vec<String>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_location: bool,
    file_path: Option<PathBuf>,
    rotation: LogRotation,
    max_files: usize,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::from_config(&LoggingConfig::default())
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.to_tracing_level(),
            directives: config
                .filters
                .iter()
                .map(|(target, level)| format!("{target}={level}"))
                .collect(),
            span_events: config.span_events,
            format: config.format,
            output: config.output,
            with_target: true,
            with_thread_ids: config.thread_ids,
            with_location: config.file_location,
            file_path: config.file_path.clone(),
            rotation: config.rotation,
            max_files: config.max_files,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds a filter directive such as `tether_framework=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Include file names and line numbers.
    pub fn with_location(mut self, enabled: bool) -> Self {
        self.with_location = enabled;
        self
    }

    /// Writes to `path`; implies [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self.output = LogOutput::File;
        self
    }

    pub fn rotation(mut self, rotation: LogRotation, max_files: usize) -> Self {
        self.rotation = rotation;
        self.max_files = max_files;
        self
    }

    /// `RUST_LOG` if set, otherwise the base level; then every directive.
    fn build_filter(&self) -> EnvFilter {
        let base = self.level.to_string().to_lowercase();
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base));
        for directive in &self.directives {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }

    fn file_appender(&self, path: Option<&PathBuf>) -> RuntimeResult<RollingFileAppender> {
        let path = path.cloned().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let prefix = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("tether")
            .to_owned();

        let rotation = match self.rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        };
        let mut builder = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(prefix);
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            builder = builder.filename_suffix(ext);
        }
        if self.max_files > 0 {
            builder = builder.max_log_files(self.max_files);
        }
        Ok(builder.build(dir)?)
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> RuntimeResult<()> {
        let filter = self.build_filter();
        let span_events = fmt_span(self.span_events);

        macro_rules! text_layer {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events.clone())
                    .with_target(self.with_target)
                    .with_thread_ids(self.with_thread_ids)
                    .with_file(self.with_location)
                    .with_line_number(self.with_location)
            };
        }

        macro_rules! install {
            ($writer:expr) => {{
                let registry = tracing_subscriber::registry().with(filter);
                match self.format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => registry
                        .with(fmt::layer().json().with_span_events(span_events).with_writer($writer))
                        .try_init(),
                    #[cfg(feature = "json-log")]
                    LogFormat::Compact => registry
                        .with(text_layer!(fmt::layer().compact().with_writer($writer)))
                        .try_init(),
                    #[cfg(not(feature = "json-log"))]
                    LogFormat::Json | LogFormat::Compact => registry
                        .with(text_layer!(fmt::layer().compact().with_writer($writer)))
                        .try_init(),
                    LogFormat::Full => registry
                        .with(text_layer!(fmt::layer().with_writer($writer)))
                        .try_init(),
                    LogFormat::Pretty => registry
                        .with(text_layer!(fmt::layer().pretty().with_writer($writer)))
                        .try_init(),
                }
            }};
        }

        match self.output {
            LogOutput::Stdout => install!(std::io::stdout)?,
            LogOutput::Stderr => install!(std::io::stderr)?,
            LogOutput::File => {
                let appender = self.file_appender(self.file_path.as_ref())?;
                install!(appender)?;
                if self.file_path.is_none() {
                    warn!(path = DEFAULT_LOG_FILE, "No log file path configured, using default");
                }
            }
        }
        #[cfg(not(feature = "json-log"))]
        if self.format == LogFormat::Json {
            warn!("JSON logging needs the `json-log` feature, using compact");
        }
        Ok(())
    }
}
