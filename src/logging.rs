//! Logging Setup
//!
//! Turns the `[logging]` configuration section into a `tracing` subscriber.
//! `RUST_LOG` still wins over the configured level when set.

use crate::config::Config;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line human-readable output
    Pretty,
    /// Single-line, no colors
    Compact,
    /// Default `fmt` output with colors
    Console,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "console" => Ok(Self::Console),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Where log lines are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl LogSettings {
    /// Resolve settings from configuration
    ///
    /// `verbose` raises the level to at least DEBUG.
    pub fn from_config(config: &Config, verbose: bool) -> Result<Self> {
        let mut level = config.log_level()?;
        if verbose && level < Level::DEBUG {
            level = Level::DEBUG;
        }

        let format = config
            .logging
            .format
            .parse::<LogFormat>()
            .map_err(|e| anyhow::anyhow!(e))?;

        let output = match config.logging.output.to_lowercase().as_str() {
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            "file" => match config.logging.log_file.as_deref() {
                Some(path) if !path.is_empty() => LogOutput::File(PathBuf::from(path)),
                _ => anyhow::bail!("Log output is 'file' but no log_file is configured"),
            },
            other => anyhow::bail!("Invalid log output: {}", other),
        };

        Ok(Self {
            level,
            format,
            output,
        })
    }

    /// Keep stdout free for protocol traffic
    pub fn without_stdout(mut self) -> Self {
        if self.output == LogOutput::Stdout {
            self.output = LogOutput::Stderr;
        }
        self
    }

    /// Install the subscriber as the global default
    pub fn init(&self) -> Result<()> {
        self.build_subscriber()?
            .try_init()
            .context("Failed to install tracing subscriber")?;

        tracing::debug!(level = %self.level, format = ?self.format, output = ?self.output, "Logging initialized");
        Ok(())
    }

    /// Build the subscriber without installing it
    pub fn build_subscriber(&self) -> Result<impl Subscriber + Send + Sync + 'static> {
        let filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy();

        let (writer, ansi) = self.make_writer()?;

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_ansi(ansi)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
            LogFormat::Console => fmt::layer().with_writer(writer).with_ansi(ansi).boxed(),
        };

        Ok(tracing_subscriber::registry().with(layer).with(filter))
    }

    fn make_writer(&self) -> Result<(BoxMakeWriter, bool)> {
        Ok(match &self.output {
            LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
            LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
            LogOutput::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {:?}", path))?;
                (BoxMakeWriter::new(Mutex::new(file)), false)
            }
        })
    }
}
