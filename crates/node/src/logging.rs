//! Tracing subscriber setup

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human readable, multi-line
    Pretty,
    /// One JSON object per event
    Json,
    /// Single-line text
    Compact,
}

impl LogFormat {
    /// Parse the `[logging] format` value, ignoring case
    pub fn from_config(format: &str) -> Result<Self> {
        match format.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(anyhow!("unknown log format: {other}")),
        }
    }
}

/// Filter directive for a configured level raised by `-v` flags
pub fn filter_directive(level: &str, verbose: u8) -> String {
    match verbose {
        0 => format!("{level},txflow={level}"),
        1 => format!("{level},txflow=debug"),
        2 => "debug,txflow=debug".to_string(),
        _ => "trace,txflow=trace".to_string(),
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`
/// and `verbose`.
pub fn init_tracing(level: &str, format: LogFormat, verbose: u8) -> Result<()> {
    let directive = filter_directive(level, verbose);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
