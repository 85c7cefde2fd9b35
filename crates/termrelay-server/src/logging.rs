//! Logging configuration and initialization.
//!
//! Presets (production, verbose, debug, trace, quiet) pick a base filter over
//! the `termrelay::*` targets. `--log TARGET=LEVEL` overrides individual
//! targets, `RUST_LOG` replaces the whole filter, and output is either text
//! or JSON.

use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const TARGET_PREFIX: &str = "termrelay::";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

/// Logging preset levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Session lifecycle and startup only
    #[default]
    Production,
    /// Adds per-request and auth detail
    Verbose,
    /// Frame-level detail for troubleshooting
    Debug,
    /// Everything, including ssh handshake output
    Trace,
    /// Warnings and errors only
    Quiet,
}

/// Logging configuration built from CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Per-target level overrides (e.g., "termrelay::relay" -> DEBUG)
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Create a new LogConfig from CLI arguments.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        // "relay=debug,remote=trace" or "termrelay::relay=debug"
        let mut overrides = HashMap::new();
        for override_str in log_overrides {
            for part in override_str.split(',') {
                let Some((target, level_str)) = part.split_once('=') else {
                    continue;
                };
                let target = target.trim();
                let full_target = if target.starts_with(TARGET_PREFIX)
                    || target == "termrelay"
                    || target == "tower_http"
                {
                    target.to_string()
                } else {
                    format!("{}{}", TARGET_PREFIX, target)
                };

                if let Some(level) = parse_level(level_str.trim()) {
                    overrides.insert(full_target, level);
                }
            }
        }

        Self {
            preset,
            overrides,
            format,
        }
    }

    /// Build an EnvFilter from this configuration.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.directives().join(","))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn directives(&self) -> Vec<String> {
        let mut directives: Vec<String> = match self.preset {
            LogPreset::Production => vec![
                "termrelay::startup=info".into(),
                "termrelay::registry=info".into(),
                "termrelay::relay=info".into(),
                "termrelay::remote=info".into(),
                "termrelay::ws=info".into(),
                "termrelay::api=info".into(),
                "termrelay::auth=warn".into(),
                "termrelay::credentials=warn".into(),
                "tower_http=warn".into(),
            ],
            LogPreset::Verbose => vec!["termrelay=info".into(), "tower_http=info".into()],
            LogPreset::Debug => vec![
                "termrelay=debug".into(),
                "termrelay::remote=debug".into(),
                "tower_http=debug".into(),
            ],
            LogPreset::Trace => vec!["termrelay=trace".into(), "tower_http=trace".into()],
            LogPreset::Quiet => vec!["termrelay=warn".into(), "tower_http=error".into()],
        };

        for (target, level) in &self.overrides {
            directives.push(format!("{}={}", target, level_to_str(*level)));
        }
        directives
    }
}

/// Parse a level string (case-insensitive).
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Initialize the tracing subscriber with the given configuration.
pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_thread_ids(false))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }
}
