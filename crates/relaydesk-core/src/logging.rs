//! Structured logging setup for relaydesk.
//!
//! Uses `tracing` with `tracing-subscriber` for configurable log levels
//! and structured output. Supports JSON output for production environments.
//!
//! ## Environment Variables
//!
//! - `RELAYDESK_LOG` or `RUST_LOG`: log filter (e.g. `debug`, `relaydesk_core=debug,warp=warn`)
//! - `RELAYDESK_LOG_FORMAT`: output format (`pretty`, `compact`, `json`)
//!
//! ## Examples
//!
//! ```bash
//! # Debug logging for the core, warn for everything else
//! RELAYDESK_LOG=relaydesk_core=debug,warn relaydesk gateway
//!
//! # JSON output for production
//! RELAYDESK_LOG_FORMAT=json relaydesk gateway
//! ```

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

const DEFAULT_FILTER: &str = "relaydesk=info,relaydesk_core=info,warn";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable with colors and indentation
    #[default]
    Pretty,
    /// Compact single-line output
    Compact,
    /// JSON output for log aggregation
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively. Unknown names mean `Pretty`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive (e.g. "debug", "relaydesk_core=debug,warp=warn")
    pub filter: String,
    pub format: LogFormat,
    /// Emit span open/close events
    pub with_spans: bool,
    /// Include file/line in logs
    pub with_file: bool,
    pub with_thread_ids: bool,
    /// Include target (module path)
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Pretty,
            with_spans: false,
            with_file: false,
            with_thread_ids: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Read `RELAYDESK_LOG` / `RUST_LOG` and `RELAYDESK_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`LogConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup("RELAYDESK_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let format = lookup("RELAYDESK_LOG_FORMAT")
            .map(|s| LogFormat::parse(&s))
            .unwrap_or_default();

        Self {
            filter,
            format,
            ..Default::default()
        }
    }

    pub fn debug() -> Self {
        Self {
            filter: "relaydesk=debug,relaydesk_core=debug,info".to_string(),
            with_file: true,
            ..Default::default()
        }
    }

    /// JSON output with span events, for log aggregation.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            with_spans: true,
            with_target: true,
            ..Default::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. Later calls are ignored.
///
/// ```rust,ignore
/// use relaydesk_core::logging::{init, LogConfig};
///
/// init(LogConfig::from_env());
/// ```
pub fn init(config: LogConfig) {
    let env_filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let span_events = if config.with_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // stdout belongs to command output.
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_thread_ids(config.with_thread_ids)
        .with_target(config.with_target);

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(registry.with(layer.json())),
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(registry.with(layer.compact()))
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(registry.with(layer.pretty())),
    };
}

/// `init(LogConfig::from_env())`.
pub fn init_from_env() {
    init(LogConfig::from_env());
}
