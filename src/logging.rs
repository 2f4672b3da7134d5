//! Logging System
//!
//! Structured logging via the `tracing` crate. Deployment runs are driven
//! by an orchestrator, so everything goes to stderr; stdout is reserved for
//! command output.

use crate::error::{Result, SideloadError};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable overriding the log filter (tracing directive
/// syntax, e.g. `sideload=debug`).
pub const LOG_ENV_VAR: &str = "SIDELOAD_LOG";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    pub level: String,
    /// Output format: json, text
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Initialize the logging system.
///
/// Priority order: `SIDELOAD_LOG` environment variable, then the provided
/// config, then the default level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SideloadError::usage(format!("invalid log level {:?}: {e}", config.level)))?;

    let base = Registry::default().with(filter);
    match config.format.as_str() {
        "json" => {
            base.with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .init();
        }
        "text" => {
            base.with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .init();
        }
        other => {
            return Err(SideloadError::usage(format!(
                "unknown log format {other:?} (expected \"text\" or \"json\")"
            )))
        }
    }
    Ok(())
}
