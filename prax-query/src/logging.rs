//! Logging bootstrap for the Prax document provider.
//!
//! Output is controlled by environment variables:
//!
//! - `PRAX_DEBUG=true|1|yes` - Enable debug logging
//! - `PRAX_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `PRAX_LOG_FORMAT=json|pretty|compact` - Set the output format (default: json)
//!
//! ```rust,no_run
//! use prax_query::logging;
//!
//! // Call once at startup; later calls are no-ops.
//! logging::init();
//! ```
//!
//! Inside the crates, use the standard tracing macros with structured fields:
//!
//! ```rust,ignore
//! debug!(collection = %collection, stages = pipeline.len(), "Executing query");
//! warn!(index = %name, "Vector index not defined in the model");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Targets that receive the configured level.
const TARGETS: &[&str] = &["prax_docdb", "prax_model", "prax_query", "prax_mongodb"];

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::Json,
        }
    }

    /// Name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        }
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level applied to every Prax target.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
    /// Whether anything asked for logging at all.
    pub requested: bool,
}

impl LogSettings {
    /// Read the settings from `PRAX_DEBUG`, `PRAX_LOG_LEVEL` and `PRAX_LOG_FORMAT`.
    pub fn from_env() -> Self {
        let level_var = env::var("PRAX_LOG_LEVEL").ok();
        Self {
            level: get_log_level(),
            format: env::var("PRAX_LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(LogFormat::Json),
            requested: is_debug_enabled() || level_var.is_some(),
        }
    }

    /// Filter directive covering every Prax target.
    pub fn directive(&self) -> String {
        TARGETS
            .iter()
            .map(|t| format!("{}={}", t, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Check if debug logging is enabled via `PRAX_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("PRAX_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Get the configured log level.
///
/// Defaults to "debug" if `PRAX_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("PRAX_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Initialize logging once from the environment.
///
/// Does nothing unless `PRAX_DEBUG` or `PRAX_LOG_LEVEL` is set, or when the
/// `tracing-subscriber` feature is disabled.
pub fn init() {
    INIT.call_once(|| {
        let settings = LogSettings::from_env();
        if !settings.requested {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(settings.directive())
                .unwrap_or_else(|_| EnvFilter::new("warn"));
            let registry = tracing_subscriber::registry().with(filter);

            let installed = match settings.format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = settings.level,
                    format = settings.format.as_str(),
                    "Prax logging initialized"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }

    #[test]
    fn test_directive_covers_all_targets() {
        let settings = LogSettings {
            level: "debug",
            format: LogFormat::Json,
            requested: true,
        };
        let directive = settings.directive();
        assert!(directive.contains("prax_query=debug"));
        assert!(directive.contains("prax_mongodb=debug"));
        assert_eq!(directive.split(',').count(), TARGETS.len());
    }
}
