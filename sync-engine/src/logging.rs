//! Logging setup for fleet services
//!
//! Services call one of the `init_*` functions once at startup. Library code
//! only emits `tracing` events and never installs a subscriber itself.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable selecting the logging mode
pub const LOG_MODE_ENV: &str = "FLEET_LOG_MODE";

/// Environment variable overriding the log filter
pub const LOG_LEVEL_ENV: &str = "FLEET_LOG_LEVEL";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with source locations
    Debug,
    /// One JSON object per line, for log shippers
    Json,
}

impl LoggingMode {
    /// Parse a mode name as used in `FLEET_LOG_MODE`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "silent" => Some(LoggingMode::Silent),
            "development" | "dev" => Some(LoggingMode::Development),
            "debug" => Some(LoggingMode::Debug),
            "json" => Some(LoggingMode::Json),
            _ => None,
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// # Environment Variables
///
/// - `FLEET_LOG_LEVEL`: Override the filter (e.g. `info,fleet_sync=debug`)
/// - `RUST_LOG`: Used when `FLEET_LOG_LEVEL` is not set
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact())
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Json => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(fmt::layer().json().with_current_span(false))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `FLEET_LOG_MODE`
///
/// Unset defaults to development output; an unrecognised value is an error.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(name) => LoggingMode::from_name(&name)
            .ok_or_else(|| LoggingError::InvalidEnv(format!("{LOG_MODE_ENV}={name}")))?,
        Err(_) => LoggingMode::Development,
    };

    init_logging(mode)
}

/// Create an environment filter with fallback to default level
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidEnv(format!("{directives}: {e}")))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
