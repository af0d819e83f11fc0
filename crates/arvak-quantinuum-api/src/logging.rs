//! Log output setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events; binaries and test
//! harnesses call [`init_logging`] once to install a subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::{QuantinuumError, QuantinuumResult};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console output.
    #[default]
    Console,
    /// JSON structured logging.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Console,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `"info"`, `"arvak_quantinuum_api=debug"`).
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Console,
        }
    }
}

impl LoggingConfig {
    /// Create config from environment variables.
    ///
    /// - `RUST_LOG`: filter directive (default: `"info"`)
    /// - `ARVAK_LOG_FORMAT`: `"console"` or `"json"` (default: `"console"`)
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            filter: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            format: lookup("ARVAK_LOG_FORMAT").map_or(LogFormat::Console, |f| LogFormat::parse(&f)),
        }
    }
}

/// Install the global subscriber.
///
/// Fails when a global subscriber has already been set.
pub fn init_logging(config: &LoggingConfig) -> QuantinuumResult<()> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = match config.format {
        LogFormat::Console => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| QuantinuumError::Config(format!("Failed to initialise logging: {e}")))
}
