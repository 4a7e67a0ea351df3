//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Pick the output format from configuration
//! - Let `RUST_LOG` override the configured filter
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Compact format by default, pretty format for development
//! - Library code never installs a subscriber; only binaries call `init_logging`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

/// A subscriber was already installed for this process.
#[derive(Debug, thiserror::Error)]
#[error("Logging already initialized: {0}")]
pub struct LoggingError(#[from] tracing_subscriber::util::TryInitError);

/// Build the level filter: `RUST_LOG` wins, then the configured directive.
pub fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let (compact, pretty) = match config.log_format {
        LogFormat::Compact => (Some(tracing_subscriber::fmt::layer().compact()), None),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer().pretty())),
    };

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(compact)
        .with(pretty)
        .try_init()?;

    Ok(())
}
