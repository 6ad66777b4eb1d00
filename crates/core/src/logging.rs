//! Structured logging infrastructure for block mesh nodes.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn filter_or(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use blockmesh_core::logging;
///
/// logging::init();
/// tracing::info!("Simulation started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter_or("info"))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output.
///
/// Suitable for feeding simulation logs into aggregation tooling.
/// Log level can be configured via the `RUST_LOG` environment variable.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter_or("info"))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize from a [`LoggingConfig`]. `RUST_LOG` still takes precedence.
///
/// Returns false if a global subscriber was already installed.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(filter_or(&config.level));
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .is_ok()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().is_ok()
    }
}

/// Idempotent initialization for tests; output goes through the test writer.
pub fn try_init() {
    let _ = tracing_subscriber::registry()
        .with(filter_or("warn"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
