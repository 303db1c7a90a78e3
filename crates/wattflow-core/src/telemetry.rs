//! Logging infrastructure
//!
//! TigerStyle: Explicit telemetry configuration, initialized once per process.

use crate::error::{Error, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// Whether to output logs to stdout
    pub stdout_enabled: bool,
    /// Include the emitting module path in each line
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "wattflow".to_string(),
            log_level: "info".to_string(),
            stdout_enabled: true,
            with_target: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout logging
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `WATTFLOW_SERVICE_NAME`: Service name (default: "wattflow")
    /// - `WATTFLOW_LOG`: Log level filter (falls back to `RUST_LOG`, then "info")
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("WATTFLOW_SERVICE_NAME").unwrap_or_else(|_| "wattflow".to_string());

        let log_level = std::env::var("WATTFLOW_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Self {
            service_name,
            log_level,
            ..Default::default()
        }
    }
}

/// Guard returned by [`init_telemetry`]
///
/// Holds the service name for the shutdown log line.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Telemetry shut down");
    }
}

/// Initialize the global tracing subscriber
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.stdout_enabled {
        Some(tracing_subscriber::fmt::layer().with_target(config.with_target))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("failed to initialize tracing subscriber: {}", e)))?;

    tracing::info!(service = %config.service_name, level = %config.log_level, "Telemetry initialized");

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "wattflow");
        assert_eq!(config.log_level, "info");
        assert!(config.stdout_enabled);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("smartwatts")
            .with_log_level("debug")
            .without_stdout();
        assert_eq!(config.service_name, "smartwatts");
        assert_eq!(config.log_level, "debug");
        assert!(!config.stdout_enabled);
    }

    #[test]
    fn test_second_init_fails() {
        let first = init_telemetry(TelemetryConfig::default().without_stdout());
        let second = init_telemetry(TelemetryConfig::default().without_stdout());
        // Other tests in the binary may have installed a subscriber already,
        // so only the second call is guaranteed to fail.
        drop(first);
        assert!(second.is_err());
    }
}
