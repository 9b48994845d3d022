//! Telemetry configuration from environment variables.

use std::env;

/// Logging setup for a process hosting channels or kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Recorded on the startup event so mixed logs can be told apart
    pub service_name: String,

    /// Filter directive (`info`, `crab_kernel=debug`, ...)
    pub log_level: String,

    /// JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "crab".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `CRAB_SERVICE_NAME`: service name (default: crab)
    /// - `CRAB_LOG_LEVEL` or `RUST_LOG`: filter directive (default: info)
    /// - `CRAB_JSON_LOGS`: JSON output (default: false)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("CRAB_SERVICE_NAME").unwrap_or_else(|_| "crab".to_string()),

            log_level: env::var("CRAB_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("CRAB_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Configuration for a named service, other fields from the environment.
    pub fn for_service(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            ..Self::from_env()
        }
    }
}
