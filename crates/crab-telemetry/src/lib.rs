//! # Crab Telemetry
//!
//! Structured logging for processes hosting Crab channels and kernels.
//! Both sides log through `tracing`; this crate only installs a subscriber.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crab_telemetry::{init_logging, TelemetryConfig};
//!
//! init_logging(&TelemetryConfig::for_service("background-kernel"))?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CRAB_SERVICE_NAME` | `crab` | Service name on the startup event |
//! | `CRAB_LOG_LEVEL` / `RUST_LOG` | `info` | Filter directive |
//! | `CRAB_JSON_LOGS` | `false` | JSON lines output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install subscriber: {0}")]
    Init(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
