//! Correlator configuration.

use crate::error::ChannelError;
use crab_types::DEFAULT_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default sweep tick in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Deadline applied by `request` when the caller gives none
    pub default_timeout_ms: u64,
    /// How often pending requests are checked for expiry
    pub sweep_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl ChannelConfig {
    /// Create configuration from environment variables.
    ///
    /// - `CRAB_CHANNEL_TIMEOUT_MS`: default request timeout (default: 1000)
    /// - `CRAB_CHANNEL_SWEEP_MS`: sweep interval (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout_ms: env::var("CRAB_CHANNEL_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_timeout_ms),
            sweep_interval_ms: env::var("CRAB_CHANNEL_SWEEP_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_interval_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        // A zero period would make tokio's interval panic
        if self.sweep_interval_ms == 0 {
            return Err(ChannelError::Config(
                "sweep_interval_ms cannot be 0".into(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
