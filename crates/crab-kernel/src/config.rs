//! Kernel configuration.

use crate::error::KernelError;
use crab_types::DEFAULT_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// How often in-flight requests are checked for expiry
    pub sweep_interval_ms: u64,
    /// Timeout for cross-resolving requests created without one
    pub default_cross_resolving_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            default_cross_resolving_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl KernelConfig {
    /// Create configuration from environment variables.
    ///
    /// - `CRAB_KERNEL_SWEEP_MS`: sweep interval (default: 1000)
    /// - `CRAB_CROSS_RESOLVING_TIMEOUT_MS`: cross-resolving timeout (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval_ms: env::var("CRAB_KERNEL_SWEEP_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_interval_ms),
            default_cross_resolving_timeout_ms: env::var("CRAB_CROSS_RESOLVING_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_cross_resolving_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        if self.sweep_interval_ms == 0 {
            return Err(KernelError::Config("sweep_interval_ms cannot be 0".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn default_cross_resolving_timeout(&self) -> Duration {
        Duration::from_millis(self.default_cross_resolving_timeout_ms)
    }
}
