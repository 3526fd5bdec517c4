//! Configuration Module
//!
//! Manager-wide settings for the cache.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default period between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted sweep interval (365 days). Timer deadlines are computed
/// by adding the interval to the current instant.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Cache manager configuration.
///
/// The sweep interval applies to every entry alike; individual policies cannot
/// shorten it. Lazy expiration on read covers the gap between sweeps.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Period between background sweeps of expired entries
    pub sweep_interval: Duration,
    /// Whether `dispose` drops every stored entry
    pub clear_on_dispose: bool,
}

impl CacheConfig {
    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets whether entries are cleared on dispose.
    pub fn with_clear_on_dispose(mut self, clear: bool) -> Self {
        self.clear_on_dispose = clear;
        self
    }

    /// Checks the configuration before a manager is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidArgument(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval > MAX_SWEEP_INTERVAL {
            return Err(CacheError::InvalidArgument(format!(
                "sweep interval must not exceed {:?}",
                MAX_SWEEP_INTERVAL
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            clear_on_dispose: true,
        }
    }
}
