//! Tunables for sessions and pre-key management.
//!
//! Both configs deserialize from any serde format, so an application can keep
//! them in its own settings file. Missing fields fall back to defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default forward gap tolerated within one receiving chain.
pub const DEFAULT_MAX_SKIP: u32 = 1000;

/// Default total number of cached skipped message keys.
pub const DEFAULT_MAX_SKIPPED_KEYS: usize = 2000;

/// Default number of retired remote ratchet keys remembered for replay
/// classification. Each costs 32 bytes in memory and in snapshots.
pub const DEFAULT_MAX_RETIRED_EPOCHS: usize = 1024;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest accepted gap between the expected and the received index in
    /// a single chain.
    pub max_skip: u32,
    /// Capacity of the skipped-key window across all epochs; the oldest entry
    /// is evicted first.
    pub max_skipped_keys: usize,
    /// How many past remote ratchet keys are remembered. A replay from an
    /// epoch older than this is still rejected, as `AuthenticationFailure`.
    pub max_retired_epochs: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skip: DEFAULT_MAX_SKIP,
            max_skipped_keys: DEFAULT_MAX_SKIPPED_KEYS,
            max_retired_epochs: DEFAULT_MAX_RETIRED_EPOCHS,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.max_skip = max_skip;
        self
    }

    #[must_use]
    pub fn with_max_skipped_keys(mut self, max_skipped_keys: usize) -> Self {
        self.max_skipped_keys = max_skipped_keys;
        self
    }

    #[must_use]
    pub fn with_max_retired_epochs(mut self, max_retired_epochs: usize) -> Self {
        self.max_retired_epochs = max_retired_epochs;
        self
    }

    /// Checks that the limits are usable.
    ///
    /// # Errors
    /// `Error::InvalidConfig` when the window could not hold a single gap.
    pub fn validate(&self) -> Result<()> {
        if self.max_skipped_keys == 0 {
            return Err(Error::InvalidConfig("max_skipped_keys must be non-zero"));
        }
        if usize::try_from(self.max_skip).map_or(true, |skip| skip > self.max_skipped_keys) {
            return Err(Error::InvalidConfig(
                "max_skip must not exceed max_skipped_keys",
            ));
        }
        Ok(())
    }
}

/// Pre-key lifecycle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreKeyConfig {
    /// Age after which the active signed pre-key is replaced.
    pub rotation_period: Duration,
    /// How long a superseded signed pre-key keeps answering handshakes.
    pub retention_period: Duration,
    /// Largest one-time pre-key batch accepted in one call.
    pub batch_limit: u32,
    /// Refuse to hand out bundles without a one-time pre-key.
    pub require_one_time_pre_key: bool,
}

impl Default for PreKeyConfig {
    fn default() -> Self {
        Self {
            rotation_period: DAY * 7,
            retention_period: DAY * 30,
            batch_limit: 1000,
            require_one_time_pre_key: false,
        }
    }
}

impl PreKeyConfig {
    #[must_use]
    pub fn with_rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = period;
        self
    }

    #[must_use]
    pub fn with_retention_period(mut self, period: Duration) -> Self {
        self.retention_period = period;
        self
    }

    #[must_use]
    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit;
        self
    }

    #[must_use]
    pub fn with_require_one_time_pre_key(mut self, require: bool) -> Self {
        self.require_one_time_pre_key = require;
        self
    }

    /// # Errors
    /// `Error::InvalidConfig` for a zero period or batch limit.
    pub fn validate(&self) -> Result<()> {
        if self.rotation_period.is_zero() {
            return Err(Error::InvalidConfig("rotation_period must be non-zero"));
        }
        if self.retention_period.is_zero() {
            return Err(Error::InvalidConfig("retention_period must be non-zero"));
        }
        if self.batch_limit == 0 {
            return Err(Error::InvalidConfig("batch_limit must be non-zero"));
        }
        Ok(())
    }
}
