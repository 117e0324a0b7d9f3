//! Rollout timing configuration.

use std::time::Duration;

use fleetshift_core::PollConfig;
use fleetshift_core::config::RolloutSettings;

/// Timing for one cluster rollout.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RolloutConfig {
    /// Maximum seconds from rollout start until every old instance is drained.
    pub timeout_secs: u64,
    /// Seconds to sleep between drain checks.
    pub sleep_secs: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            sleep_secs: 10,
        }
    }
}

impl RolloutConfig {
    /// Defaults overlaid with `[rollout]` from the config file.
    pub fn from_settings(settings: &RolloutSettings) -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: settings.timeout_secs.unwrap_or(defaults.timeout_secs),
            sleep_secs: settings.sleep_secs.unwrap_or(defaults.sleep_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The drain wait polls once per iteration: a single drained
    /// observation ends it.
    pub fn drain_poll(&self) -> PollConfig {
        PollConfig::new(self.timeout_secs, 1, self.sleep_secs)
    }
}
