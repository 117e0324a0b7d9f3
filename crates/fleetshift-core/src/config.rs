//! fleetshift.toml configuration parser.
//!
//! Every field is optional. Command-line flags override the file, and the
//! file overrides built-in defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, FleetResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetshiftConfig {
    pub rollout: Option<RolloutSettings>,
    pub checks: Option<CheckSettings>,
}

/// `[rollout]`: drain-and-wait timing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutSettings {
    pub timeout_secs: Option<u64>,
    pub sleep_secs: Option<u64>,
}

/// `[checks]`: deployment check polling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSettings {
    pub timeout_secs: Option<u64>,
    pub sleep_secs: Option<u64>,
    pub loadbalancer_consecutive_successes: Option<u32>,
    pub tasks_consecutive_successes: Option<u32>,
}

impl FleetshiftConfig {
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> FleetResult<Self> {
        toml::from_str(content).map_err(|e| FleetError::Config(e.to_string()))
    }

    /// Load `path` if given, otherwise an empty config.
    pub fn load(path: Option<&Path>) -> FleetResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn rollout(&self) -> RolloutSettings {
        self.rollout.clone().unwrap_or_default()
    }

    pub fn checks(&self) -> CheckSettings {
        self.checks.clone().unwrap_or_default()
    }
}
