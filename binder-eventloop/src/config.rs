//! Bridge tuning knobs.
//!
//! Loaded from a JSON document, either passed in directly or read from the
//! `BINDER_EVENTLOOP_CONFIG` environment variable:
//!
//! ```json
//! {
//!   "drain_budget": 64,
//!   "backlog_warn_threshold": 1024,
//!   "missed_ticks": "delay"
//! }
//! ```
//!
//! Every field is optional.

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::error::BridgeError;

/// Environment variable holding a JSON [`BridgeConfig`].
pub const CONFIG_ENV: &str = "BINDER_EVENTLOOP_CONFIG";

/// Default number of callbacks invoked per drain pass.
pub const DEFAULT_DRAIN_BUDGET: usize = 64;
/// Default in-flight backlog that triggers a warning.
pub const DEFAULT_BACKLOG_WARN_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Callbacks invoked back to back before the drain task yields to timers.
    pub drain_budget: usize,
    /// Posted-but-undrained callbacks above which a warning is logged. 0 disables it.
    pub backlog_warn_threshold: usize,
    /// What a repeating timer does after the host loop stalled past its deadline.
    pub missed_ticks: MissedTicks,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            drain_budget: DEFAULT_DRAIN_BUDGET,
            backlog_warn_threshold: DEFAULT_BACKLOG_WARN_THRESHOLD,
            missed_ticks: MissedTicks::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the configuration from [`CONFIG_ENV`], falling back to defaults when unset.
    pub fn from_env() -> Result<Self, BridgeError> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) if !json.trim().is_empty() => Self::from_json(&json),
            _ => Ok(Self::default()),
        }
    }

    /// Drain budget clamped to at least one callback per pass.
    pub(crate) fn effective_drain_budget(&self) -> usize {
        self.drain_budget.max(1)
    }
}

/// Catch-up policy for repeating timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedTicks {
    /// Fire every missed tick as fast as possible.
    Burst,
    /// Restart the interval from the late tick.
    #[default]
    Delay,
    /// Drop missed ticks and stay on the original schedule.
    Skip,
}

impl From<MissedTicks> for MissedTickBehavior {
    fn from(policy: MissedTicks) -> Self {
        match policy {
            MissedTicks::Burst => MissedTickBehavior::Burst,
            MissedTicks::Delay => MissedTickBehavior::Delay,
            MissedTicks::Skip => MissedTickBehavior::Skip,
        }
    }
}
