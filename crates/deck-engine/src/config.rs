//! Engine tuning knobs, deserialised from the `[engine]` config section.

use deck_core::limits::{DEFAULT_ACTION_QUEUE_CAPACITY, DEFAULT_NOTIFICATION_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to the run after a non-fatal command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Fail the run
    #[default]
    Stop,
    /// Record the failure and carry on with the next command
    Continue,
    /// Wait in awaiting-recovery until the run driver resumes or stops
    Manual,
}

impl fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPolicy::Stop => write!(f, "stop"),
            RecoveryPolicy::Continue => write!(f, "continue"),
            RecoveryPolicy::Manual => write!(f, "manual"),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub recovery_policy: RecoveryPolicy,
    /// Accept module loads without matching attached hardware
    pub virtual_modules: bool,
    /// Buffered actions per notification subscriber
    pub notification_capacity: usize,
    /// Buffered actions from background tasks
    pub action_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recovery_policy: RecoveryPolicy::Stop,
            virtual_modules: false,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            action_queue_capacity: DEFAULT_ACTION_QUEUE_CAPACITY,
        }
    }
}
