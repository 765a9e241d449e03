//! Actions: the only way engine state changes.
//!
//! Every mutation of every store is the reaction to an [`Action`] fed through
//! the dispatcher. Actions are immutable once created; observers receive
//! clones on the notification channel.

use crate::commands::{Command, CommandResult};
use crate::state::labware::LabwareOffset;
use crate::state_update::{ModuleLoad, StateUpdate};
use chrono::{DateTime, Utc};
use deck_core::error::ErrorOccurrence;
use deck_core::hardware::DoorState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who asked for a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PauseSource {
    /// A client through the engine handle
    Client,
    /// A command that requires operator intervention
    Protocol,
    /// The front door was opened
    Door,
}

/// Run-level consequence of a failed command, decided by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Wait for the run driver to resume or stop
    AwaitRecovery,
    /// Fail the run; no further command starts
    FailRun,
}

/// Tagged union of everything that can happen to the engine.
#[derive(Debug, Clone)]
pub enum Action {
    /// Start or resume the run.
    Play { requested_at: DateTime<Utc> },
    /// Pause at the next command boundary.
    Pause { source: PauseSource },
    /// Stop the run; no further command starts.
    Stop,
    /// Leave the awaiting-recovery state and continue with the next command.
    ResumeFromRecovery,
    /// The run driver has no more commands to execute.
    Finish {
        error: Option<ErrorOccurrence>,
        completed_at: DateTime<Utc>,
    },
    /// Append a command to the queue.
    QueueCommand { command: Command },
    /// The head of the queue starts executing.
    RunCommand {
        command_id: String,
        started_at: DateTime<Utc>,
    },
    /// The running command completed.
    SucceedCommand {
        command_id: String,
        result: CommandResult,
        state_update: StateUpdate,
        completed_at: DateTime<Utc>,
    },
    /// The running command failed, possibly leaving a partial update behind.
    FailCommand {
        command_id: String,
        error: ErrorOccurrence,
        state_update: StateUpdate,
        completed_at: DateTime<Utc>,
        transition: FailureTransition,
    },
    /// Register a labware calibration offset.
    AddLabwareOffset { offset: LabwareOffset },
    /// A module was registered outside of a load command.
    AddModule { module: ModuleLoad },
    /// The door sensor changed.
    DoorChange { door: DoorState },
}

impl Action {
    /// State patch carried by the action, if any.
    pub fn state_update(&self) -> Option<&StateUpdate> {
        match self {
            Action::SucceedCommand { state_update, .. }
            | Action::FailCommand { state_update, .. } => Some(state_update),
            _ => None,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Play { .. } => "play",
            Action::Pause { .. } => "pause",
            Action::Stop => "stop",
            Action::ResumeFromRecovery => "resumeFromRecovery",
            Action::Finish { .. } => "finish",
            Action::QueueCommand { .. } => "queueCommand",
            Action::RunCommand { .. } => "runCommand",
            Action::SucceedCommand { .. } => "succeedCommand",
            Action::FailCommand { .. } => "failCommand",
            Action::AddLabwareOffset { .. } => "addLabwareOffset",
            Action::AddModule { .. } => "addModule",
            Action::DoorChange { .. } => "doorChange",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
