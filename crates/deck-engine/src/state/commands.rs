//! Command queue, command records and run status.
//!
//! # Run status
//!
//! ```text
//! ┌──────┐  play   ┌─────────┐  non-fatal failure  ┌──────────────────┐
//! │ Idle │────────▶│ Running │────────────────────▶│ AwaitingRecovery │
//! └──────┘         └─────────┘◀────────────────────└──────────────────┘
//!                   │  ▲    │        resume
//!             pause │  │play│ stop / fatal failure / finish
//!                   ▼  │    ▼
//!               ┌────────┐  ┌──────────────────────────────┐
//!               │ Paused │  │ Stopped | Failed | Succeeded │
//!               └────────┘  └──────────────────────────────┘
//! ```
//!
//! Command status only moves forward: `queued -> running -> succeeded|failed`.

use super::StateStore;
use crate::actions::{Action, FailureTransition};
use crate::commands::{Command, CommandStatus};
use chrono::{DateTime, Utc};
use deck_core::error::{EngineError, EngineResult, ErrorOccurrence};
use deck_core::hardware::DoorState;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Status of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// Created, never played
    Idle,
    /// Commands are executing
    Running,
    /// Paused at a command boundary
    Paused,
    /// A command failed; the run driver decides what happens next
    AwaitingRecovery,
    /// Stopped on request
    Stopped,
    /// Stopped by an unrecoverable failure
    Failed,
    /// Finished without failure
    Succeeded,
}

impl RunStatus {
    /// Whether no further command will ever run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Stopped | RunStatus::Failed | RunStatus::Succeeded
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::AwaitingRecovery => write!(f, "awaiting-recovery"),
            RunStatus::Stopped => write!(f, "stopped"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Succeeded => write!(f, "succeeded"),
        }
    }
}

/// Owns every command record and the run status.
#[derive(Debug)]
pub struct CommandStore {
    commands: HashMap<String, Command>,
    /// Command ids in queueing order
    order: Vec<String>,
    queue: VecDeque<String>,
    running: Option<String>,
    run_status: RunStatus,
    door: DoorState,
    failed_command: Option<String>,
    run_errors: Vec<ErrorOccurrence>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Default for CommandStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandStore {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            order: Vec::new(),
            queue: VecDeque::new(),
            running: None,
            run_status: RunStatus::Idle,
            door: DoorState::Closed,
            failed_command: None,
            run_errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Look up a command by id.
    pub fn get(&self, command_id: &str) -> EngineResult<&Command> {
        self.commands
            .get(command_id)
            .ok_or_else(|| EngineError::CommandNotFound(command_id.to_string()))
    }

    /// Every command in queueing order.
    pub fn all(&self) -> impl Iterator<Item = &Command> {
        self.order.iter().filter_map(|id| self.commands.get(id))
    }

    /// Head of the queue.
    pub fn next_queued(&self) -> Option<&Command> {
        self.queue.front().and_then(|id| self.commands.get(id))
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn running(&self) -> Option<&Command> {
        self.running.as_ref().and_then(|id| self.commands.get(id))
    }

    pub fn run_status(&self) -> RunStatus {
        self.run_status
    }

    pub fn door(&self) -> DoorState {
        self.door
    }

    /// Command whose failure put the run into recovery.
    pub fn failed_command(&self) -> Option<&Command> {
        self.failed_command
            .as_ref()
            .and_then(|id| self.commands.get(id))
    }

    /// Errors that ended or interrupted the run.
    pub fn run_errors(&self) -> &[ErrorOccurrence] {
        &self.run_errors
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn set_status(&mut self, status: RunStatus) {
        if self.run_status != status {
            debug!(from = %self.run_status, to = %status, "Run status changed");
            self.run_status = status;
        }
    }

    fn complete_running(&mut self, command_id: &str) -> Option<&mut Command> {
        if self.running.as_deref() != Some(command_id) {
            invariant_violation!("command {} completed but is not running", command_id);
            return None;
        }
        self.running = None;
        let command = self.commands.get_mut(command_id)?;
        if command.status != CommandStatus::Running {
            invariant_violation!(
                "command {} completed from status {:?}",
                command_id,
                command.status
            );
            return None;
        }
        Some(command)
    }
}

impl StateStore for CommandStore {
    fn handle_action(&mut self, action: &Action) {
        match action {
            Action::Play { requested_at } => match self.run_status {
                RunStatus::Idle | RunStatus::Paused => {
                    if self.door == DoorState::Open {
                        warn!("Play requested with the door open; run stays paused");
                        self.set_status(RunStatus::Paused);
                    } else {
                        self.started_at.get_or_insert(*requested_at);
                        self.set_status(RunStatus::Running);
                    }
                }
                _ => {}
            },
            Action::Pause { .. } => {
                if self.run_status == RunStatus::Running {
                    self.set_status(RunStatus::Paused);
                }
            }
            Action::Stop => {
                if !self.run_status.is_terminal() {
                    self.set_status(RunStatus::Stopped);
                }
            }
            Action::ResumeFromRecovery => {
                if self.run_status == RunStatus::AwaitingRecovery {
                    self.failed_command = None;
                    self.set_status(RunStatus::Running);
                }
            }
            Action::Finish {
                error,
                completed_at,
            } => {
                if let Some(error) = error {
                    self.run_errors.push(error.clone());
                }
                if !self.run_status.is_terminal() {
                    let status = if error.is_some() {
                        RunStatus::Failed
                    } else {
                        RunStatus::Succeeded
                    };
                    self.set_status(status);
                }
                self.completed_at.get_or_insert(*completed_at);
            }
            Action::QueueCommand { command } => {
                if self.commands.contains_key(&command.id) {
                    invariant_violation!("command {} queued twice", command.id);
                    return;
                }
                self.order.push(command.id.clone());
                self.queue.push_back(command.id.clone());
                self.commands.insert(command.id.clone(), command.clone());
            }
            Action::RunCommand {
                command_id,
                started_at,
            } => {
                if self.queue.front() != Some(command_id) {
                    invariant_violation!("command {} is not at the head of the queue", command_id);
                    return;
                }
                self.queue.pop_front();
                if let Some(command) = self.commands.get_mut(command_id) {
                    command.status = CommandStatus::Running;
                    command.started_at = Some(*started_at);
                    self.running = Some(command_id.clone());
                }
            }
            Action::SucceedCommand {
                command_id,
                result,
                completed_at,
                ..
            } => {
                if let Some(command) = self.complete_running(command_id) {
                    command.status = CommandStatus::Succeeded;
                    command.result = Some(result.clone());
                    command.completed_at = Some(*completed_at);
                }
            }
            Action::FailCommand {
                command_id,
                error,
                completed_at,
                transition,
                ..
            } => {
                if let Some(command) = self.complete_running(command_id) {
                    command.status = CommandStatus::Failed;
                    command.error = Some(error.clone());
                    command.completed_at = Some(*completed_at);
                }
                match transition {
                    FailureTransition::FailRun => {
                        self.run_errors.push(error.clone());
                        if !self.run_status.is_terminal() {
                            self.set_status(RunStatus::Failed);
                        }
                    }
                    FailureTransition::AwaitRecovery => {
                        if matches!(self.run_status, RunStatus::Running | RunStatus::Paused) {
                            self.failed_command = Some(command_id.clone());
                            self.set_status(RunStatus::AwaitingRecovery);
                        }
                    }
                }
            }
            Action::DoorChange { door } => {
                self.door = *door;
            }
            Action::AddLabwareOffset { .. } | Action::AddModule { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandRequest, CommandResult, HomeParams};
    use crate::state_update::StateUpdate;

    fn queued(id: &str) -> Command {
        Command::queued(
            id.to_string(),
            None,
            CommandRequest::Home(HomeParams::default()),
            Utc::now(),
        )
    }

    fn run(store: &mut CommandStore, id: &str) {
        store.handle_action(&Action::RunCommand {
            command_id: id.into(),
            started_at: Utc::now(),
        });
    }

    #[test]
    fn commands_run_in_fifo_order() {
        let mut store = CommandStore::new();
        store.handle_action(&Action::QueueCommand { command: queued("a") });
        store.handle_action(&Action::QueueCommand { command: queued("b") });
        assert_eq!(store.next_queued().map(|c| c.id.as_str()), Some("a"));

        run(&mut store, "a");
        assert_eq!(store.running().map(|c| c.id.as_str()), Some("a"));
        store.handle_action(&Action::SucceedCommand {
            command_id: "a".into(),
            result: CommandResult::Empty {},
            state_update: StateUpdate::new(),
            completed_at: Utc::now(),
        });

        assert_eq!(store.get("a").map(|c| c.status).ok(), Some(CommandStatus::Succeeded));
        assert_eq!(store.next_queued().map(|c| c.id.as_str()), Some("b"));
    }

    #[test]
    fn play_with_door_open_stays_paused() {
        let mut store = CommandStore::new();
        store.handle_action(&Action::DoorChange {
            door: DoorState::Open,
        });
        store.handle_action(&Action::Play {
            requested_at: Utc::now(),
        });
        assert_eq!(store.run_status(), RunStatus::Paused);

        store.handle_action(&Action::DoorChange {
            door: DoorState::Closed,
        });
        store.handle_action(&Action::Play {
            requested_at: Utc::now(),
        });
        assert_eq!(store.run_status(), RunStatus::Running);
    }

    #[test]
    fn stopped_run_is_not_overridden_by_failure() {
        let mut store = CommandStore::new();
        store.handle_action(&Action::Play {
            requested_at: Utc::now(),
        });
        store.handle_action(&Action::QueueCommand { command: queued("a") });
        run(&mut store, "a");
        store.handle_action(&Action::Stop);
        let error = ErrorOccurrence::from_error(&EngineError::RunStopped, Utc::now());
        store.handle_action(&Action::FailCommand {
            command_id: "a".into(),
            error,
            state_update: StateUpdate::new(),
            completed_at: Utc::now(),
            transition: FailureTransition::FailRun,
        });
        assert_eq!(store.run_status(), RunStatus::Stopped);
        assert_eq!(store.get("a").map(|c| c.status).ok(), Some(CommandStatus::Failed));
    }

    #[test]
    fn unknown_command_is_not_found() {
        let store = CommandStore::new();
        assert!(matches!(
            store.get("missing"),
            Err(EngineError::CommandNotFound(_))
        ));
    }
}
