//! Protocol engine: the command queue driver.
//!
//! The engine owns the authoritative [`EngineState`] and is the only thing
//! that dispatches actions into it. A run driver calls
//! [`ProtocolEngine::execute_next`] in a loop (or [`ProtocolEngine::run_until_idle`]);
//! each call runs at most one command to completion.
//!
//! # Concurrency
//!
//! Background tasks never touch state. They hold an [`EngineHandle`] and push
//! actions onto a bounded channel that the engine drains between commands.
//! A stop request is a `watch` flag raced against the running command: when
//! it fires, the in-flight implementation future is dropped, the hardware is
//! halted and the command is failed with `RunStopped`.
//!
//! ```text
//!  door watcher ─┐
//!  run driver ───┼──▶ mpsc<Action> ──▶ ┌────────────────┐ ──▶ broadcast<Action>
//!  EngineHandle ─┘                     │ ProtocolEngine │
//!                     watch<stop> ───▶ └────────────────┘
//! ```

use crate::actions::{Action, FailureTransition, PauseSource};
use crate::commands::{self, CommandCreate, Command, CommandFailure, CommandRequest};
use crate::config::RecoveryPolicy;
use crate::context::EngineContext;
use crate::dispatcher::{ActionDispatcher, DoorPausePlugin, Plugin};
use crate::state::{DeckConfiguration, EngineState, LabwareOffset, LabwareOffsetLocation, RunStatus};
use crate::state_update::StateUpdate;
use crate::summary::RunSummary;
use chrono::{DateTime, Utc};
use deck_core::definitions::LabwareUri;
use deck_core::error::{EngineError, EngineResult, ErrorKind, ErrorOccurrence};
use deck_core::types::Point;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one call to [`ProtocolEngine::execute_next`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A command ran and succeeded
    Succeeded { command_id: String },
    /// A command ran and failed
    Failed { command_id: String, kind: ErrorKind },
    /// The run is running but nothing is queued
    QueueEmpty,
    /// The run is not in a state that starts commands
    NotRunnable(RunStatus),
}

/// The engine has been dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Protocol engine is no longer running")]
pub struct EngineClosed;

/// Cloneable handle for tasks that run alongside the engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    actions: mpsc::Sender<Action>,
    stop: watch::Sender<bool>,
}

impl EngineHandle {
    /// Stop the run. Interrupts the running command, if any.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub async fn play(&self) -> Result<(), EngineClosed> {
        self.queue_action(Action::Play {
            requested_at: Utc::now(),
        })
        .await
    }

    pub async fn pause(&self) -> Result<(), EngineClosed> {
        self.queue_action(Action::Pause {
            source: PauseSource::Client,
        })
        .await
    }

    pub async fn resume_from_recovery(&self) -> Result<(), EngineClosed> {
        self.queue_action(Action::ResumeFromRecovery).await
    }

    /// Queue `action` for dispatch at the next command boundary.
    pub async fn queue_action(&self, action: Action) -> Result<(), EngineClosed> {
        self.actions.send(action).await.map_err(|_| EngineClosed)
    }
}

/// Resolves once the stop flag is set. Never resolves if the sender is gone.
async fn stop_requested(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Executes commands against the hardware, one at a time, in queue order.
pub struct ProtocolEngine {
    state: EngineState,
    dispatcher: ActionDispatcher,
    context: Arc<EngineContext>,
    handle: EngineHandle,
    actions_rx: mpsc::Receiver<Action>,
    stop_rx: watch::Receiver<bool>,
    created_at: DateTime<Utc>,
    background: Vec<JoinHandle<()>>,
}

impl ProtocolEngine {
    /// Build an engine over `context`, fetching the deck from its provider.
    ///
    /// Registers the door-pause plugin and, if the hardware has a door
    /// sensor, a watcher task that forwards door changes.
    pub async fn new(
        context: EngineContext,
        deck_configuration: DeckConfiguration,
    ) -> EngineResult<Self> {
        let deck = context.provider().deck_definition().await?;
        let config = context.config().clone();
        let (actions_tx, actions_rx) = mpsc::channel(config.action_queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut dispatcher = ActionDispatcher::new(config.notification_capacity);
        dispatcher.add_plugin(Box::new(DoorPausePlugin));

        info!(
            deck = %deck.id,
            recovery_policy = %config.recovery_policy,
            virtual_modules = config.virtual_modules,
            "Protocol engine created"
        );

        let mut engine = Self {
            state: EngineState::new(Arc::new(deck), deck_configuration),
            dispatcher,
            context: Arc::new(context),
            handle: EngineHandle {
                actions: actions_tx,
                stop: stop_tx,
            },
            actions_rx,
            stop_rx,
            created_at: Utc::now(),
            background: Vec::new(),
        };
        engine.spawn_door_watcher();
        Ok(engine)
    }

    fn spawn_door_watcher(&mut self) {
        let Some(mut door) = self.context.hardware().subscribe_door() else {
            return;
        };
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            loop {
                match door.recv().await {
                    Ok(state) => {
                        debug!(door = ?state, "Door sensor changed");
                        if handle.queue_action(Action::DoorChange { door: state }).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Door watcher lagged behind the sensor");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Door watcher finished");
        });
        self.background.push(task);
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Receive every action after it has been applied.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.dispatcher.subscribe()
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) {
        self.dispatcher.add_plugin(plugin);
    }

    fn dispatch(&mut self, action: Action) {
        self.dispatcher.dispatch(&mut self.state, action);
    }

    /// Append a command to the queue and return its id.
    pub fn add_command(&mut self, create: CommandCreate) -> String {
        let command_id = commands::new_id();
        debug!(command_id = %command_id, command_type = %create.request.command_type(), "Queued command");
        let command = Command::queued(command_id.clone(), create.key, create.request, Utc::now());
        self.dispatch(Action::QueueCommand { command });
        command_id
    }

    /// Register a calibration vector for `definition_uri` at `location`.
    pub fn add_labware_offset(
        &mut self,
        definition_uri: LabwareUri,
        location: LabwareOffsetLocation,
        vector: Point,
    ) -> LabwareOffset {
        let offset = LabwareOffset {
            id: commands::new_id(),
            definition_uri,
            location,
            vector,
            created_at: Utc::now(),
        };
        info!(offset_id = %offset.id, uri = %offset.definition_uri, "Added labware offset");
        self.dispatch(Action::AddLabwareOffset {
            offset: offset.clone(),
        });
        offset
    }

    pub fn play(&mut self) {
        self.dispatch(Action::Play {
            requested_at: Utc::now(),
        });
    }

    pub fn pause(&mut self) {
        self.dispatch(Action::Pause {
            source: PauseSource::Client,
        });
    }

    /// Skip the failed command and continue with the next one.
    pub fn resume_from_recovery(&mut self) {
        self.dispatch(Action::ResumeFromRecovery);
    }

    /// Stop the run. No further command starts.
    pub fn stop(&mut self) {
        self.handle.stop();
        self.dispatch(Action::Stop);
    }

    /// Apply everything background tasks queued, and honour a pending stop.
    fn drain_background(&mut self) {
        while let Ok(action) = self.actions_rx.try_recv() {
            self.dispatch(action);
        }
        if *self.stop_rx.borrow() && !self.state.commands().run_status().is_terminal() {
            info!("Stop requested; stopping run");
            self.dispatch(Action::Stop);
        }
    }

    /// Run the command at the head of the queue, if the run allows it.
    pub async fn execute_next(&mut self) -> CommandOutcome {
        self.drain_background();
        let status = self.state.commands().run_status();
        if status != RunStatus::Running {
            return CommandOutcome::NotRunnable(status);
        }
        let Some(command) = self.state.commands().next_queued() else {
            return CommandOutcome::QueueEmpty;
        };
        let command_id = command.id.clone();
        let request = command.request.clone();

        self.dispatch(Action::RunCommand {
            command_id: command_id.clone(),
            started_at: Utc::now(),
        });
        info!(command_id = %command_id, command_type = %request.command_type(), "Command started");

        let result = {
            let stop = stop_requested(self.stop_rx.clone());
            let execution = commands::execute(&request, &self.state, &self.context);
            tokio::select! {
                biased;
                _ = stop => None,
                result = execution => Some(result),
            }
        };

        match result {
            None => self.interrupt(command_id).await,
            Some(Ok(success)) => {
                info!(command_id = %command_id, command_type = %request.command_type(), "Command succeeded");
                self.dispatch(Action::SucceedCommand {
                    command_id: command_id.clone(),
                    result: success.result,
                    state_update: success.state_update,
                    completed_at: Utc::now(),
                });
                if request.pauses_run() {
                    info!(command_id = %command_id, "Pausing for operator");
                    self.dispatch(Action::Pause {
                        source: PauseSource::Protocol,
                    });
                }
                CommandOutcome::Succeeded { command_id }
            }
            Some(Err(failure)) => self.fail(command_id, &request, failure),
        }
    }

    /// The stop flag fired while a command was in flight.
    async fn interrupt(&mut self, command_id: String) -> CommandOutcome {
        warn!(command_id = %command_id, "Run stopped during command");
        if let Err(err) = self.context.hardware().halt().await {
            error!(error = %err, "Hardware halt failed");
        }
        self.dispatch(Action::Stop);
        let completed_at = Utc::now();
        self.dispatch(Action::FailCommand {
            command_id: command_id.clone(),
            error: ErrorOccurrence::from_error(&EngineError::RunStopped, completed_at),
            state_update: StateUpdate::new(),
            completed_at,
            transition: FailureTransition::FailRun,
        });
        CommandOutcome::Failed {
            command_id,
            kind: ErrorKind::Fatal,
        }
    }

    fn fail(
        &mut self,
        command_id: String,
        request: &CommandRequest,
        failure: CommandFailure,
    ) -> CommandOutcome {
        let CommandFailure {
            error: err,
            state_update,
        } = failure;
        let kind = err.kind();
        let policy = self.context.config().recovery_policy;
        let transition = match (kind, policy) {
            (ErrorKind::Fatal, _) | (_, RecoveryPolicy::Stop) => FailureTransition::FailRun,
            _ => FailureTransition::AwaitRecovery,
        };

        match kind {
            ErrorKind::Fatal => {
                error!(command_id = %command_id, command_type = %request.command_type(), error = %err, "Command failed fatally")
            }
            _ => {
                warn!(command_id = %command_id, command_type = %request.command_type(), kind = %kind, error = %err, "Command failed")
            }
        }

        // Validation failures never leave partial state behind.
        let state_update = if kind == ErrorKind::Validation && !state_update.is_empty() {
            invariant_violation!("validation failure of {} carried a state update", command_id);
            StateUpdate::new()
        } else {
            state_update
        };

        let completed_at = Utc::now();
        self.dispatch(Action::FailCommand {
            command_id: command_id.clone(),
            error: ErrorOccurrence::from_error(&err, completed_at),
            state_update,
            completed_at,
            transition,
        });
        if transition == FailureTransition::AwaitRecovery && policy == RecoveryPolicy::Continue {
            debug!(command_id = %command_id, "Continuing past failed command");
            self.dispatch(Action::ResumeFromRecovery);
        }
        CommandOutcome::Failed { command_id, kind }
    }

    /// Wait for a background action or a stop request.
    async fn wait_for_action(&mut self) -> bool {
        let stop = stop_requested(self.stop_rx.clone());
        let next = tokio::select! {
            action = self.actions_rx.recv() => Some(action),
            _ = stop => None,
        };
        match next {
            Some(Some(action)) => {
                self.dispatch(action);
                true
            }
            Some(None) => false,
            None => true,
        }
    }

    /// Execute commands until the queue is empty or the run ends.
    ///
    /// A paused run, or one awaiting recovery, waits here for an action from
    /// an [`EngineHandle`].
    pub async fn run_until_idle(&mut self) -> RunStatus {
        loop {
            match self.execute_next().await {
                CommandOutcome::Succeeded { .. } | CommandOutcome::Failed { .. } => {}
                CommandOutcome::QueueEmpty => break,
                CommandOutcome::NotRunnable(RunStatus::Paused | RunStatus::AwaitingRecovery) => {
                    if !self.wait_for_action().await {
                        break;
                    }
                }
                CommandOutcome::NotRunnable(_) => break,
            }
        }
        self.state.commands().run_status()
    }

    /// Mark the run finished and produce its summary.
    ///
    /// A run left awaiting recovery finishes as failed with the error of the
    /// command that put it there.
    pub fn finish(&mut self) -> RunSummary {
        self.drain_background();
        let error = self
            .state
            .commands()
            .failed_command()
            .and_then(|command| command.error.clone());
        self.dispatch(Action::Finish {
            error,
            completed_at: Utc::now(),
        });
        let summary = RunSummary::from_state(&self.state, self.created_at);
        let (succeeded, failed) = summary.counts();
        info!(status = %summary.status, succeeded, failed, "Run finished");
        summary
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("run_status", &self.state.commands().run_status())
            .field("dispatcher", &self.dispatcher)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
