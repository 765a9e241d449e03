//! Action dispatch: stores first, then plugins, then observers.
//!
//! Dispatch is synchronous and never re-entrant. A plugin reacting to an
//! action cannot dispatch directly; it pushes follow-up actions onto a
//! [`DeferredDispatch`] that the dispatcher drains after the current turn,
//! once every store and plugin has seen the triggering action.

use crate::actions::{Action, PauseSource};
use crate::state::{EngineState, RunStatus};
use deck_core::hardware::DoorState;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Follow-up actions queued by plugins during one dispatch turn.
#[derive(Debug, Default)]
pub struct DeferredDispatch {
    actions: Vec<Action>,
}

impl DeferredDispatch {
    /// Queue `action` for dispatch after the current turn.
    pub fn dispatch(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Side-effect handler notified after every store has applied an action.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// React to `action`. `state` already reflects it.
    fn handle_action(&mut self, action: &Action, state: &EngineState, deferred: &mut DeferredDispatch);
}

/// Pauses a running run when the door opens.
#[derive(Debug, Default)]
pub struct DoorPausePlugin;

impl Plugin for DoorPausePlugin {
    fn name(&self) -> &str {
        "door-pause"
    }

    fn handle_action(&mut self, action: &Action, state: &EngineState, deferred: &mut DeferredDispatch) {
        if let Action::DoorChange {
            door: DoorState::Open,
        } = action
        {
            if state.commands().run_status() == RunStatus::Running {
                info!("Door opened; pausing run");
                deferred.dispatch(Action::Pause {
                    source: PauseSource::Door,
                });
            }
        }
    }
}

/// Routes actions to stores, plugins and the notification channel.
pub struct ActionDispatcher {
    plugins: Vec<Box<dyn Plugin>>,
    notifier: broadcast::Sender<Action>,
}

impl ActionDispatcher {
    pub fn new(notification_capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            plugins: Vec::new(),
            notifier,
        }
    }

    /// Register a plugin. Plugins run in registration order.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) {
        debug!(plugin = plugin.name(), "Registered plugin");
        self.plugins.push(plugin);
    }

    /// Receive a clone of every action after it has been applied.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.notifier.subscribe()
    }

    /// Apply `action` and every follow-up it triggers, in order.
    pub fn dispatch(&mut self, state: &mut EngineState, action: Action) {
        let mut pending = VecDeque::from([action]);
        while let Some(action) = pending.pop_front() {
            debug!(action = %action, "Dispatching action");
            state.apply(&action);

            let mut deferred = DeferredDispatch::default();
            for plugin in &mut self.plugins {
                plugin.handle_action(&action, state, &mut deferred);
            }

            // No receivers is fine; observers are optional.
            let _ = self.notifier.send(action);
            pending.extend(deferred.actions);
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("ActionDispatcher")
            .field("plugins", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeckConfiguration;
    use chrono::Utc;
    use deck_core::definitions::DeckDefinition;
    use std::sync::{Arc, Mutex};

    fn empty_state() -> EngineState {
        let deck = DeckDefinition {
            id: "empty".into(),
            cutouts: Vec::new(),
            addressable_areas: Vec::new(),
            cutout_fixtures: Vec::new(),
        };
        EngineState::new(Arc::new(deck), DeckConfiguration::Inferred)
    }

    /// Records the run status it observes for each action.
    struct Recorder {
        seen: Arc<Mutex<Vec<(String, RunStatus)>>>,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn handle_action(&mut self, action: &Action, state: &EngineState, _: &mut DeferredDispatch) {
            self.seen
                .lock()
                .unwrap()
                .push((action.name().to_string(), state.commands().run_status()));
        }
    }

    #[test]
    fn door_open_pauses_after_current_turn() {
        let mut state = empty_state();
        let mut dispatcher = ActionDispatcher::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_plugin(Box::new(DoorPausePlugin));
        dispatcher.add_plugin(Box::new(Recorder { seen: seen.clone() }));
        let mut observer = dispatcher.subscribe();

        dispatcher.dispatch(&mut state, Action::Play { requested_at: Utc::now() });
        dispatcher.dispatch(&mut state, Action::DoorChange { door: DoorState::Open });

        assert_eq!(state.commands().run_status(), RunStatus::Paused);
        // The recorder saw the door change while still running, then the deferred pause.
        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("play".to_string(), RunStatus::Running),
                ("doorChange".to_string(), RunStatus::Running),
                ("pause".to_string(), RunStatus::Paused),
            ]
        );

        let names: Vec<&str> = std::iter::from_fn(|| observer.try_recv().ok())
            .map(|a| a.name())
            .collect();
        assert_eq!(names, vec!["play", "doorChange", "pause"]);
    }

    #[test]
    fn door_open_while_idle_does_nothing() {
        let mut state = empty_state();
        let mut dispatcher = ActionDispatcher::new(16);
        dispatcher.add_plugin(Box::new(DoorPausePlugin));
        dispatcher.dispatch(&mut state, Action::DoorChange { door: DoorState::Open });
        assert_eq!(state.commands().run_status(), RunStatus::Idle);
        assert_eq!(state.commands().door(), DoorState::Open);
    }
}
