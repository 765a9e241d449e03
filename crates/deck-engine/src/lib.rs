//! `deck-engine`
//!
//! The execution core: state stores, action dispatch, geometry and motion
//! planning, command implementations and the command executor.
//!
//! # Architecture
//!
//! ```text
//!  CommandCreate ──▶ ProtocolEngine ──▶ commands::execute ──▶ HardwareControl
//!                        │   ▲                 │
//!                        │   └── StateUpdate ──┘
//!                        ▼
//!                 ActionDispatcher ──▶ stores ──▶ plugins ──▶ broadcast
//! ```
//!
//! - [`state`]: per-domain stores, mutated only by [`Action`]s
//! - [`state_update`]: the mergeable patch every command returns
//! - [`geometry`]: read-only positions and motion plans over the stores
//! - [`commands`]: the closed command set and its implementations
//! - [`executor`]: [`ProtocolEngine`], the single run driver entry point
//!
//! # Example
//!
//! ```rust,ignore
//! let context = EngineContext::new(hardware, provider, EngineConfig::default());
//! let mut engine = ProtocolEngine::new(context, DeckConfiguration::Inferred).await?;
//! engine.add_command(serde_json::from_value(json!({
//!     "commandType": "home",
//!     "params": {}
//! }))?);
//! engine.play();
//! engine.run_until_idle().await;
//! let summary = engine.finish();
//! ```

/// Report a broken internal invariant: loud in debug builds, logged in release.
macro_rules! invariant_violation {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        debug_assert!(false, $($arg)*);
    }};
}

pub mod actions;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod geometry;
pub mod state;
pub mod state_update;
pub mod summary;

pub use actions::{Action, FailureTransition, PauseSource};
pub use commands::{
    Command, CommandCreate, CommandFailure, CommandRequest, CommandResult, CommandStatus,
    CommandSuccess,
};
pub use config::{EngineConfig, RecoveryPolicy};
pub use context::{EngineContext, MotionGuard};
pub use dispatcher::{ActionDispatcher, DeferredDispatch, DoorPausePlugin, Plugin};
pub use executor::{CommandOutcome, EngineClosed, EngineHandle, ProtocolEngine};
pub use geometry::{GeometryView, MotionPlan, MoveOptions};
pub use state::{DeckConfiguration, EngineState, RunStatus};
pub use state_update::StateUpdate;
pub use summary::RunSummary;
