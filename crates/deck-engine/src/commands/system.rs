//! Gantry homing and operator pauses.

use super::{
    hardware_error, CommandResult, CommandSuccess, ExecutionResult, HomeParams,
    WaitForResumeParams,
};
use crate::context::EngineContext;
use crate::state_update::StateUpdate;
use tracing::info;

pub(super) async fn home(params: &HomeParams, ctx: &EngineContext) -> ExecutionResult {
    let motion = ctx.motion().await;
    motion
        .home(params.axes.as_deref())
        .await
        .map_err(hardware_error)?;
    info!(axes = ?params.axes, "Homed");
    Ok(CommandSuccess::new(
        CommandResult::Empty {},
        StateUpdate::new().clear_pipette_locations(),
    ))
}

/// Completes immediately; the executor pauses the run afterwards.
pub(super) fn wait_for_resume(params: &WaitForResumeParams) -> ExecutionResult {
    info!(message = params.message.as_deref().unwrap_or(""), "Waiting for operator");
    Ok(CommandSuccess::new(CommandResult::Empty {}, StateUpdate::new()))
}
