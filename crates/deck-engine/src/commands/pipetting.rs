//! Pipette commands: loading, tips, liquid handling and pipette moves.
//!
//! Every check that can reject a command runs before the motion lock is
//! taken, so a validation failure never reaches the hardware.

use super::{
    hardware_error, new_id, AspirateParams, CommandFailure, CommandResult, CommandSuccess,
    DispenseParams, DropTipInPlaceParams, DropTipParams, ExecutionResult, LiquidProbeParams,
    LoadPipetteParams, MoveToAddressableAreaParams, MoveToWellParams, PickUpTipParams,
};
use crate::context::{EngineContext, MotionGuard};
use crate::geometry::MoveOptions;
use crate::state::{EngineState, LoadedPipette};
use crate::state_update::{PipetteLoad, StateUpdate};
use deck_core::definitions::WellShape;
use deck_core::error::{EngineError, EngineResult};
use deck_core::hardware::HardwareError;
use deck_core::limits::VOLUME_TOLERANCE;
use deck_core::types::{point, PipetteLocation, Point, TipGeometry, TipPresence, WellLocation};
use tracing::{debug, info, warn};

fn well_location(labware_id: &str, well_name: &str) -> PipetteLocation {
    PipetteLocation::Well {
        labware_id: labware_id.to_string(),
        well_name: well_name.to_string(),
    }
}

/// Fail when labware sits on a module that currently blocks pipetting.
fn ensure_pipette_access(state: &EngineState, labware_id: &str) -> EngineResult<()> {
    let location = state.labware().location(labware_id)?;
    if let Some(module) = state.geometry().module_under(location)? {
        state.modules().ensure_labware_accessible(&module.id, false)?;
    }
    Ok(())
}

/// Plan and execute a move of `pipette` to a well; returns where it ended up.
async fn move_to_well_position(
    motion: &MotionGuard<'_>,
    state: &EngineState,
    pipette: &LoadedPipette,
    labware_id: &str,
    well_name: &str,
    well_location: &WellLocation,
    options: MoveOptions,
) -> EngineResult<Point> {
    let geometry = state.geometry();
    let mount = pipette.mount.to_mount();
    let critical_point = geometry.critical_point_for(&pipette.id)?;
    let origin = motion
        .gantry_position(mount, critical_point)
        .await
        .map_err(hardware_error)?;
    let plan = geometry.plan_to_well(
        &pipette.id,
        origin,
        labware_id,
        well_name,
        well_location,
        options,
    )?;
    debug!(pipette_id = %pipette.id, kind = ?plan.kind, waypoints = plan.waypoints.len(), "Planned move to well");
    motion
        .execute_plan(mount, &plan, None)
        .await
        .map_err(hardware_error)?;
    Ok(plan.destination().unwrap_or(origin))
}

pub(super) async fn load_pipette(
    params: &LoadPipetteParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette_id = params.pipette_id.clone().unwrap_or_else(new_id);
    if let Some(existing) = state.pipettes().on_mount(params.mount) {
        if existing.id != pipette_id {
            return Err(EngineError::MountOccupied {
                mount: params.mount,
                pipette_id: existing.id.clone(),
            }
            .into());
        }
    }
    for rack_id in &params.tip_rack_ids {
        if !state.labware().definition(rack_id)?.is_tiprack() {
            return Err(EngineError::LabwareIsNotTipRack(rack_id.clone()).into());
        }
    }

    let config = {
        let _scan = ctx.scan().await;
        ctx.hardware()
            .cache_instrument(params.mount, &params.pipette_name)
            .await?
    };

    info!(pipette_id = %pipette_id, mount = %params.mount, model = %config.model, "Loaded pipette");
    let update = StateUpdate::new().load_pipette(PipetteLoad {
        pipette_id: pipette_id.clone(),
        mount: params.mount,
        config,
        tip_rack_ids: params.tip_rack_ids.clone(),
    });
    Ok(CommandSuccess::new(
        CommandResult::LoadPipette { pipette_id },
        update,
    ))
}

/// Rack and well a pick-up uses. A well name without a labware id is ignored.
fn resolve_tip_source(
    state: &EngineState,
    pipette: &LoadedPipette,
    params: &PickUpTipParams,
) -> EngineResult<(String, String)> {
    let channels = pipette.config.channels;
    match (&params.labware_id, &params.well_name) {
        (Some(labware_id), Some(well_name)) => Ok((labware_id.clone(), well_name.clone())),
        (Some(labware_id), None) => state
            .tips()
            .next_tip(labware_id, channels)?
            .map(|well_name| (labware_id.clone(), well_name))
            .ok_or_else(|| EngineError::NoTipsAvailable(labware_id.clone())),
        (None, _) => {
            for rack_id in &pipette.tip_rack_ids {
                if let Some(well_name) = state.tips().next_tip(rack_id, channels)? {
                    return Ok((rack_id.clone(), well_name));
                }
            }
            Err(EngineError::NoTipsAvailable(pipette.id.clone()))
        }
    }
}

pub(super) async fn pick_up_tip(
    params: &PickUpTipParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.pipettes().ensure_no_tip(&pipette.id)?;
    let (labware_id, well_name) = resolve_tip_source(state, pipette, params)?;
    let wells = state
        .tips()
        .wells_for_pickup(&labware_id, &well_name, pipette.config.channels)?;
    ensure_pipette_access(state, &labware_id)?;

    let definition = state.labware().definition(&labware_id)?;
    let well = state.labware().well(&labware_id, &well_name)?;
    let diameter = match well.shape {
        WellShape::Circular { diameter } => diameter,
        WellShape::Rectangular { x_dimension, .. } => x_dimension,
    };
    let tip = TipGeometry {
        length: definition.parameters.tip_length.unwrap_or(well.depth) - pipette.config.tip_overlap,
        diameter,
        volume: well.total_liquid_volume,
    };

    let mount = pipette.mount;
    let motion = ctx.motion().await;
    let position = move_to_well_position(
        &motion,
        state,
        pipette,
        &labware_id,
        &well_name,
        &params.well_location,
        MoveOptions::default(),
    )
    .await?;
    motion
        .pick_up_tip(mount, tip.length)
        .await
        .map_err(hardware_error)?;

    // The wells are consumed whether or not the tip stayed on.
    let located = StateUpdate::new()
        .set_pipette_location(&pipette.id, well_location(&labware_id, &well_name))
        .mark_tips_used(&labware_id, wells);
    if motion.tip_presence(mount).await.map_err(hardware_error)? == TipPresence::Absent {
        warn!(pipette_id = %pipette.id, labware_id = %labware_id, well_name = %well_name, "No tip detected after pick-up");
        return Err(CommandFailure::with_update(
            EngineError::TipPhysicallyMissing(pipette.id.clone()),
            located,
        ));
    }

    let update = located
        .set_tip(&pipette.id, Some(tip))
        .set_volume(&pipette.id, 0.0)
        .set_ready_to_aspirate(&pipette.id, false);
    Ok(CommandSuccess::new(
        CommandResult::PickUpTip {
            tip_volume: tip.volume,
            tip_length: tip.length,
            position,
        },
        update,
    ))
}

/// Read the tip sensor after an ejection and report the outcome.
async fn confirm_drop(
    motion: &MotionGuard<'_>,
    pipette: &LoadedPipette,
    update: StateUpdate,
    position: Point,
) -> ExecutionResult {
    let presence = motion
        .tip_presence(pipette.mount)
        .await
        .map_err(hardware_error)?;
    if presence == TipPresence::Present {
        warn!(pipette_id = %pipette.id, "Tip still attached after drop");
        return Err(CommandFailure::with_update(
            EngineError::TipPhysicallyAttached(pipette.id.clone()),
            update.set_volume_unknown(&pipette.id),
        ));
    }
    let update = update
        .set_tip(&pipette.id, None)
        .set_volume_unknown(&pipette.id)
        .set_ready_to_aspirate(&pipette.id, false);
    Ok(CommandSuccess::new(CommandResult::Position { position }, update))
}

pub(super) async fn drop_tip(
    params: &DropTipParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.pipettes().attached_tip(&pipette.id)?;
    state.labware().well(&params.labware_id, &params.well_name)?;
    ensure_pipette_access(state, &params.labware_id)?;

    let motion = ctx.motion().await;
    let position = move_to_well_position(
        &motion,
        state,
        pipette,
        &params.labware_id,
        &params.well_name,
        &params.well_location,
        MoveOptions::default(),
    )
    .await?;
    motion
        .drop_tip(pipette.mount, params.home_after)
        .await
        .map_err(hardware_error)?;

    let update = if params.home_after {
        StateUpdate::new().clear_pipette_locations()
    } else {
        StateUpdate::new()
            .set_pipette_location(&pipette.id, well_location(&params.labware_id, &params.well_name))
    };
    confirm_drop(&motion, pipette, update, position).await
}

pub(super) async fn drop_tip_in_place(
    params: &DropTipInPlaceParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.pipettes().attached_tip(&pipette.id)?;
    let critical_point = state.geometry().critical_point_for(&pipette.id)?;

    let motion = ctx.motion().await;
    let position = motion
        .gantry_position(pipette.mount.to_mount(), critical_point)
        .await
        .map_err(hardware_error)?;
    motion
        .drop_tip(pipette.mount, params.home_after)
        .await
        .map_err(hardware_error)?;

    let update = if params.home_after {
        StateUpdate::new().clear_pipette_locations()
    } else {
        StateUpdate::new()
    };
    confirm_drop(&motion, pipette, update, position).await
}

pub(super) async fn aspirate(
    params: &AspirateParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.pipettes().attached_tip(&pipette.id)?;
    let current = state.pipettes().known_volume(&pipette.id)?;
    let max = pipette.working_volume();
    if params.volume <= 0.0 || current + params.volume > max + VOLUME_TOLERANCE {
        return Err(EngineError::InvalidAspirateVolume {
            requested: params.volume,
            current,
            max,
        }
        .into());
    }
    // Only an empty plunger can be re-seated at the bottom without expelling liquid.
    if !pipette.ready_to_aspirate && current > VOLUME_TOLERANCE {
        return Err(EngineError::PipetteNotReadyToAspirate(pipette.id.clone()).into());
    }
    state.labware().well(&params.labware_id, &params.well_name)?;
    ensure_pipette_access(state, &params.labware_id)?;
    let flow_rate = params
        .flow_rate
        .unwrap_or(pipette.config.default_flow_rates.aspirate);

    let motion = ctx.motion().await;
    // An empty plunger is bottomed out above the liquid before it goes in.
    let prepare = !pipette.ready_to_aspirate;
    if prepare {
        move_to_well_position(
            &motion,
            state,
            pipette,
            &params.labware_id,
            &params.well_name,
            &WellLocation::top(0.0),
            MoveOptions::default(),
        )
        .await?;
        motion
            .prepare_for_aspirate(pipette.mount)
            .await
            .map_err(hardware_error)?;
    }
    let position = move_to_well_position(
        &motion,
        state,
        pipette,
        &params.labware_id,
        &params.well_name,
        &params.well_location,
        MoveOptions {
            force_direct: prepare,
            ..MoveOptions::default()
        },
    )
    .await?;

    let located = StateUpdate::new()
        .set_pipette_location(&pipette.id, well_location(&params.labware_id, &params.well_name));
    match motion.aspirate(pipette.mount, params.volume, flow_rate).await {
        Ok(()) => {
            let volume = current + params.volume;
            debug!(pipette_id = %pipette.id, volume, "Aspirated");
            let update = located
                .set_volume(&pipette.id, volume)
                .set_ready_to_aspirate(&pipette.id, true);
            Ok(CommandSuccess::new(
                CommandResult::Volume {
                    volume: params.volume,
                    position,
                },
                update,
            ))
        }
        Err(error) => Err(plunger_failure(pipette, error, located)),
    }
}

pub(super) async fn dispense(
    params: &DispenseParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.pipettes().attached_tip(&pipette.id)?;
    let current = state.pipettes().known_volume(&pipette.id)?;
    if params.volume <= 0.0 || params.volume > current + VOLUME_TOLERANCE {
        return Err(EngineError::InvalidDispenseVolume {
            requested: params.volume,
            current,
        }
        .into());
    }
    state.labware().well(&params.labware_id, &params.well_name)?;
    ensure_pipette_access(state, &params.labware_id)?;
    let flow_rate = params
        .flow_rate
        .unwrap_or(pipette.config.default_flow_rates.dispense);

    let motion = ctx.motion().await;
    let position = move_to_well_position(
        &motion,
        state,
        pipette,
        &params.labware_id,
        &params.well_name,
        &params.well_location,
        MoveOptions::default(),
    )
    .await?;

    let located = StateUpdate::new()
        .set_pipette_location(&pipette.id, well_location(&params.labware_id, &params.well_name));
    match motion
        .dispense(pipette.mount, params.volume, flow_rate, params.push_out)
        .await
    {
        Ok(()) => {
            let remaining = (current - params.volume).max(0.0);
            let ready = params.push_out.map_or(true, |push_out| push_out == 0.0);
            let update = located
                .set_volume(&pipette.id, remaining)
                .set_ready_to_aspirate(&pipette.id, ready);
            Ok(CommandSuccess::new(
                CommandResult::Volume {
                    volume: params.volume,
                    position,
                },
                update,
            ))
        }
        Err(error) => Err(plunger_failure(pipette, error, located)),
    }
}

/// Classify a failed plunger motion. Overpressure leaves the volume unknown.
fn plunger_failure(pipette: &LoadedPipette, error: HardwareError, located: StateUpdate) -> CommandFailure {
    match error {
        HardwareError::Overpressure { position, .. } => {
            warn!(pipette_id = %pipette.id, %position, "Overpressure during plunger motion");
            CommandFailure::with_update(
                EngineError::Overpressure {
                    pipette_id: pipette.id.clone(),
                    retry_location: position,
                },
                located.set_volume_unknown(&pipette.id),
            )
        }
        other => CommandFailure::from(hardware_error(other)),
    }
}

pub(super) async fn move_to_well(
    params: &MoveToWellParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.labware().well(&params.labware_id, &params.well_name)?;
    ensure_pipette_access(state, &params.labware_id)?;

    let motion = ctx.motion().await;
    let position = move_to_well_position(
        &motion,
        state,
        pipette,
        &params.labware_id,
        &params.well_name,
        &params.well_location,
        MoveOptions {
            minimum_z_height: params.minimum_z_height,
            force_direct: params.force_direct,
        },
    )
    .await?;

    let update = StateUpdate::new()
        .set_pipette_location(&pipette.id, well_location(&params.labware_id, &params.well_name));
    Ok(CommandSuccess::new(CommandResult::Position { position }, update))
}

pub(super) async fn move_to_addressable_area(
    params: &MoveToAddressableAreaParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    let area = state
        .addressable_areas()
        .check_area(&params.addressable_area_name)?;
    let geometry = state.geometry();
    let mount = pipette.mount.to_mount();
    let critical_point = geometry.critical_point_for(&pipette.id)?;

    let motion = ctx.motion().await;
    let origin = motion.gantry_position(mount, critical_point).await.map_err(hardware_error)?;
    let plan = geometry.plan_to_area(
        &pipette.id,
        origin,
        &area,
        &params.offset,
        MoveOptions {
            minimum_z_height: params.minimum_z_height,
            force_direct: params.force_direct,
        },
    )?;
    motion
        .execute_plan(mount, &plan, None)
        .await
        .map_err(hardware_error)?;

    let update = StateUpdate::new()
        .set_pipette_location(
            &pipette.id,
            PipetteLocation::AddressableArea {
                addressable_area_name: area.name.clone(),
            },
        )
        .mark_area_used(area.name.clone());
    Ok(CommandSuccess::new(
        CommandResult::Position {
            position: plan.destination().unwrap_or(origin),
        },
        update,
    ))
}

pub(super) async fn liquid_probe(
    params: &LiquidProbeParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let pipette = state.pipettes().get(&params.pipette_id)?;
    state.pipettes().attached_tip(&pipette.id)?;
    if state.pipettes().known_volume(&pipette.id)? > VOLUME_TOLERANCE {
        return Err(EngineError::PipetteNotEmpty(pipette.id.clone()).into());
    }
    ensure_pipette_access(state, &params.labware_id)?;
    let well_bottom = state
        .geometry()
        .well_position(&params.labware_id, &params.well_name, &WellLocation::bottom(0.0))?
        .z;

    let motion = ctx.motion().await;
    let position = move_to_well_position(
        &motion,
        state,
        pipette,
        &params.labware_id,
        &params.well_name,
        &params.well_location,
        MoveOptions::default(),
    )
    .await?;

    let located = StateUpdate::new()
        .set_pipette_location(&pipette.id, well_location(&params.labware_id, &params.well_name));
    let max_distance = (position.z - well_bottom).max(0.0);
    match motion.probe_liquid(pipette.mount, max_distance).await {
        Ok(found_z) => Ok(CommandSuccess::new(
            CommandResult::LiquidProbe {
                z_position: found_z - well_bottom,
                position: point(position.x, position.y, found_z),
            },
            located,
        )),
        Err(HardwareError::LiquidNotFound { position, .. }) => {
            warn!(pipette_id = %pipette.id, labware_id = %params.labware_id, well_name = %params.well_name, "No liquid found");
            Err(CommandFailure::with_update(
                EngineError::LiquidNotFound {
                    pipette_id: pipette.id.clone(),
                    position,
                },
                located,
            ))
        }
        Err(other) => Err(hardware_error(other).into()),
    }
}
