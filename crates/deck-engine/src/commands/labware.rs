//! Labware placement: load, lids, lid stacks and moves.

use super::{
    hardware_error, new_id, CommandFailure, CommandResult, CommandSuccess, ExecutionResult,
    LoadLabwareParams, LoadLidParams, LoadLidStackParams, MoveLabwareParams,
};
use crate::context::{EngineContext, MotionGuard};
use crate::geometry::MotionPlan;
use crate::state::EngineState;
use crate::state_update::{LabwareLoad, LidStackUpdate, StateUpdate};
use deck_core::definitions::{AreaType, LabwareDefinition};
use deck_core::error::{EngineError, EngineResult};
use deck_core::hardware::HardwareError;
use deck_core::limits::GRIPPER_MAX_Z;
use deck_core::types::{
    CriticalPoint, LabwareLocation, LabwareMovementStrategy, Mount, MotorAxis,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Check that `definition` may sit at `location`; returns the areas it would use.
///
/// `moving` is the id of the labware being moved, which does not count as
/// an occupant of its own destination.
pub(super) fn check_placement(
    state: &EngineState,
    definition: &LabwareDefinition,
    location: &LabwareLocation,
    moving: Option<&str>,
) -> EngineResult<Vec<String>> {
    let invalid = |reason: String| EngineError::InvalidLocation {
        load_name: definition.load_name().to_string(),
        location: location.to_string(),
        reason,
    };

    if let Some(permitted) = &definition.parameters.permitted_slots {
        let allowed = matches!(
            location,
            LabwareLocation::DeckSlot { slot_name: name }
            | LabwareLocation::AddressableArea { addressable_area_name: name }
                if permitted.contains(name)
        );
        if !allowed {
            return Err(invalid(format!("restricted to {}", permitted.join(", "))));
        }
    }

    let mut areas = Vec::new();
    match location {
        LabwareLocation::DeckSlot { slot_name } => {
            let area = state.addressable_areas().check_area(slot_name)?;
            if area.area_type != AreaType::Slot {
                return Err(invalid("not a deck slot".to_string()));
            }
            areas.push(slot_name.clone());
        }
        LabwareLocation::AddressableArea {
            addressable_area_name,
        } => {
            let area = state.addressable_areas().check_area(addressable_area_name)?;
            if !area.area_type.holds_labware() {
                return Err(invalid(format!("{:?} areas cannot hold labware", area.area_type)));
            }
            areas.push(addressable_area_name.clone());
        }
        LabwareLocation::Module { module_id } => {
            if definition.is_fixture_only() {
                return Err(invalid("fixtures cannot be placed on modules".to_string()));
            }
            state.modules().get(module_id)?;
        }
        LabwareLocation::OnLabware { labware_id } => {
            if definition.is_fixture_only() {
                return Err(invalid("fixtures cannot be stacked".to_string()));
            }
            if moving == Some(labware_id.as_str()) {
                return Err(invalid("labware cannot be stacked on itself".to_string()));
            }
            let parent = state.labware().get(labware_id)?;
            let same_lid = definition.is_lid() && parent.definition.uri() == definition.uri();
            if definition.is_lid() && !same_lid {
                let compatible = definition
                    .compatible_parent_labware
                    .iter()
                    .any(|name| name == parent.definition.load_name());
                if !compatible {
                    return Err(invalid(format!(
                        "lid is not compatible with {}",
                        parent.definition.load_name()
                    )));
                }
            } else if !same_lid && !definition.can_stack_on(&parent.definition) {
                return Err(EngineError::LabwareCannotBeStacked {
                    top_load_name: definition.load_name().to_string(),
                    bottom_load_name: parent.definition.load_name().to_string(),
                });
            }
        }
        LabwareLocation::OffDeck | LabwareLocation::System => {}
    }

    if let Some(module) = location.deck_area_name().and_then(|name| state.modules().in_slot(name)) {
        return Err(EngineError::LocationIsOccupied {
            location: location.to_string(),
            occupant: format!("module {}", module.id),
        });
    }
    if let Some(occupant) = state.labware().labware_at(location) {
        if moving != Some(occupant.id.as_str()) {
            return Err(EngineError::LocationIsOccupied {
                location: location.to_string(),
                occupant: occupant.id.clone(),
            });
        }
    }

    state
        .addressable_areas()
        .check_areas(areas.iter().map(String::as_str))?;
    Ok(areas)
}

/// Record `lid_id` as the lid of the labware it sits on, unless that labware is itself a lid.
fn link_lid(
    state: &EngineState,
    update: StateUpdate,
    location: &LabwareLocation,
    lid_id: &str,
) -> EngineResult<StateUpdate> {
    match location {
        LabwareLocation::OnLabware { labware_id } if !state.labware().definition(labware_id)?.is_lid() => {
            Ok(update.set_labware_lid(labware_id, Some(lid_id.to_string())))
        }
        _ => Ok(update),
    }
}

pub(super) async fn load_labware(
    params: &LoadLabwareParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let definition = ctx
        .labware_definition(&params.load_name, &params.namespace, params.version)
        .await?;
    let areas = check_placement(state, &definition, &params.location, None)?;

    let labware_id = params.labware_id.clone().unwrap_or_else(new_id);
    let offset_id = state.geometry().find_offset_id(&definition, &params.location)?;
    let mut update = StateUpdate::new().load_labware(LabwareLoad {
        labware_id: labware_id.clone(),
        definition: Arc::clone(&definition),
        location: params.location.clone(),
        offset_id: offset_id.clone(),
        display_name: params.display_name.clone(),
    });
    for area in areas {
        update = update.mark_area_used(area);
    }
    if definition.is_lid() {
        update = link_lid(state, update, &params.location, &labware_id)?;
    }

    info!(labware_id = %labware_id, load_name = %definition.load_name(), location = %params.location, "Loaded labware");
    Ok(CommandSuccess::new(
        CommandResult::LoadLabware {
            labware_id,
            definition_uri: definition.uri().to_string(),
            offset_id,
        },
        update,
    ))
}

pub(super) async fn load_lid(
    params: &LoadLidParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let definition = ctx
        .labware_definition(&params.load_name, &params.namespace, params.version)
        .await?;
    let invalid = |reason: &str| EngineError::InvalidLocation {
        load_name: params.load_name.clone(),
        location: params.location.to_string(),
        reason: reason.to_string(),
    };
    if !definition.is_lid() {
        return Err(invalid("not a lid").into());
    }
    if !matches!(params.location, LabwareLocation::OnLabware { .. }) {
        return Err(invalid("lids must be loaded onto labware").into());
    }
    check_placement(state, &definition, &params.location, None)?;

    let lid_id = params.labware_id.clone().unwrap_or_else(new_id);
    let update = StateUpdate::new().load_labware(LabwareLoad {
        labware_id: lid_id.clone(),
        definition: Arc::clone(&definition),
        location: params.location.clone(),
        offset_id: None,
        display_name: None,
    });
    let update = link_lid(state, update, &params.location, &lid_id)?;

    Ok(CommandSuccess::new(
        CommandResult::LoadLabware {
            labware_id: lid_id,
            definition_uri: definition.uri().to_string(),
            offset_id: None,
        },
        update,
    ))
}

pub(super) async fn load_lid_stack(
    params: &LoadLidStackParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let definition = ctx
        .labware_definition(&params.load_name, &params.namespace, params.version)
        .await?;
    if !definition.is_lid() {
        return Err(EngineError::InvalidLocation {
            load_name: params.load_name.clone(),
            location: params.location.to_string(),
            reason: "only lids can be stacked in a lid stack".to_string(),
        }
        .into());
    }
    let limit = definition.stack_limit.unwrap_or(1);
    if params.quantity == 0 || params.quantity > limit {
        return Err(EngineError::LidStackLimitExceeded {
            load_name: params.load_name.clone(),
            requested: params.quantity,
            limit,
        }
        .into());
    }
    let areas = check_placement(state, &definition, &params.location, None)?;

    let stack_id = params.stack_id.clone().unwrap_or_else(new_id);
    let lid_ids: Vec<String> = (0..params.quantity).map(|_| new_id()).collect();
    let offset_id = state.geometry().find_offset_id(&definition, &params.location)?;

    let mut update = StateUpdate::new();
    let mut location = params.location.clone();
    for (index, lid_id) in lid_ids.iter().enumerate() {
        update = update.load_labware(LabwareLoad {
            labware_id: lid_id.clone(),
            definition: Arc::clone(&definition),
            location: location.clone(),
            offset_id: if index == 0 { offset_id.clone() } else { None },
            display_name: None,
        });
        location = LabwareLocation::OnLabware {
            labware_id: lid_id.clone(),
        };
    }
    if let Some(bottom) = lid_ids.first() {
        update = link_lid(state, update, &params.location, bottom)?;
    }
    update = update.set_lid_stack(
        &stack_id,
        LidStackUpdate {
            definition_uri: definition.uri(),
            location: params.location.clone(),
            lid_ids: lid_ids.clone(),
        },
    );
    for area in areas {
        update = update.mark_area_used(area);
    }

    debug!(stack_id = %stack_id, quantity = params.quantity, "Loaded lid stack");
    Ok(CommandSuccess::new(
        CommandResult::LoadLidStack {
            stack_id,
            labware_ids: lid_ids,
        },
        update,
    ))
}

pub(super) async fn move_labware(
    params: &MoveLabwareParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let labware_id = params.labware_id.as_str();
    let labware = state.labware().get(labware_id)?;
    let definition = Arc::clone(&labware.definition);
    let destination = &params.new_location;

    if destination.is_same_place(&labware.location) {
        return Err(EngineError::InvalidMoveDestination {
            labware_id: labware_id.to_string(),
            reason: format!("already at {}", destination),
        }
        .into());
    }
    if let Some(top) = state.labware().labware_on_top(labware_id) {
        if labware.lid_id.as_deref() != Some(top.id.as_str()) {
            return Err(EngineError::LabwareHasLabwareOnTop {
                labware_id: labware_id.to_string(),
                top_labware_id: top.id.clone(),
            }
            .into());
        }
    }

    // Disposal areas swallow the labware: it ends up off the deck.
    let disposal = match destination {
        LabwareLocation::AddressableArea {
            addressable_area_name,
        } => {
            let area = state.addressable_areas().check_area(addressable_area_name)?;
            if area.area_type.is_disposal() && !area.ability_to_drop_labware {
                return Err(EngineError::InvalidMoveDestination {
                    labware_id: labware_id.to_string(),
                    reason: format!("{} does not accept labware", addressable_area_name),
                }
                .into());
            }
            area.area_type.is_disposal().then(|| addressable_area_name.clone())
        }
        _ => None,
    };
    let (final_location, areas) = match &disposal {
        Some(area_name) => (LabwareLocation::OffDeck, vec![area_name.clone()]),
        None => (
            destination.clone(),
            check_placement(state, &definition, destination, Some(labware_id))?,
        ),
    };

    let offset_id = state.geometry().find_offset_id(&definition, &final_location)?;
    let mut update = StateUpdate::new().move_labware(labware_id, final_location.clone(), offset_id.clone());
    for area in areas {
        update = update.mark_area_used(area);
    }
    update = update_lids(state, update, labware_id, &definition, &labware.location, &final_location)?;

    if params.strategy == LabwareMovementStrategy::UsingGripper {
        if !ctx.hardware().has_gripper().await? {
            return Err(EngineError::GripperNotAttached.into());
        }
        let geometry = state.geometry();
        for location in [&labware.location, destination] {
            if let Some(module) = geometry.module_under(location)? {
                state.modules().ensure_labware_accessible(&module.id, true)?;
            }
        }
        let pick_up_offset = params.pick_up_offset.unwrap_or_default().as_point();
        let drop_offset = params.drop_offset.unwrap_or_default().as_point();
        let grip_point = geometry.grip_point(labware_id)? + pick_up_offset;
        let drop_point = geometry.drop_point(destination, &definition)? + drop_offset;

        let motion = ctx.motion().await;
        let origin = motion
            .gantry_position(Mount::Extension, Some(CriticalPoint::GripperJawCenter))
            .await
            .map_err(hardware_error)?;
        // Plan both legs before the jaws move.
        let to_labware = geometry.plan_gripper_move(origin, grip_point, 0.0, GRIPPER_MAX_Z)?;
        let carried = definition.dimensions.z_dimension;
        let to_destination = geometry.plan_gripper_move(grip_point, drop_point, carried, GRIPPER_MAX_Z)?;

        let moved = gripper_sequence(
            &motion,
            labware_id,
            definition.grip.grip_force,
            &to_labware,
            &to_destination,
        )
        .await;
        if let Err(error) = moved {
            warn!(labware_id, %error, "Gripper move failed");
            return Err(CommandFailure::with_update(
                error,
                StateUpdate::new().clear_pipette_locations(),
            ));
        }
        update = update.clear_pipette_locations();
    }

    info!(labware_id, to = %final_location, strategy = ?params.strategy, "Moved labware");
    Ok(CommandSuccess::new(CommandResult::MoveLabware { offset_id }, update))
}

/// Lid links and lid-stack membership after `labware_id` moves.
fn update_lids(
    state: &EngineState,
    mut update: StateUpdate,
    labware_id: &str,
    definition: &LabwareDefinition,
    from: &LabwareLocation,
    to: &LabwareLocation,
) -> EngineResult<StateUpdate> {
    if !definition.is_lid() {
        return Ok(update);
    }
    if let LabwareLocation::OnLabware { labware_id: parent } = from {
        if state.labware().lid(parent)? == Some(labware_id) {
            update = update.set_labware_lid(parent, None);
        }
    }
    update = link_lid(state, update, to, labware_id)?;

    if let Some(stack) = state.lid_stacks().with_top(labware_id) {
        let mut lid_ids = stack.lid_ids.clone();
        lid_ids.pop();
        update = update.set_lid_stack(
            &stack.id,
            LidStackUpdate {
                definition_uri: stack.definition_uri.clone(),
                location: stack.location.clone(),
                lid_ids,
            },
        );
    }
    if let LabwareLocation::OnLabware { labware_id: below } = to {
        if let Some(stack) = state.lid_stacks().with_top(below) {
            if stack.definition_uri == definition.uri() {
                let mut lid_ids = stack.lid_ids.clone();
                lid_ids.push(labware_id.to_string());
                update = update.set_lid_stack(
                    &stack.id,
                    LidStackUpdate {
                        definition_uri: stack.definition_uri.clone(),
                        location: stack.location.clone(),
                        lid_ids,
                    },
                );
            }
        }
    }
    Ok(update)
}

/// Classify a failure raised once the gripper is in motion. These are never
/// validation errors: the jaws may already have moved.
fn gripper_error(labware_id: &str, error: HardwareError) -> EngineError {
    match error {
        HardwareError::Gripper { kind } => EngineError::GripperMovement {
            labware_id: labware_id.to_string(),
            kind,
        },
        HardwareError::Stall { .. } => EngineError::GripperMovement {
            labware_id: labware_id.to_string(),
            kind: deck_core::hardware::GripperErrorKind::Collision,
        },
        HardwareError::Cancelled => EngineError::RunStopped,
        other => EngineError::Hardware(other),
    }
}

/// Open, travel to the grip point, grip, carry to the drop point, release, retract.
///
/// Every error here comes from the hardware, after the gripper may have moved.
async fn gripper_sequence(
    motion: &MotionGuard<'_>,
    labware_id: &str,
    grip_force: f64,
    to_labware: &MotionPlan,
    to_destination: &MotionPlan,
) -> EngineResult<()> {
    let hardware_failed = |error| gripper_error(labware_id, error);

    motion.ungrip().await.map_err(hardware_failed)?;
    motion
        .execute_plan(Mount::Extension, to_labware, None)
        .await
        .map_err(hardware_failed)?;
    motion.grip(grip_force).await.map_err(hardware_failed)?;
    motion
        .execute_plan(Mount::Extension, to_destination, None)
        .await
        .map_err(hardware_failed)?;
    motion.ungrip().await.map_err(hardware_failed)?;
    motion
        .home(Some(&[MotorAxis::ExtensionZ]))
        .await
        .map_err(hardware_failed)?;
    Ok(())
}
