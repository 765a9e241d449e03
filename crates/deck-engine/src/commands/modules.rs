//! Module loading and module operations.
//!
//! Operations that move hardware next to the gantry (thermocycler lid,
//! heater-shaker latch and shaking) home the Z axes first and forget what
//! every pipette was over.

use super::{
    hardware_error, new_id, CommandResult, CommandSuccess, EngageMagnetParams, ExecutionResult,
    LoadModuleParams, ModuleParams, SetShakeSpeedParams, SetTemperatureParams,
};
use crate::context::EngineContext;
use crate::state::{EngineState, LatchStatus, LoadedModule, ModuleSubState};
use crate::state_update::{ModuleLoad, StateUpdate};
use deck_core::definitions::ModuleType;
use deck_core::error::{EngineError, EngineResult};
use deck_core::hardware::ModuleOperation;
use deck_core::types::{LabwareLocation, MotorAxis};
use std::sync::Arc;
use tracing::info;

fn check_range(parameter: &str, value: f64, range: Option<(f64, f64)>) -> EngineResult<()> {
    let (min, max) = range.unwrap_or((value, value));
    if value < min || value > max {
        return Err(EngineError::InvalidTarget {
            parameter: parameter.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Run one module operation.
async fn operate(ctx: &EngineContext, module: &LoadedModule, operation: ModuleOperation) -> EngineResult<()> {
    info!(module_id = %module.id, ?operation, "Module operation");
    ctx.hardware()
        .module_command(&module.serial_number, operation)
        .await
        .map_err(hardware_error)
}

/// Home the Z axes, then run one module operation, all under the motion lock.
async fn operate_clear_of_gantry(
    ctx: &EngineContext,
    module: &LoadedModule,
    operation: ModuleOperation,
) -> EngineResult<()> {
    let motion = ctx.motion().await;
    motion
        .home(Some(&MotorAxis::Z_AXES))
        .await
        .map_err(hardware_error)?;
    operate(ctx, module, operation).await
}

pub(super) async fn load_module(
    params: &LoadModuleParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let definition = ctx.module_definition(params.model).await?;
    let slot_name = &params.location.slot_name;
    if let Some(fixed_slot) = &definition.fixed_slot {
        if fixed_slot != slot_name {
            return Err(EngineError::InvalidLocation {
                load_name: params.model.to_string(),
                location: format!("slot {}", slot_name),
                reason: format!("must be loaded in {}", fixed_slot),
            }
            .into());
        }
    }

    // Fixture compatibility first: two modules in one cutout are an area conflict.
    let area_name = definition.addressable_area_for(slot_name);
    state.addressable_areas().check_area(&area_name)?;
    if let Some(existing) = state.modules().in_slot(slot_name) {
        return Err(EngineError::LocationIsOccupied {
            location: format!("slot {}", slot_name),
            occupant: format!("module {}", existing.id),
        }
        .into());
    }
    if let Some(labware) = state.labware().labware_at(&LabwareLocation::slot(slot_name.clone())) {
        return Err(EngineError::LocationIsOccupied {
            location: format!("slot {}", slot_name),
            occupant: labware.id.clone(),
        }
        .into());
    }

    // Magnetic blocks are passive and never report themselves to the hardware.
    let passive = params.model.module_type() == ModuleType::MagneticBlock;
    let serial_number = if ctx.config().virtual_modules || passive {
        format!("virtual-{}-{}", params.model, slot_name)
    } else {
        let attached = ctx.hardware().attached_modules().await?;
        attached
            .into_iter()
            .find(|m| definition.accepts(m.model) && state.modules().by_serial(&m.serial_number).is_none())
            .map(|m| m.serial_number)
            .ok_or_else(|| EngineError::ModuleNotAttached(params.model.to_string()))?
    };

    let module_id = params.module_id.clone().unwrap_or_else(new_id);
    info!(module_id = %module_id, model = %params.model, slot = %slot_name, serial = %serial_number, "Loaded module");
    let update = StateUpdate::new()
        .load_module(ModuleLoad {
            module_id: module_id.clone(),
            serial_number: serial_number.clone(),
            definition: Arc::clone(&definition),
            location: params.location.clone(),
            addressable_area_name: area_name.clone(),
        })
        .mark_area_used(area_name);
    Ok(CommandSuccess::new(
        CommandResult::LoadModule {
            module_id,
            serial_number,
            model: params.model,
        },
        update,
    ))
}

// =============================================================================
// Magnetic module
// =============================================================================

pub(super) async fn engage_magnet(
    params: &EngageMagnetParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::Magnetic)?;
    let max = module.definition.max_engage_height.unwrap_or(0.0);
    check_range("height", params.height, Some((0.0, max)))?;
    operate(ctx, module, ModuleOperation::EngageMagnet { height: params.height }).await?;
    let update = StateUpdate::new().set_module_state(
        &module.id,
        ModuleSubState::Magnetic {
            engaged_height: Some(params.height),
        },
    );
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

pub(super) async fn disengage_magnet(
    params: &ModuleParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::Magnetic)?;
    operate(ctx, module, ModuleOperation::DisengageMagnet).await?;
    let update = StateUpdate::new().set_module_state(
        &module.id,
        ModuleSubState::Magnetic {
            engaged_height: None,
        },
    );
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

// =============================================================================
// Temperature module
// =============================================================================

pub(super) async fn set_target_temperature(
    params: &SetTemperatureParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::Temperature)?;
    check_range("celsius", params.celsius, module.definition.temperature_range)?;
    operate(ctx, module, ModuleOperation::SetTemperature { celsius: params.celsius }).await?;
    let update = StateUpdate::new().set_module_state(
        &module.id,
        ModuleSubState::Temperature {
            target_celsius: Some(params.celsius),
        },
    );
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

pub(super) async fn deactivate_temperature(
    params: &ModuleParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::Temperature)?;
    operate(ctx, module, ModuleOperation::DeactivateTemperature).await?;
    let update = StateUpdate::new().set_module_state(
        &module.id,
        ModuleSubState::Temperature {
            target_celsius: None,
        },
    );
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

// =============================================================================
// Thermocycler
// =============================================================================

fn thermocycler_block_target(module: &LoadedModule) -> Option<f64> {
    match module.state {
        ModuleSubState::Thermocycler {
            target_block_celsius,
            ..
        } => target_block_celsius,
        _ => None,
    }
}

pub(super) async fn set_lid(
    params: &ModuleParams,
    open: bool,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::Thermocycler)?;
    let operation = if open {
        ModuleOperation::OpenLid
    } else {
        ModuleOperation::CloseLid
    };
    operate_clear_of_gantry(ctx, module, operation).await?;
    let update = StateUpdate::new()
        .set_module_state(
            &module.id,
            ModuleSubState::Thermocycler {
                lid_open: open,
                target_block_celsius: thermocycler_block_target(module),
            },
        )
        .clear_pipette_locations();
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

pub(super) async fn set_block_temperature(
    params: &SetTemperatureParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::Thermocycler)?;
    check_range("celsius", params.celsius, module.definition.temperature_range)?;
    operate(ctx, module, ModuleOperation::SetBlockTemperature { celsius: params.celsius }).await?;
    let lid_open = matches!(module.state, ModuleSubState::Thermocycler { lid_open: true, .. });
    let update = StateUpdate::new().set_module_state(
        &module.id,
        ModuleSubState::Thermocycler {
            lid_open,
            target_block_celsius: Some(params.celsius),
        },
    );
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

// =============================================================================
// Heater-shaker
// =============================================================================

fn heater_shaker_state(module: &LoadedModule) -> (LatchStatus, Option<u32>) {
    match module.state {
        ModuleSubState::HeaterShaker { latch, target_speed } => (latch, target_speed),
        _ => (LatchStatus::Unknown, None),
    }
}

pub(super) async fn set_latch(
    params: &ModuleParams,
    open: bool,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::HeaterShaker)?;
    let (_, target_speed) = heater_shaker_state(module);
    if open && target_speed.is_some() {
        return Err(EngineError::HeaterShakerShaking(module.id.clone()).into());
    }
    let (operation, latch) = if open {
        (ModuleOperation::OpenLatch, LatchStatus::Open)
    } else {
        (ModuleOperation::CloseLatch, LatchStatus::Closed)
    };
    operate_clear_of_gantry(ctx, module, operation).await?;
    let update = StateUpdate::new()
        .set_module_state(&module.id, ModuleSubState::HeaterShaker { latch, target_speed })
        .clear_pipette_locations();
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

pub(super) async fn set_shake_speed(
    params: &SetShakeSpeedParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::HeaterShaker)?;
    let (latch, _) = heater_shaker_state(module);
    if latch != LatchStatus::Closed {
        return Err(EngineError::HeaterShakerLatch {
            module_id: module.id.clone(),
            required: "closed".to_string(),
        }
        .into());
    }
    let range = module
        .definition
        .speed_range
        .map(|(min, max)| (f64::from(min), f64::from(max)));
    check_range("rpm", f64::from(params.rpm), range)?;
    operate_clear_of_gantry(ctx, module, ModuleOperation::SetShakeSpeed { rpm: params.rpm }).await?;
    let update = StateUpdate::new()
        .set_module_state(
            &module.id,
            ModuleSubState::HeaterShaker {
                latch,
                target_speed: Some(params.rpm),
            },
        )
        .clear_pipette_locations();
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}

pub(super) async fn deactivate_shaker(
    params: &ModuleParams,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    let module = state.modules().get_typed(&params.module_id, ModuleType::HeaterShaker)?;
    let (latch, _) = heater_shaker_state(module);
    operate(ctx, module, ModuleOperation::DeactivateShaker).await?;
    let update = StateUpdate::new().set_module_state(
        &module.id,
        ModuleSubState::HeaterShaker {
            latch,
            target_speed: None,
        },
    );
    Ok(CommandSuccess::new(CommandResult::Empty {}, update))
}
