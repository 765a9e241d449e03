//! Deck configuration, lids, modules and the paths the gantry takes around them.

mod common;

use common::{
    command, continue_on_error, default_robot, harness, harness_with_deck, liquid_command,
    load_labware, load_pipette, move_to_area, pick_up_tip,
};
use deck_core::definitions::ModuleModel;
use deck_core::error::ErrorKind;
use deck_core::limits::WASTE_CHUTE_DROP_HEIGHT;
use deck_core::types::{point, LabwareLocation, Mount, MountType, Point};
use deck_engine::state::CutoutFixturePlacement;
use deck_engine::{CommandStatus, DeckConfiguration};
use deck_hardware::{HardwareCall, SimulatedHardware};
use serde_json::json;

fn placement(cutout_id: &str, cutout_fixture_id: &str) -> CutoutFixturePlacement {
    CutoutFixturePlacement {
        cutout_id: cutout_id.to_string(),
        cutout_fixture_id: cutout_fixture_id.to_string(),
    }
}

fn module_command(command_type: &str, module_id: &str) -> deck_engine::CommandCreate {
    command(json!({ "commandType": command_type, "params": { "moduleId": module_id } }))
}

fn load_module(model: &str, slot: &str, module_id: &str) -> deck_engine::CommandCreate {
    command(json!({
        "commandType": "loadModule",
        "params": { "model": model, "location": { "slotName": slot }, "moduleId": module_id }
    }))
}

fn load_on_module(load_name: &str, labware_id: &str, module_id: &str) -> deck_engine::CommandCreate {
    command(json!({
        "commandType": "loadLabware",
        "params": {
            "loadName": load_name,
            "labwareId": labware_id,
            "location": { "kind": "module", "moduleId": module_id }
        }
    }))
}

fn grip_to(labware_id: &str, new_location: serde_json::Value) -> deck_engine::CommandCreate {
    command(json!({
        "commandType": "moveLabware",
        "params": { "labwareId": labware_id, "newLocation": new_location, "strategy": "usingGripper" }
    }))
}

fn move_to_well(pipette_id: &str, labware_id: &str, well: &str) -> deck_engine::CommandCreate {
    command(json!({
        "commandType": "moveToWell",
        "params": { "pipetteId": pipette_id, "labwareId": labware_id, "wellName": well }
    }))
}

/// Last position `mount` was sent to.
fn last_move(h: &common::Harness, mount: Mount) -> Option<Point> {
    h.hardware
        .calls()
        .iter()
        .filter_map(|call| match call {
            HardwareCall::MoveTo { mount: m, position, .. } if *m == mount => Some(*position),
            _ => None,
        })
        .last()
}

fn error_type(h: &common::Harness, command_id: &str) -> String {
    h.engine
        .state()
        .commands()
        .get(command_id)
        .unwrap()
        .error
        .as_ref()
        .map(|e| e.error_type.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn concrete_deck_rejects_unconfigured_areas() {
    let deck = DeckConfiguration::Concrete(vec![
        placement("cutoutC2", "singleCenterSlot"),
        placement("cutoutD3", "wasteChuteRightAdapterNoCover"),
    ]);
    let mut h = harness_with_deck(default_robot(), continue_on_error(), deck).await;
    let plate = h
        .engine
        .add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    let missing = h
        .engine
        .add_command(load_labware("wellplate_96_360ul_flat", "other", "D3"));
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &[]));
    let chute = h.engine.add_command(move_to_area("p50", "1ChannelWasteChute"));
    h.engine.play();
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    assert_eq!(state.commands().get(&plate).unwrap().status, CommandStatus::Succeeded);
    assert_eq!(state.commands().get(&chute).unwrap().status, CommandStatus::Succeeded);

    let error = state.commands().get(&missing).unwrap().error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.error_type, "AreaNotInDeckConfiguration");
    assert_eq!(error.error_info["areaName"], json!("D3"));
    assert_eq!(error.error_info["cutoutId"], json!("cutoutD3"));

    let used: Vec<&str> = state
        .addressable_areas()
        .used_areas()
        .map(|a| a.name.as_str())
        .collect();
    assert!(used.contains(&"C2"));
    assert!(used.contains(&"1ChannelWasteChute"));
    assert!(!used.contains(&"D3"));
}

#[tokio::test]
async fn lids_move_between_plates_and_stacks() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(command(json!({
        "commandType": "loadLid",
        "params": {
            "loadName": "plate_lid",
            "labwareId": "lid",
            "location": { "kind": "onLabware", "labwareId": "plate" }
        }
    })));
    h.engine.add_command(command(json!({
        "commandType": "loadLidStack",
        "params": {
            "loadName": "plate_lid",
            "stackId": "stack",
            "location": { "kind": "deckSlot", "slotName": "D2" },
            "quantity": 2
        }
    })));
    h.engine.play();
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    assert!(state.commands().all().all(|c| c.status == CommandStatus::Succeeded));
    assert_eq!(state.labware().lid("plate").unwrap(), Some("lid"));
    let stack = state.lid_stacks().get("stack").unwrap();
    assert_eq!(stack.len(), 2);
    let old_top = stack.top().unwrap().to_string();

    // Pushing the plate's lid onto the stack unlinks it from the plate.
    h.engine.add_command(command(json!({
        "commandType": "moveLabware",
        "params": {
            "labwareId": "lid",
            "newLocation": { "kind": "onLabware", "labwareId": old_top }
        }
    })));
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    let stack = state.lid_stacks().get("stack").unwrap();
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.top(), Some("lid"));
    assert_eq!(state.labware().lid("plate").unwrap(), None);
    assert_eq!(
        state.labware().location("lid").unwrap(),
        &LabwareLocation::OnLabware { labware_id: old_top.clone() }
    );

    // Taking the top lid back pops it and relinks it.
    h.engine.add_command(command(json!({
        "commandType": "moveLabware",
        "params": {
            "labwareId": "lid",
            "newLocation": { "kind": "onLabware", "labwareId": "plate" }
        }
    })));
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    let stack = state.lid_stacks().get("stack").unwrap();
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.top(), Some(old_top.as_str()));
    assert_eq!(state.labware().lid("plate").unwrap(), Some("lid"));
}

#[tokio::test]
async fn lid_loads_respect_parents_and_stack_limits() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    h.engine.add_command(load_labware("tiprack_50ul", "tips", "C2"));
    let on_rack = h.engine.add_command(command(json!({
        "commandType": "loadLid",
        "params": { "loadName": "plate_lid", "location": { "kind": "onLabware", "labwareId": "tips" } }
    })));
    let too_tall = h.engine.add_command(command(json!({
        "commandType": "loadLidStack",
        "params": { "loadName": "plate_lid", "location": { "kind": "deckSlot", "slotName": "D2" }, "quantity": 6 }
    })));
    let not_a_lid = h.engine.add_command(command(json!({
        "commandType": "loadLidStack",
        "params": { "loadName": "wellplate_96_360ul_flat", "location": { "kind": "deckSlot", "slotName": "D2" }, "quantity": 1 }
    })));
    h.engine.play();
    h.engine.run_until_idle().await;

    assert_eq!(error_type(&h, &on_rack), "InvalidLocation");
    assert_eq!(error_type(&h, &too_tall), "LidStackLimitExceeded");
    assert_eq!(error_type(&h, &not_a_lid), "InvalidLocation");
    let state = h.engine.state();
    assert_eq!(state.labware().len(), 1);
    assert_eq!(state.lid_stacks().all().count(), 0);
}

#[tokio::test]
async fn pipettes_dodge_the_thermocycler_through_c2() {
    let hardware = SimulatedHardware::builder()
        .pipette(MountType::Right, "p1000_single")
        .module("TC-1", ModuleModel::ThermocyclerModuleV2)
        .build();
    let mut h = harness(hardware, continue_on_error()).await;
    h.engine.add_command(load_module("thermocyclerModuleV2", "B1", "tc"));
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "front", "D1"));
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "back", "A2"));
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "beside", "D2"));
    h.engine.add_command(load_pipette("p1000_single", "right", "p1000", &[]));
    h.engine.add_command(move_to_well("p1000", "front", "A1"));
    h.engine.play();
    h.engine.run_until_idle().await;
    let c2 = h
        .engine
        .state()
        .addressable_areas()
        .check_area("C2")
        .unwrap()
        .center();
    let through_c2 = |h: &common::Harness| {
        h.hardware.calls().iter().any(|call| {
            matches!(call, HardwareCall::MoveTo { mount: Mount::Right, position, .. }
                if position.x == c2.x && position.y == c2.y)
        })
    };

    h.hardware.clear_calls();
    h.engine.add_command(move_to_well("p1000", "back", "A1"));
    h.engine.run_until_idle().await;
    assert!(through_c2(&h));

    h.engine.add_command(move_to_well("p1000", "front", "A1"));
    h.engine.run_until_idle().await;
    h.hardware.clear_calls();
    h.engine.add_command(move_to_well("p1000", "beside", "A1"));
    h.engine.run_until_idle().await;
    assert!(!through_c2(&h));
    assert!(h
        .engine
        .state()
        .commands()
        .all()
        .all(|c| c.status == CommandStatus::Succeeded));
}

#[tokio::test]
async fn labware_is_released_above_the_waste_chute() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    let tips_only = h.engine.add_command(grip_to(
        "plate",
        json!({ "kind": "addressableArea", "addressableAreaName": "1ChannelWasteChute" }),
    ));
    h.engine.add_command(grip_to(
        "plate",
        json!({ "kind": "addressableArea", "addressableAreaName": "gripperWasteChute" }),
    ));
    h.engine.play();
    h.engine.run_until_idle().await;

    assert_eq!(error_type(&h, &tips_only), "InvalidMoveDestination");
    let state = h.engine.state();
    assert_eq!(state.labware().location("plate").unwrap(), &LabwareLocation::OffDeck);
    let chute = state.addressable_areas().check_area("gripperWasteChute").unwrap();
    assert_eq!(
        last_move(&h, Mount::Extension),
        Some(chute.top_center() + point(0.0, 0.0, WASTE_CHUTE_DROP_HEIGHT))
    );
    assert!(!h.hardware.jaw_closed());
}

#[tokio::test]
async fn a_closed_thermocycler_lid_blocks_pipetting() {
    let hardware = SimulatedHardware::builder()
        .pipette(MountType::Left, "p50_single")
        .module("TC-1", ModuleModel::ThermocyclerModuleV2)
        .build();
    let mut h = harness(hardware, continue_on_error()).await;
    h.engine.add_command(load_module("thermocyclerModuleV2", "B1", "tc"));
    h.engine.add_command(load_on_module("wellplate_96_360ul_flat", "plate", "tc"));
    h.engine.add_command(load_labware("tiprack_50ul", "tips", "C2"));
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &["tips"]));
    h.engine.add_command(pick_up_tip("p50", "tips", "A1"));
    let closed = h
        .engine
        .add_command(liquid_command("aspirate", "p50", "plate", "A1", 10.0));
    h.engine.add_command(module_command("thermocycler/openLid", "tc"));
    let open = h
        .engine
        .add_command(liquid_command("aspirate", "p50", "plate", "A1", 10.0));
    h.engine.play();
    h.engine.run_until_idle().await;

    assert_eq!(error_type(&h, &closed), "ThermocyclerLidClosed");
    assert_eq!(
        h.engine.state().commands().get(&open).unwrap().status,
        CommandStatus::Succeeded
    );
    assert_eq!(h.engine.state().pipettes().known_volume("p50").unwrap(), 10.0);
    assert!(h.hardware.calls().iter().any(|c| matches!(
        c,
        HardwareCall::ModuleCommand { serial_number, .. } if serial_number == "TC-1"
    )));
}

#[tokio::test]
async fn heater_shaker_latch_and_shaking_gate_access() {
    let mut h = harness(
        SimulatedHardware::builder()
            .pipette(MountType::Left, "p50_single")
            .gripper(true)
            .module("HS-1", ModuleModel::HeaterShakerModuleV1)
            .build(),
        continue_on_error(),
    )
    .await;
    h.engine.add_command(load_module("heaterShakerModuleV1", "D1", "hs"));
    h.engine.add_command(load_on_module("wellplate_96_360ul_flat", "plate", "hs"));
    h.engine.add_command(load_labware("tiprack_50ul", "tips", "C2"));
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &["tips"]));
    h.engine.add_command(pick_up_tip("p50", "tips", "A1"));
    let shake = |rpm: u32| {
        command(json!({
            "commandType": "heaterShaker/setShakeSpeed",
            "params": { "moduleId": "hs", "rpm": rpm }
        }))
    };
    let unlatched = h.engine.add_command(shake(500));
    h.engine.add_command(module_command("heaterShaker/closeLabwareLatch", "hs"));
    let too_fast = h.engine.add_command(shake(5000));
    h.engine.add_command(shake(500));
    let shaking = h
        .engine
        .add_command(liquid_command("aspirate", "p50", "plate", "A1", 10.0));
    let opened_while_shaking = h
        .engine
        .add_command(module_command("heaterShaker/openLabwareLatch", "hs"));
    h.engine.add_command(module_command("heaterShaker/deactivateShaker", "hs"));
    let latched = h.engine.add_command(grip_to(
        "plate",
        json!({ "kind": "deckSlot", "slotName": "D2" }),
    ));
    h.engine.play();
    h.engine.run_until_idle().await;

    assert_eq!(error_type(&h, &unlatched), "HeaterShakerLatch");
    assert_eq!(error_type(&h, &too_fast), "InvalidTarget");
    assert_eq!(error_type(&h, &shaking), "HeaterShakerShaking");
    assert_eq!(error_type(&h, &opened_while_shaking), "HeaterShakerShaking");
    assert_eq!(error_type(&h, &latched), "HeaterShakerLatch");
    assert!(!h.hardware.calls().iter().any(HardwareCall::is_gripper_call));

    h.engine.add_command(module_command("heaterShaker/openLabwareLatch", "hs"));
    let moved = h.engine.add_command(grip_to(
        "plate",
        json!({ "kind": "deckSlot", "slotName": "D2" }),
    ));
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    assert_eq!(state.commands().get(&moved).unwrap().status, CommandStatus::Succeeded);
    assert_eq!(state.labware().location("plate").unwrap(), &LabwareLocation::slot("D2"));
    assert!(h.hardware.calls().iter().any(HardwareCall::is_gripper_call));
}
