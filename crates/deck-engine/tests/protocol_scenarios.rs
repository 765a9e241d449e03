//! End-to-end protocols against the simulated robot.

mod common;

use common::{
    command, continue_on_error, default_robot, harness, liquid_command, load_labware,
    load_pipette, move_to_area, pick_up_tip,
};
use deck_core::definitions::ModuleModel;
use deck_core::error::ErrorKind;
use deck_core::types::MountType;
use deck_engine::{Action, CommandOutcome, CommandStatus, EngineConfig, RunStatus};
use deck_hardware::{HardwareCall, SimulatedHardware};
use serde_json::json;
use std::collections::HashMap;

#[tokio::test]
async fn aspirates_from_a_plate_after_picking_up_a_tip() {
    let mut h = harness(default_robot(), EngineConfig::default()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(load_labware("tiprack_50ul", "tips", "A1"));
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &["tips"]));
    h.engine.add_command(pick_up_tip("p50", "tips", "A1"));
    h.engine.add_command(liquid_command("aspirate", "p50", "plate", "A1", 50.0));
    h.engine.play();

    assert_eq!(h.engine.run_until_idle().await, RunStatus::Running);

    let state = h.engine.state();
    assert!(state.commands().all().all(|c| c.status == CommandStatus::Succeeded));
    assert_eq!(state.pipettes().known_volume("p50").unwrap(), 50.0);
    assert!(state.pipettes().get("p50").unwrap().tip.is_some());
    assert_eq!(state.tips().used_count("tips").unwrap(), 1);
    let used: Vec<&str> = state
        .addressable_areas()
        .used_areas()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(used, vec!["A1", "C2"]);

    assert!(h.hardware.has_tip(MountType::Left));
    assert_eq!(h.hardware.plunger_volume(MountType::Left), 50.0);

    let summary = h.engine.finish();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.counts(), (5, 0));
}

#[tokio::test]
async fn second_module_in_a_cutout_is_an_area_conflict() {
    let hardware = SimulatedHardware::builder()
        .module("TM-1", ModuleModel::TemperatureModuleV2)
        .module("HS-1", ModuleModel::HeaterShakerModuleV1)
        .build();
    let mut h = harness(hardware, EngineConfig::default()).await;
    h.engine.add_command(command(json!({
        "commandType": "loadModule",
        "params": { "model": "temperatureModuleV2", "location": { "slotName": "D1" }, "moduleId": "temp" }
    })));
    h.engine.play();
    assert!(matches!(h.engine.execute_next().await, CommandOutcome::Succeeded { .. }));

    let fixtures_before = h
        .engine
        .state()
        .addressable_areas()
        .potential_fixtures("cutoutD1")
        .cloned();
    assert_eq!(
        fixtures_before.iter().flatten().map(String::as_str).collect::<Vec<_>>(),
        vec!["temperatureModuleV2"]
    );

    let failing = h.engine.add_command(command(json!({
        "commandType": "loadModule",
        "params": { "model": "heaterShakerModuleV1", "location": { "slotName": "D1" } }
    })));
    assert_eq!(
        h.engine.execute_next().await,
        CommandOutcome::Failed {
            command_id: failing.clone(),
            kind: ErrorKind::Defined
        }
    );

    let state = h.engine.state();
    let error = state.commands().get(&failing).unwrap().error.clone().unwrap();
    assert_eq!(error.error_type, "IncompatibleAddressableArea");
    assert_eq!(error.error_info["cutoutId"], json!("cutoutD1"));
    assert_eq!(error.error_info["conflictingAreas"], json!(["temperatureModuleV2D1"]));

    let used: Vec<&str> = state
        .addressable_areas()
        .used_areas()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(used, vec!["temperatureModuleV2D1"]);
    assert_eq!(
        state.addressable_areas().potential_fixtures("cutoutD1").cloned(),
        fixtures_before
    );
    assert_eq!(state.modules().all().count(), 1);
    assert_eq!(state.commands().run_status(), RunStatus::Failed);
}

/// Run two commands in order and report whether the second one failed.
async fn second_fails(first: deck_engine::CommandCreate, second: deck_engine::CommandCreate) -> bool {
    let mut h = harness(default_robot(), EngineConfig::default()).await;
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &[]));
    h.engine.add_command(first);
    let second_id = h.engine.add_command(second);
    h.engine.play();
    h.engine.run_until_idle().await;
    h.engine.state().commands().get(&second_id).unwrap().status == CommandStatus::Failed
}

#[tokio::test]
async fn area_conflicts_do_not_depend_on_order() {
    let plate_d3 = || load_labware("wellplate_96_360ul_flat", "plate", "D3");
    let chute = || move_to_area("p50", "1ChannelWasteChute");
    assert!(second_fails(plate_d3(), chute()).await);
    assert!(second_fails(chute(), plate_d3()).await);

    // A staging slot shares the right-hand cutout with its column-3 neighbour.
    let plate_c3 = || load_labware("wellplate_96_360ul_flat", "plate", "C3");
    let staged = || {
        command(json!({
            "commandType": "loadLabware",
            "params": {
                "loadName": "reservoir_12_15ml",
                "labwareId": "reservoir",
                "location": { "kind": "addressableArea", "addressableAreaName": "C4" }
            }
        }))
    };
    assert!(!second_fails(plate_c3(), staged()).await);
    assert!(!second_fails(staged(), plate_c3()).await);
}

#[tokio::test]
async fn failed_loads_do_not_claim_areas() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    for (i, slot) in ["A1", "A2", "B2", "C2", "D2"].iter().enumerate() {
        h.engine
            .add_command(load_labware("wellplate_96_360ul_flat", &format!("plate-{}", i), slot));
    }
    h.engine
        .add_command(load_labware("wellplate_96_360ul_flat", "duplicate", "C2"));
    h.engine.play();

    assert_eq!(h.engine.run_until_idle().await, RunStatus::Running);
    let state = h.engine.state();
    assert_eq!(state.addressable_areas().used_count(), 5);
    assert_eq!(state.labware().len(), 5);
    assert!(state.labware().get("duplicate").is_err());
    let failed = state
        .commands()
        .all()
        .filter(|c| c.status == CommandStatus::Failed)
        .count();
    assert_eq!(failed, 1);
    // Continuing past a failure does not make it a run error.
    assert!(state.commands().run_errors().is_empty());
}

#[tokio::test]
async fn rejected_volumes_never_reach_the_plunger() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(load_labware("tiprack_50ul", "tips", "A1"));
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &["tips"]));
    h.engine.add_command(pick_up_tip("p50", "tips", "A1"));
    h.engine.play();
    h.engine.run_until_idle().await;
    h.hardware.clear_calls();

    let steps = [
        ("aspirate", 30.0, true),
        ("aspirate", 30.0, false),
        ("dispense", 40.0, false),
        ("dispense", 30.0, true),
    ];
    for (command_type, volume, accepted) in steps {
        let id = h
            .engine
            .add_command(liquid_command(command_type, "p50", "plate", "B1", volume));
        let outcome = h.engine.execute_next().await;
        if accepted {
            assert_eq!(outcome, CommandOutcome::Succeeded { command_id: id });
        } else {
            assert_eq!(
                outcome,
                CommandOutcome::Failed {
                    command_id: id,
                    kind: ErrorKind::Validation
                }
            );
        }
        let volume = h.engine.state().pipettes().known_volume("p50").unwrap();
        assert!((0.0..=50.0).contains(&volume));
    }

    let calls = h.hardware.calls();
    let aspirates = calls
        .iter()
        .filter(|c| matches!(c, HardwareCall::Aspirate { .. }))
        .count();
    let dispenses = calls
        .iter()
        .filter(|c| matches!(c, HardwareCall::Dispense { .. }))
        .count();
    assert_eq!((aspirates, dispenses), (1, 1));
    assert_eq!(h.engine.state().pipettes().known_volume("p50").unwrap(), 0.0);
    assert_eq!(h.hardware.plunger_volume(MountType::Left), 0.0);
}

#[tokio::test]
async fn moving_to_the_current_well_issues_no_motion() {
    let mut h = harness(default_robot(), EngineConfig::default()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(load_pipette("p1000_single", "right", "p1000", &[]));
    let move_to_well = || {
        command(json!({
            "commandType": "moveToWell",
            "params": { "pipetteId": "p1000", "labwareId": "plate", "wellName": "D4" }
        }))
    };
    h.engine.add_command(move_to_well());
    h.engine.play();
    h.engine.run_until_idle().await;
    assert!(h
        .hardware
        .calls()
        .iter()
        .any(|c| matches!(c, HardwareCall::MoveTo { .. })));

    h.hardware.clear_calls();
    let again = h.engine.add_command(move_to_well());
    assert_eq!(
        h.engine.execute_next().await,
        CommandOutcome::Succeeded { command_id: again }
    );
    assert!(!h
        .hardware
        .calls()
        .iter()
        .any(|c| matches!(c, HardwareCall::MoveTo { .. } | HardwareCall::MoveRel { .. })));
}

#[tokio::test]
async fn moving_labware_onto_itself_never_touches_the_gripper() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.play();
    h.engine.run_until_idle().await;

    // The slot and the addressable area of the same name are one place.
    let same_places = [
        json!({ "kind": "deckSlot", "slotName": "C2" }),
        json!({ "kind": "addressableArea", "addressableAreaName": "C2" }),
    ];
    for new_location in same_places {
        let nowhere = h.engine.add_command(command(json!({
            "commandType": "moveLabware",
            "params": { "labwareId": "plate", "newLocation": new_location, "strategy": "usingGripper" }
        })));
        h.engine.run_until_idle().await;

        let state = h.engine.state();
        let error = state.commands().get(&nowhere).unwrap().error.clone().unwrap();
        assert_eq!(error.error_type, "InvalidMoveDestination");
        assert!(!h.hardware.calls().iter().any(HardwareCall::is_gripper_call));
    }

    h.engine.add_command(command(json!({
        "commandType": "moveLabware",
        "params": {
            "labwareId": "plate",
            "newLocation": { "kind": "deckSlot", "slotName": "D2" },
            "strategy": "usingGripper"
        }
    })));
    h.engine.run_until_idle().await;

    assert_eq!(
        h.engine.state().labware().location("plate").unwrap(),
        &deck_core::types::LabwareLocation::slot("D2".to_string())
    );
    assert!(h.hardware.calls().iter().any(HardwareCall::is_gripper_call));
    assert!(!h.hardware.jaw_closed());
}

fn load_in_area(load_name: &str, labware_id: &str, area: &str) -> deck_engine::CommandCreate {
    command(json!({
        "commandType": "loadLabware",
        "params": {
            "loadName": load_name,
            "labwareId": labware_id,
            "location": { "kind": "addressableArea", "addressableAreaName": area }
        }
    }))
}

#[tokio::test]
async fn a_slot_and_its_area_hold_one_labware() {
    let orders = [
        (load_labware("wellplate_96_360ul_flat", "first", "C2"), load_in_area("wellplate_96_360ul_flat", "second", "C2")),
        (load_in_area("wellplate_96_360ul_flat", "first", "C2"), load_labware("wellplate_96_360ul_flat", "second", "C2")),
    ];
    for (first, second) in orders {
        let mut h = harness(default_robot(), continue_on_error()).await;
        h.engine.add_command(first);
        let second = h.engine.add_command(second);
        h.engine.play();
        h.engine.run_until_idle().await;

        let state = h.engine.state();
        let error = state.commands().get(&second).unwrap().error.clone().unwrap();
        assert_eq!(error.error_type, "LocationIsOccupied");
        assert_eq!(state.labware().len(), 1);
        assert!(state.labware().get("second").is_err());
    }
}

#[tokio::test]
async fn a_module_slot_rejects_labware_addressed_by_area() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    h.engine.add_command(command(json!({
        "commandType": "loadModule",
        "params": { "model": "magneticBlockV1", "location": { "slotName": "C2" }, "moduleId": "block" }
    })));
    let onto_block = h
        .engine
        .add_command(load_in_area("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.play();
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    assert_eq!(state.modules().all().count(), 1);
    assert_eq!(state.commands().get(&onto_block).unwrap().status, CommandStatus::Failed);
    assert!(state.labware().is_empty());
}

#[tokio::test]
async fn a_module_cannot_load_under_labware_addressed_by_area() {
    let hardware = SimulatedHardware::builder()
        .module("TM-1", ModuleModel::TemperatureModuleV2)
        .build();
    let mut h = harness(hardware, continue_on_error()).await;
    h.engine
        .add_command(load_in_area("wellplate_96_360ul_flat", "plate", "D1"));
    let module = h.engine.add_command(command(json!({
        "commandType": "loadModule",
        "params": { "model": "temperatureModuleV2", "location": { "slotName": "D1" } }
    })));
    h.engine.play();
    h.engine.run_until_idle().await;

    let state = h.engine.state();
    assert_eq!(state.commands().get(&module).unwrap().status, CommandStatus::Failed);
    assert_eq!(state.modules().all().count(), 0);
}

#[tokio::test]
async fn unplannable_gripper_moves_fail_before_the_jaws_open() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    // Three adapters and a tall rack make D1 too high to carry another rack over.
    h.engine
        .add_command(load_labware("aluminum_block_adapter_96", "adapter-1", "D1"));
    for (id, below) in [("adapter-2", "adapter-1"), ("adapter-3", "adapter-2")] {
        h.engine.add_command(command(json!({
            "commandType": "loadLabware",
            "params": {
                "loadName": "aluminum_block_adapter_96",
                "labwareId": id,
                "location": { "kind": "onLabware", "labwareId": below }
            }
        })));
    }
    h.engine.add_command(command(json!({
        "commandType": "loadLabware",
        "params": {
            "loadName": "tiprack_1000ul",
            "labwareId": "tower",
            "location": { "kind": "onLabware", "labwareId": "adapter-3" }
        }
    })));
    h.engine.add_command(load_labware("tiprack_1000ul", "rack", "C2"));
    h.engine.play();
    h.engine.run_until_idle().await;
    h.hardware.clear_calls();

    let carry = h.engine.add_command(command(json!({
        "commandType": "moveLabware",
        "params": {
            "labwareId": "rack",
            "newLocation": { "kind": "deckSlot", "slotName": "D2" },
            "strategy": "usingGripper"
        }
    })));
    assert_eq!(
        h.engine.execute_next().await,
        CommandOutcome::Failed {
            command_id: carry.clone(),
            kind: ErrorKind::Validation
        }
    );

    let state = h.engine.state();
    let error = state.commands().get(&carry).unwrap().error.clone().unwrap();
    assert_eq!(error.error_type, "PlanningFailed");
    assert_eq!(
        state.labware().location("rack").unwrap(),
        &deck_core::types::LabwareLocation::slot("C2")
    );
    assert!(h.hardware.calls().is_empty());
    assert!(!h.hardware.jaw_closed());
}

#[tokio::test]
async fn command_status_only_moves_forward() {
    let mut h = harness(default_robot(), continue_on_error()).await;
    let mut observer = h.engine.subscribe();
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "again", "C2"));
    h.engine.add_command(load_pipette("p50_single", "left", "p50", &[]));
    h.engine.play();
    h.engine.run_until_idle().await;

    let mut transitions: HashMap<String, Vec<&'static str>> = HashMap::new();
    while let Ok(action) = observer.try_recv() {
        match action {
            Action::QueueCommand { command } => transitions.entry(command.id).or_default().push("queued"),
            Action::RunCommand { command_id, .. } => transitions.entry(command_id).or_default().push("running"),
            Action::SucceedCommand { command_id, .. } => {
                transitions.entry(command_id).or_default().push("succeeded")
            }
            Action::FailCommand { command_id, .. } => transitions.entry(command_id).or_default().push("failed"),
            _ => {}
        }
    }

    assert_eq!(transitions.len(), 3);
    let mut outcomes: Vec<&str> = transitions
        .values()
        .map(|steps| {
            assert_eq!(steps.len(), 3);
            assert_eq!(&steps[..2], &["queued", "running"]);
            steps[2]
        })
        .collect();
    outcomes.sort_unstable();
    assert_eq!(outcomes, vec!["failed", "succeeded", "succeeded"]);
}

#[tokio::test]
async fn labware_offsets_apply_to_matching_loads() {
    let mut h = harness(default_robot(), EngineConfig::default()).await;
    let plate_uri = deck_core::definitions::LabwareUri::new("std", "wellplate_96_360ul_flat", 1);
    let offset = h.engine.add_labware_offset(
        plate_uri,
        deck_engine::state::LabwareOffsetLocation {
            slot_name: "C2".to_string(),
            module_model: None,
        },
        deck_core::types::point(0.5, -0.25, 0.1),
    );
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "other", "D2"));
    h.engine.play();
    h.engine.run_until_idle().await;

    let labware = h.engine.state().labware();
    assert_eq!(labware.get("plate").unwrap().offset_id.as_deref(), Some(offset.id.as_str()));
    assert_eq!(labware.get("other").unwrap().offset_id, None);
    assert_eq!(
        labware.offset_vector("plate").unwrap(),
        deck_core::types::point(0.5, -0.25, 0.1)
    );
}

#[tokio::test]
async fn summary_serialises_for_clients() {
    let mut h = harness(default_robot(), EngineConfig::default()).await;
    h.engine.add_command(load_labware("wellplate_96_360ul_flat", "plate", "C2"));
    h.engine.add_command(command(json!({ "commandType": "home", "params": {} })));
    h.engine.play();
    h.engine.run_until_idle().await;
    let summary = h.engine.finish();

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["status"], json!("succeeded"));
    assert_eq!(value["commands"].as_array().unwrap().len(), 2);
    assert_eq!(value["commands"][0]["commandType"], json!("loadLabware"));
    assert_eq!(value["usedAddressableAreas"][0]["name"], json!("C2"));
    assert!(value["errors"].as_array().unwrap().is_empty());
}
