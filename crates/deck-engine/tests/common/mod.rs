//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use deck_core::types::MountType;
use deck_engine::{
    CommandCreate, CommandRequest, DeckConfiguration, EngineConfig, EngineContext, ProtocolEngine,
    RecoveryPolicy,
};
use deck_hardware::{BuiltinCatalog, SimulatedHardware};
use serde_json::Value;
use std::sync::Arc;

pub struct Harness {
    pub engine: ProtocolEngine,
    pub hardware: Arc<SimulatedHardware>,
}

pub async fn harness(hardware: SimulatedHardware, config: EngineConfig) -> Harness {
    harness_with_deck(hardware, config, DeckConfiguration::Inferred).await
}

pub async fn harness_with_deck(
    hardware: SimulatedHardware,
    config: EngineConfig,
    deck: DeckConfiguration,
) -> Harness {
    let hardware = Arc::new(hardware);
    let context = EngineContext::new(hardware.clone(), Arc::new(BuiltinCatalog::new()), config);
    let engine = ProtocolEngine::new(context, deck).await.unwrap();
    Harness { engine, hardware }
}

/// Keep running after recoverable failures.
pub fn continue_on_error() -> EngineConfig {
    EngineConfig {
        recovery_policy: RecoveryPolicy::Continue,
        ..Default::default()
    }
}

/// Left p50, right p1000, gripper attached.
pub fn default_robot() -> SimulatedHardware {
    SimulatedHardware::builder()
        .pipette(MountType::Left, "p50_single")
        .pipette(MountType::Right, "p1000_single")
        .gripper(true)
        .build()
}

pub fn command(value: Value) -> CommandCreate {
    serde_json::from_value(value).unwrap()
}

pub fn request(value: Value) -> CommandRequest {
    serde_json::from_value(value).unwrap()
}

pub fn load_labware(load_name: &str, labware_id: &str, slot: &str) -> CommandCreate {
    command(serde_json::json!({
        "commandType": "loadLabware",
        "params": {
            "loadName": load_name,
            "labwareId": labware_id,
            "location": { "kind": "deckSlot", "slotName": slot }
        }
    }))
}

pub fn load_pipette(name: &str, mount: &str, pipette_id: &str, tip_racks: &[&str]) -> CommandCreate {
    command(serde_json::json!({
        "commandType": "loadPipette",
        "params": {
            "pipetteName": name,
            "mount": mount,
            "pipetteId": pipette_id,
            "tipRackIds": tip_racks
        }
    }))
}

pub fn pick_up_tip(pipette_id: &str, labware_id: &str, well: &str) -> CommandCreate {
    command(serde_json::json!({
        "commandType": "pickUpTip",
        "params": { "pipetteId": pipette_id, "labwareId": labware_id, "wellName": well }
    }))
}

pub fn move_to_area(pipette_id: &str, area: &str) -> CommandCreate {
    command(serde_json::json!({
        "commandType": "moveToAddressableArea",
        "params": { "pipetteId": pipette_id, "addressableAreaName": area }
    }))
}

pub fn liquid_command(command_type: &str, pipette_id: &str, labware_id: &str, well: &str, volume: f64) -> CommandCreate {
    command(serde_json::json!({
        "commandType": command_type,
        "params": {
            "pipetteId": pipette_id,
            "labwareId": labware_id,
            "wellName": well,
            "volume": volume
        }
    }))
}
