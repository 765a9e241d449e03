//! The run driver against the simulated robot, as the CLI uses it.

use deck_engine::{CommandStatus, RecoveryPolicy, RunStatus};
use deck_hardware::BuiltinCatalog;
use deckrun::config::DeckrunConfig;
use deckrun::{run_protocol, Protocol};
use serde_json::json;
use std::future::{pending, Future};
use std::time::Duration;
use tempfile::TempDir;

fn robot_config() -> DeckrunConfig {
    let mut config = DeckrunConfig::default();
    config.hardware.pipettes.left = Some("p50_single".to_string());
    config.hardware.gripper = true;
    config
}

fn never() -> impl Future<Output = ()> + Send + 'static {
    pending::<()>()
}

fn transfer_protocol(plate_namespace: &str) -> Protocol {
    let text = json!({
        "labwareOffsets": [{
            "definitionUri": format!("{}/wellplate_96_360ul_flat/1", plate_namespace),
            "location": { "slotName": "C2" },
            "vector": [0.5, 0.0, -0.25]
        }],
        "commands": [
            { "commandType": "home", "params": {} },
            {
                "commandType": "loadLabware",
                "params": {
                    "loadName": "tiprack_50ul",
                    "labwareId": "tips",
                    "location": { "kind": "deckSlot", "slotName": "A1" }
                }
            },
            {
                "commandType": "loadLabware",
                "params": {
                    "loadName": "wellplate_96_360ul_flat",
                    "namespace": plate_namespace,
                    "labwareId": "plate",
                    "location": { "kind": "deckSlot", "slotName": "C2" }
                }
            },
            {
                "commandType": "loadPipette",
                "params": { "pipetteName": "p50_single", "mount": "left", "pipetteId": "p50", "tipRackIds": ["tips"] }
            },
            {
                "commandType": "pickUpTip",
                "params": { "pipetteId": "p50", "labwareId": "tips", "wellName": "A1" }
            },
            {
                "commandType": "aspirate",
                "params": { "pipetteId": "p50", "labwareId": "plate", "wellName": "A1", "volume": 20.0 }
            },
            {
                "commandType": "dispense",
                "params": { "pipetteId": "p50", "labwareId": "plate", "wellName": "B1", "volume": 20.0 }
            }
        ]
    })
    .to_string();
    Protocol::from_json(&text).unwrap()
}

#[tokio::test]
async fn runs_a_transfer_with_custom_labware() {
    let dir = TempDir::new().unwrap();
    let mut plate = BuiltinCatalog::new()
        .all_labware()
        .unwrap()
        .into_iter()
        .find(|d| d.load_name() == "wellplate_96_360ul_flat")
        .unwrap();
    plate.namespace = "custom".to_string();
    std::fs::write(
        dir.path().join("plate.json"),
        serde_json::to_string(&plate).unwrap(),
    )
    .unwrap();

    let mut config = robot_config();
    config.labware.directories = vec![dir.path().to_path_buf()];

    let summary = run_protocol(&config, transfer_protocol("custom"), never())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.counts(), (7, 0));
    assert!(summary.errors.is_empty());
    let plate = summary.labware.iter().find(|l| l.id == "plate").unwrap();
    assert_eq!(plate.definition_uri.as_str(), "custom/wellplate_96_360ul_flat/1");
    assert!(plate.offset_id.is_some());
    assert_eq!(summary.labware_offsets.len(), 1);
}

#[tokio::test]
async fn missing_custom_labware_fails_the_run() {
    let summary = run_protocol(&robot_config(), transfer_protocol("custom"), never())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.errors.len(), 1);
    let failed: Vec<_> = summary
        .commands
        .iter()
        .filter(|c| c.status == CommandStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].request.command_type(), "loadLabware");
    // Nothing after the failure ran.
    assert_eq!(summary.counts(), (2, 1));
}

#[tokio::test]
async fn continue_policy_runs_past_failures() {
    let mut config = robot_config();
    config.engine.recovery_policy = RecoveryPolicy::Continue;

    let summary = run_protocol(&config, transfer_protocol("custom"), never())
        .await
        .unwrap();

    // The plate never loaded, so both liquid commands fail as well.
    assert_eq!(summary.counts(), (4, 3));
    assert_eq!(summary.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn interrupt_stops_a_paused_run() {
    let text = json!([
        { "commandType": "home", "params": {} },
        { "commandType": "waitForResume", "params": { "message": "Load the reagents" } },
        { "commandType": "home", "params": {} }
    ])
    .to_string();
    let protocol = Protocol::from_json(&text).unwrap();

    let summary = run_protocol(
        &robot_config(),
        protocol,
        tokio::time::sleep(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Stopped);
    assert_eq!(summary.counts(), (2, 0));
    assert_eq!(summary.commands[2].status, CommandStatus::Queued);
}

#[test]
fn protocol_file_errors_name_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("protocol.json");
    std::fs::write(&path, "{ \"commands\": 3 }").unwrap();

    let err = Protocol::load(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("protocol.json"));
}
