//! Commands: the closed set of things a protocol can ask the robot to do.
//!
//! [`CommandRequest`] is a tagged union keyed by `commandType`; every variant
//! carries its own params struct. Unknown tags fail deserialisation, so a
//! malformed command never reaches the queue.
//!
//! Implementations live in the submodules, grouped by the equipment they
//! touch. Each one receives the current [`EngineState`] as a read-only
//! snapshot and the [`EngineContext`] for hardware and definitions, and
//! returns either a [`CommandSuccess`] or a [`CommandFailure`]. Neither
//! mutates state: the executor dispatches the carried [`StateUpdate`].

mod labware;
mod modules;
mod pipetting;
mod system;

use crate::context::EngineContext;
use crate::state::EngineState;
use crate::state_update::StateUpdate;
use chrono::{DateTime, Utc};
use deck_core::definitions::ModuleModel;
use deck_core::error::{EngineError, ErrorOccurrence};
use deck_core::hardware::HardwareError;
use deck_core::types::{
    DeckSlotLocation, LabwareLocation, LabwareMovementStrategy, MotorAxis, MountType, Point,
    WellLocation, WellOffset,
};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_namespace() -> String {
    "std".to_string()
}

fn default_version() -> u32 {
    1
}

// =============================================================================
// Params
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadLabwareParams {
    pub load_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub location: LabwareLocation,
    #[serde(default)]
    pub labware_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Place a lid on a compatible labware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadLidParams {
    pub load_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Must be on a labware
    pub location: LabwareLocation,
    #[serde(default)]
    pub labware_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadLidStackParams {
    pub load_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub location: LabwareLocation,
    pub quantity: u32,
    #[serde(default)]
    pub stack_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveLabwareParams {
    pub labware_id: String,
    pub new_location: LabwareLocation,
    #[serde(default)]
    pub strategy: LabwareMovementStrategy,
    /// Extra offset applied to the grip point
    #[serde(default)]
    pub pick_up_offset: Option<WellOffset>,
    /// Extra offset applied to the release point
    #[serde(default)]
    pub drop_offset: Option<WellOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPipetteParams {
    pub pipette_name: String,
    pub mount: MountType,
    #[serde(default)]
    pub pipette_id: Option<String>,
    /// Racks searched, in order, when a pick-up names no labware
    #[serde(default)]
    pub tip_rack_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModuleParams {
    pub model: ModuleModel,
    pub location: DeckSlotLocation,
    #[serde(default)]
    pub module_id: Option<String>,
}

/// Pick up a tip. Without `labwareId` the pipette's tip racks are searched;
/// without `wellName` the next clean well is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickUpTipParams {
    pub pipette_id: String,
    #[serde(default)]
    pub labware_id: Option<String>,
    #[serde(default)]
    pub well_name: Option<String>,
    #[serde(default)]
    pub well_location: WellLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTipParams {
    pub pipette_id: String,
    pub labware_id: String,
    pub well_name: String,
    #[serde(default)]
    pub well_location: WellLocation,
    #[serde(default)]
    pub home_after: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTipInPlaceParams {
    pub pipette_id: String,
    #[serde(default)]
    pub home_after: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspirateParams {
    pub pipette_id: String,
    pub labware_id: String,
    pub well_name: String,
    #[serde(default)]
    pub well_location: WellLocation,
    /// µL
    pub volume: f64,
    /// µL/s; the pipette default when absent
    #[serde(default)]
    pub flow_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseParams {
    pub pipette_id: String,
    pub labware_id: String,
    pub well_name: String,
    #[serde(default)]
    pub well_location: WellLocation,
    pub volume: f64,
    #[serde(default)]
    pub flow_rate: Option<f64>,
    /// Extra plunger travel past the dispense position, in µL
    #[serde(default)]
    pub push_out: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToWellParams {
    pub pipette_id: String,
    pub labware_id: String,
    pub well_name: String,
    #[serde(default)]
    pub well_location: WellLocation,
    #[serde(default)]
    pub minimum_z_height: Option<f64>,
    #[serde(default)]
    pub force_direct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToAddressableAreaParams {
    pub pipette_id: String,
    pub addressable_area_name: String,
    #[serde(default)]
    pub offset: WellOffset,
    #[serde(default)]
    pub minimum_z_height: Option<f64>,
    #[serde(default)]
    pub force_direct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidProbeParams {
    pub pipette_id: String,
    pub labware_id: String,
    pub well_name: String,
    #[serde(default)]
    pub well_location: WellLocation,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeParams {
    /// Every axis when absent
    #[serde(default)]
    pub axes: Option<Vec<MotorAxis>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForResumeParams {
    #[serde(default)]
    pub message: Option<String>,
}

/// Params for module commands that only name the module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleParams {
    pub module_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngageMagnetParams {
    pub module_id: String,
    /// mm above the home position
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTemperatureParams {
    pub module_id: String,
    pub celsius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetShakeSpeedParams {
    pub module_id: String,
    pub rpm: u32,
}

// =============================================================================
// Requests
// =============================================================================

/// Every command the engine understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", content = "params", rename_all = "camelCase")]
pub enum CommandRequest {
    LoadLabware(LoadLabwareParams),
    LoadLid(LoadLidParams),
    LoadLidStack(LoadLidStackParams),
    MoveLabware(MoveLabwareParams),
    LoadPipette(LoadPipetteParams),
    LoadModule(LoadModuleParams),
    PickUpTip(PickUpTipParams),
    DropTip(DropTipParams),
    DropTipInPlace(DropTipInPlaceParams),
    Aspirate(AspirateParams),
    Dispense(DispenseParams),
    MoveToWell(MoveToWellParams),
    MoveToAddressableArea(MoveToAddressableAreaParams),
    LiquidProbe(LiquidProbeParams),
    Home(HomeParams),
    WaitForResume(WaitForResumeParams),
    #[serde(rename = "magneticModule/engage")]
    EngageMagnet(EngageMagnetParams),
    #[serde(rename = "magneticModule/disengage")]
    DisengageMagnet(ModuleParams),
    #[serde(rename = "temperatureModule/setTargetTemperature")]
    SetTargetTemperature(SetTemperatureParams),
    #[serde(rename = "temperatureModule/deactivate")]
    DeactivateTemperature(ModuleParams),
    #[serde(rename = "thermocycler/openLid")]
    OpenLid(ModuleParams),
    #[serde(rename = "thermocycler/closeLid")]
    CloseLid(ModuleParams),
    #[serde(rename = "thermocycler/setTargetBlockTemperature")]
    SetTargetBlockTemperature(SetTemperatureParams),
    #[serde(rename = "heaterShaker/openLabwareLatch")]
    OpenLabwareLatch(ModuleParams),
    #[serde(rename = "heaterShaker/closeLabwareLatch")]
    CloseLabwareLatch(ModuleParams),
    #[serde(rename = "heaterShaker/setShakeSpeed")]
    SetShakeSpeed(SetShakeSpeedParams),
    #[serde(rename = "heaterShaker/deactivateShaker")]
    DeactivateShaker(ModuleParams),
}

impl CommandRequest {
    /// Wire tag of the command.
    pub fn command_type(&self) -> &'static str {
        match self {
            CommandRequest::LoadLabware(_) => "loadLabware",
            CommandRequest::LoadLid(_) => "loadLid",
            CommandRequest::LoadLidStack(_) => "loadLidStack",
            CommandRequest::MoveLabware(_) => "moveLabware",
            CommandRequest::LoadPipette(_) => "loadPipette",
            CommandRequest::LoadModule(_) => "loadModule",
            CommandRequest::PickUpTip(_) => "pickUpTip",
            CommandRequest::DropTip(_) => "dropTip",
            CommandRequest::DropTipInPlace(_) => "dropTipInPlace",
            CommandRequest::Aspirate(_) => "aspirate",
            CommandRequest::Dispense(_) => "dispense",
            CommandRequest::MoveToWell(_) => "moveToWell",
            CommandRequest::MoveToAddressableArea(_) => "moveToAddressableArea",
            CommandRequest::LiquidProbe(_) => "liquidProbe",
            CommandRequest::Home(_) => "home",
            CommandRequest::WaitForResume(_) => "waitForResume",
            CommandRequest::EngageMagnet(_) => "magneticModule/engage",
            CommandRequest::DisengageMagnet(_) => "magneticModule/disengage",
            CommandRequest::SetTargetTemperature(_) => "temperatureModule/setTargetTemperature",
            CommandRequest::DeactivateTemperature(_) => "temperatureModule/deactivate",
            CommandRequest::OpenLid(_) => "thermocycler/openLid",
            CommandRequest::CloseLid(_) => "thermocycler/closeLid",
            CommandRequest::SetTargetBlockTemperature(_) => {
                "thermocycler/setTargetBlockTemperature"
            }
            CommandRequest::OpenLabwareLatch(_) => "heaterShaker/openLabwareLatch",
            CommandRequest::CloseLabwareLatch(_) => "heaterShaker/closeLabwareLatch",
            CommandRequest::SetShakeSpeed(_) => "heaterShaker/setShakeSpeed",
            CommandRequest::DeactivateShaker(_) => "heaterShaker/deactivateShaker",
        }
    }

    /// Whether the run pauses for the operator once this command succeeds.
    pub fn pauses_run(&self) -> bool {
        match self {
            CommandRequest::WaitForResume(_) => true,
            CommandRequest::MoveLabware(params) => {
                params.strategy == LabwareMovementStrategy::ManualMoveWithPause
            }
            _ => false,
        }
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_type())
    }
}

/// A command as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCreate {
    #[serde(flatten)]
    pub request: CommandRequest,
    /// Client-chosen idempotency key
    #[serde(default)]
    pub key: Option<String>,
}

// =============================================================================
// Records
// =============================================================================

/// Lifecycle of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// What a successful command reports back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    #[serde(rename_all = "camelCase")]
    LoadLabware {
        labware_id: String,
        definition_uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LoadLidStack {
        stack_id: String,
        labware_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    MoveLabware {
        #[serde(skip_serializing_if = "Option::is_none")]
        offset_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LoadPipette { pipette_id: String },
    #[serde(rename_all = "camelCase")]
    LoadModule {
        module_id: String,
        serial_number: String,
        model: ModuleModel,
    },
    #[serde(rename_all = "camelCase")]
    PickUpTip {
        tip_volume: f64,
        tip_length: f64,
        position: Point,
    },
    #[serde(rename_all = "camelCase")]
    Volume { volume: f64, position: Point },
    #[serde(rename_all = "camelCase")]
    LiquidProbe {
        /// Liquid height above the well bottom
        z_position: f64,
        position: Point,
    },
    #[serde(rename_all = "camelCase")]
    Position { position: Point },
    Empty {},
}

/// One command and everything that happened to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(flatten)]
    pub request: CommandRequest,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOccurrence>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Command {
    /// A freshly queued command.
    pub fn queued(
        id: String,
        key: Option<String>,
        request: CommandRequest,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            key,
            request,
            status: CommandStatus::Queued,
            result: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

/// A command that completed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSuccess {
    pub result: CommandResult,
    pub state_update: StateUpdate,
}

impl CommandSuccess {
    pub fn new(result: CommandResult, state_update: StateUpdate) -> Self {
        Self {
            result,
            state_update,
        }
    }
}

/// A command that failed, with the state the failure left behind.
///
/// Validation failures carry an empty update; defined failures carry the
/// true post-failure physical state.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    pub error: EngineError,
    pub state_update: StateUpdate,
}

impl CommandFailure {
    pub fn with_update(error: impl Into<EngineError>, state_update: StateUpdate) -> Self {
        Self {
            error: error.into(),
            state_update,
        }
    }
}

impl From<EngineError> for CommandFailure {
    fn from(error: EngineError) -> Self {
        Self::with_update(error, StateUpdate::new())
    }
}

impl From<HardwareError> for CommandFailure {
    fn from(error: HardwareError) -> Self {
        Self::from(hardware_error(error))
    }
}

pub type ExecutionResult = Result<CommandSuccess, CommandFailure>;

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Default classification of adapter failures that a command did not anticipate.
pub(crate) fn hardware_error(error: HardwareError) -> EngineError {
    match error {
        HardwareError::Cancelled => EngineError::RunStopped,
        HardwareError::GripperNotAttached => EngineError::GripperNotAttached,
        other => EngineError::Hardware(other),
    }
}

/// Run the implementation of `request` against a snapshot of `state`.
pub async fn execute(
    request: &CommandRequest,
    state: &EngineState,
    ctx: &EngineContext,
) -> ExecutionResult {
    match request {
        CommandRequest::LoadLabware(params) => labware::load_labware(params, state, ctx).await,
        CommandRequest::LoadLid(params) => labware::load_lid(params, state, ctx).await,
        CommandRequest::LoadLidStack(params) => labware::load_lid_stack(params, state, ctx).await,
        CommandRequest::MoveLabware(params) => labware::move_labware(params, state, ctx).await,
        CommandRequest::LoadPipette(params) => pipetting::load_pipette(params, state, ctx).await,
        CommandRequest::PickUpTip(params) => pipetting::pick_up_tip(params, state, ctx).await,
        CommandRequest::DropTip(params) => pipetting::drop_tip(params, state, ctx).await,
        CommandRequest::DropTipInPlace(params) => {
            pipetting::drop_tip_in_place(params, state, ctx).await
        }
        CommandRequest::Aspirate(params) => pipetting::aspirate(params, state, ctx).await,
        CommandRequest::Dispense(params) => pipetting::dispense(params, state, ctx).await,
        CommandRequest::MoveToWell(params) => pipetting::move_to_well(params, state, ctx).await,
        CommandRequest::MoveToAddressableArea(params) => {
            pipetting::move_to_addressable_area(params, state, ctx).await
        }
        CommandRequest::LiquidProbe(params) => pipetting::liquid_probe(params, state, ctx).await,
        CommandRequest::Home(params) => system::home(params, ctx).await,
        CommandRequest::WaitForResume(params) => system::wait_for_resume(params),
        CommandRequest::LoadModule(params) => modules::load_module(params, state, ctx).await,
        CommandRequest::EngageMagnet(params) => modules::engage_magnet(params, state, ctx).await,
        CommandRequest::DisengageMagnet(params) => {
            modules::disengage_magnet(params, state, ctx).await
        }
        CommandRequest::SetTargetTemperature(params) => {
            modules::set_target_temperature(params, state, ctx).await
        }
        CommandRequest::DeactivateTemperature(params) => {
            modules::deactivate_temperature(params, state, ctx).await
        }
        CommandRequest::OpenLid(params) => modules::set_lid(params, true, state, ctx).await,
        CommandRequest::CloseLid(params) => modules::set_lid(params, false, state, ctx).await,
        CommandRequest::SetTargetBlockTemperature(params) => {
            modules::set_block_temperature(params, state, ctx).await
        }
        CommandRequest::OpenLabwareLatch(params) => {
            modules::set_latch(params, true, state, ctx).await
        }
        CommandRequest::CloseLabwareLatch(params) => {
            modules::set_latch(params, false, state, ctx).await
        }
        CommandRequest::SetShakeSpeed(params) => {
            modules::set_shake_speed(params, state, ctx).await
        }
        CommandRequest::DeactivateShaker(params) => {
            modules::deactivate_shaker(params, state, ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_type_matches_wire_tag() {
        let create: CommandCreate = serde_json::from_value(json!({
            "commandType": "heaterShaker/setShakeSpeed",
            "params": {"moduleId": "hs", "rpm": 500},
            "key": "k1"
        }))
        .unwrap();
        assert_eq!(create.request.command_type(), "heaterShaker/setShakeSpeed");
        assert_eq!(create.key.as_deref(), Some("k1"));
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let parsed = serde_json::from_value::<CommandCreate>(json!({
            "commandType": "teleport",
            "params": {}
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn command_record_wire_shape() {
        let command = Command::queued(
            "c1".into(),
            None,
            CommandRequest::Home(HomeParams::default()),
            Utc::now(),
        );
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["id"], "c1");
        assert_eq!(value["commandType"], "home");
        assert_eq!(value["status"], "queued");
        assert!(value.get("result").is_none());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn manual_move_with_pause_pauses_the_run() {
        let request = CommandRequest::MoveLabware(MoveLabwareParams {
            labware_id: "plate".into(),
            new_location: LabwareLocation::slot("D2"),
            strategy: LabwareMovementStrategy::ManualMoveWithPause,
            pick_up_offset: None,
            drop_offset: None,
        });
        assert!(request.pauses_run());
        assert!(!CommandRequest::Home(HomeParams::default()).pauses_run());
    }
}
