//! Error types for the engine.
//!
//! This module defines the primary error type, `EngineError`, for everything a
//! command can fail with. Using the `thiserror` crate, it provides a single,
//! consistent vocabulary for command failures, from bad parameters to
//! hardware faults.
//!
//! ## Error Taxonomy
//!
//! Every `EngineError` classifies itself into an [`ErrorKind`]:
//!
//! - **`Validation`**: bad parameters, locations that are not permitted,
//!   labware role mismatches, unknown ids. Detected before any hardware call;
//!   such a failure never leaves partial state.
//! - **`Defined`**: anticipated physical failures (overpressure, liquid not
//!   found, tip still attached, gripper errors, incompatible addressable
//!   areas). They carry enough context for the run driver to attempt
//!   recovery, and are always accompanied by a state update describing the
//!   true post-failure physical state.
//! - **`Fatal`**: unexpected hardware adapter failures. These stop the run
//!   unconditionally.
//!
//! Programming errors (asking a store about an id through an internal call
//! that was already validated, completing a command that is not running) are
//! not represented here; they are defects and fail loudly in debug builds.
//!
//! Errors recorded on a command are converted into an [`ErrorOccurrence`],
//! the serialisable record that clients see in command history.

use crate::hardware::{GripperErrorKind, HardwareError};
use crate::provider::DataProviderError;
use crate::types::{MountType, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Classification of an error for run-level continuation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Defined,
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Defined => "defined",
            ErrorKind::Fatal => "fatal",
        };
        write!(f, "{}", label)
    }
}

/// Errors from the motion planner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionPlanningError {
    /// The requested minimum travel height is above the maximum.
    #[error("Minimum travel height {min_travel_z} mm is above maximum {max_travel_z} mm")]
    TravelHeightConflict { min_travel_z: f64, max_travel_z: f64 },

    /// The destination is above the instrument's reachable height.
    #[error("Destination z {destination_z} mm is above maximum travel height {max_travel_z} mm")]
    DestinationOutOfBounds { destination_z: f64, max_travel_z: f64 },
}

/// Primary error type for command execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // =========================================================================
    // Unknown identifiers
    // =========================================================================
    /// No labware with this id has been loaded.
    #[error("Labware {0} not found")]
    LabwareNotFound(String),

    /// No pipette with this id has been loaded.
    #[error("Pipette {0} not found")]
    PipetteNotFound(String),

    /// No module with this id has been loaded.
    #[error("Module {0} not found")]
    ModuleNotFound(String),

    #[error("Command {0} not found")]
    CommandNotFound(String),

    #[error("Well {well_name} does not exist in labware {labware_id}")]
    WellDoesNotExist {
        labware_id: String,
        well_name: String,
    },

    /// Definition lookup failed.
    #[error("Definition lookup failed: {0}")]
    Definition(#[from] DataProviderError),

    // =========================================================================
    // Deck and addressable areas
    // =========================================================================
    /// The deck definition has no area with this name.
    #[error("Addressable area {0} does not exist on this deck")]
    AddressableAreaDoesNotExist(String),

    /// Concrete deck configuration mode: no configured fixture provides the area.
    ///
    /// **Recovery Strategy**: none within the run; the deck configuration on
    /// the robot has to change.
    #[error("Addressable area {area_name} is not provided by the fixture configured in {cutout_id}")]
    AreaNotInDeckConfiguration {
        area_name: String,
        cutout_id: String,
    },

    /// Two areas that share a cutout cannot be provided by any single fixture.
    ///
    /// Simulated deck configuration mode only: the deck layout is inferred
    /// from the areas a protocol uses, and this is raised the first time an
    /// inference becomes impossible.
    #[error(
        "Cannot use {area_name}: not compatible with {} already used in {cutout_id}",
        .conflicting_areas.join(", ")
    )]
    IncompatibleAddressableArea {
        area_name: String,
        cutout_id: String,
        conflicting_areas: Vec<String>,
    },

    // =========================================================================
    // Labware placement
    // =========================================================================
    /// The labware may not be placed at the requested location.
    #[error("{load_name} cannot be placed at {location}: {reason}")]
    InvalidLocation {
        load_name: String,
        location: String,
        reason: String,
    },

    #[error("{location} is already occupied by {occupant}")]
    LocationIsOccupied { location: String, occupant: String },

    /// Something is stacked on a labware that is being moved or stacked upon.
    #[error("Labware {labware_id} has labware {top_labware_id} on top of it")]
    LabwareHasLabwareOnTop {
        labware_id: String,
        top_labware_id: String,
    },

    #[error("{top_load_name} cannot be stacked on {bottom_load_name}")]
    LabwareCannotBeStacked {
        top_load_name: String,
        bottom_load_name: String,
    },

    /// Moving labware to where it already is.
    #[error("Labware {labware_id} cannot be moved: {reason}")]
    InvalidMoveDestination { labware_id: String, reason: String },

    #[error("Cannot stack {requested} lids of {load_name}; limit is {limit}")]
    LidStackLimitExceeded {
        load_name: String,
        requested: u32,
        limit: u32,
    },

    // =========================================================================
    // Pipettes and tips
    // =========================================================================
    #[error("A pipette ({pipette_id}) is already loaded on the {mount} mount")]
    MountOccupied { mount: MountType, pipette_id: String },

    #[error("Pipette {0} already has a tip attached")]
    TipAlreadyAttached(String),

    #[error("Pipette {0} has no tip attached")]
    TipNotAttached(String),

    #[error("Labware {0} is not a tip rack")]
    LabwareIsNotTipRack(String),

    /// At most one pick-up per tip rack well.
    #[error("Tip at {labware_id}/{well_name} has already been used")]
    TipNotAvailable {
        labware_id: String,
        well_name: String,
    },

    #[error("No clean tips left in {0}")]
    NoTipsAvailable(String),

    #[error("Cannot aspirate {requested} µL: pipette holds {current} µL of at most {max} µL")]
    InvalidAspirateVolume { requested: f64, current: f64, max: f64 },

    #[error("Cannot dispense {requested} µL: pipette holds {current} µL")]
    InvalidDispenseVolume { requested: f64, current: f64 },

    /// Volume in the tip is unknown after an earlier failure.
    #[error("Volume in pipette {0} is unknown")]
    PipetteVolumeUnknown(String),

    #[error("Pipette {0} must be empty before probing for liquid")]
    PipetteNotEmpty(String),

    /// A push-out left the plunger below its bottom with liquid still in the tip.
    #[error("Pipette {0} is not ready to aspirate after pushing out liquid")]
    PipetteNotReadyToAspirate(String),

    #[error("Gripper is not attached")]
    GripperNotAttached,

    // =========================================================================
    // Modules
    // =========================================================================
    #[error("No attached {0} module is available")]
    ModuleNotAttached(String),

    #[error("Module {module_id} is not a {expected}")]
    WrongModuleType { module_id: String, expected: String },

    /// Target outside the module's supported range.
    #[error("{parameter} {value} is outside the allowed range [{min}, {max}]")]
    InvalidTarget {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Thermocycler {0} lid is closed")]
    ThermocyclerLidClosed(String),

    #[error("Heater-shaker {0} is shaking")]
    HeaterShakerShaking(String),

    #[error("Heater-shaker {module_id} labware latch must be {required}")]
    HeaterShakerLatch { module_id: String, required: String },

    // =========================================================================
    // Motion
    // =========================================================================
    /// No valid path could be constructed.
    #[error("Motion planning failed: {0}")]
    PlanningFailed(#[from] MotionPlanningError),

    // =========================================================================
    // Defined (recoverable) physical failures
    // =========================================================================
    /// The pressure sensor tripped during a plunger motion.
    ///
    /// **Recovery Strategy**: the run driver may retry from `retry_location`
    /// after clearing the obstruction; the aspirated volume is unknown.
    #[error("Overpressure on pipette {pipette_id}")]
    Overpressure {
        pipette_id: String,
        retry_location: Point,
    },

    #[error("No liquid found by pipette {pipette_id}")]
    LiquidNotFound { pipette_id: String, position: Point },

    /// The tip sensor still reports a tip after a drop attempt.
    ///
    /// The pipette's logical state keeps the tip so later commands agree
    /// with physical reality.
    #[error("Tip still attached to pipette {0} after drop")]
    TipPhysicallyAttached(String),

    /// The tip sensor reports no tip after a pick-up attempt.
    #[error("No tip detected on pipette {0} after pick-up")]
    TipPhysicallyMissing(String),

    #[error("Gripper error while moving labware {labware_id}: {kind}")]
    GripperMovement {
        labware_id: String,
        kind: GripperErrorKind,
    },

    // =========================================================================
    // Run control and fatal failures
    // =========================================================================
    /// The run was stopped while the command was executing.
    #[error("Run was stopped")]
    RunStopped,

    /// Unclassified hardware failure.
    ///
    /// **Error Type**: Fatal - the run stops and no further command executes.
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

impl EngineError {
    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::IncompatibleAddressableArea { .. }
            | EngineError::Overpressure { .. }
            | EngineError::LiquidNotFound { .. }
            | EngineError::TipPhysicallyAttached(_)
            | EngineError::TipPhysicallyMissing(_)
            | EngineError::GripperMovement { .. } => ErrorKind::Defined,
            EngineError::Hardware(_) | EngineError::RunStopped => ErrorKind::Fatal,
            _ => ErrorKind::Validation,
        }
    }

    /// Stable wire name of the error.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::LabwareNotFound(_) => "LabwareNotFound",
            EngineError::PipetteNotFound(_) => "PipetteNotFound",
            EngineError::ModuleNotFound(_) => "ModuleNotFound",
            EngineError::CommandNotFound(_) => "CommandNotFound",
            EngineError::WellDoesNotExist { .. } => "WellDoesNotExist",
            EngineError::Definition(_) => "DefinitionNotFound",
            EngineError::AddressableAreaDoesNotExist(_) => "AddressableAreaDoesNotExist",
            EngineError::AreaNotInDeckConfiguration { .. } => "AreaNotInDeckConfiguration",
            EngineError::IncompatibleAddressableArea { .. } => "IncompatibleAddressableArea",
            EngineError::InvalidLocation { .. } => "InvalidLocation",
            EngineError::LocationIsOccupied { .. } => "LocationIsOccupied",
            EngineError::LabwareHasLabwareOnTop { .. } => "LabwareHasLabwareOnTop",
            EngineError::LabwareCannotBeStacked { .. } => "LabwareCannotBeStacked",
            EngineError::InvalidMoveDestination { .. } => "InvalidMoveDestination",
            EngineError::LidStackLimitExceeded { .. } => "LidStackLimitExceeded",
            EngineError::MountOccupied { .. } => "MountOccupied",
            EngineError::TipAlreadyAttached(_) => "TipAlreadyAttached",
            EngineError::TipNotAttached(_) => "TipNotAttached",
            EngineError::LabwareIsNotTipRack(_) => "LabwareIsNotTipRack",
            EngineError::TipNotAvailable { .. } => "TipNotAvailable",
            EngineError::NoTipsAvailable(_) => "NoTipsAvailable",
            EngineError::InvalidAspirateVolume { .. } => "InvalidAspirateVolume",
            EngineError::InvalidDispenseVolume { .. } => "InvalidDispenseVolume",
            EngineError::PipetteVolumeUnknown(_) => "PipetteVolumeUnknown",
            EngineError::PipetteNotEmpty(_) => "PipetteNotEmpty",
            EngineError::PipetteNotReadyToAspirate(_) => "PipetteNotReadyToAspirate",
            EngineError::GripperNotAttached => "GripperNotAttached",
            EngineError::ModuleNotAttached(_) => "ModuleNotAttached",
            EngineError::WrongModuleType { .. } => "WrongModuleType",
            EngineError::InvalidTarget { .. } => "InvalidTarget",
            EngineError::ThermocyclerLidClosed(_) => "ThermocyclerLidClosed",
            EngineError::HeaterShakerShaking(_) => "HeaterShakerShaking",
            EngineError::HeaterShakerLatch { .. } => "HeaterShakerLatch",
            EngineError::PlanningFailed(_) => "PlanningFailed",
            EngineError::Overpressure { .. } => "Overpressure",
            EngineError::LiquidNotFound { .. } => "LiquidNotFound",
            EngineError::TipPhysicallyAttached(_) => "TipPhysicallyAttached",
            EngineError::TipPhysicallyMissing(_) => "TipPhysicallyMissing",
            EngineError::GripperMovement { .. } => "GripperMovementError",
            EngineError::RunStopped => "RunStopped",
            EngineError::Hardware(_) => "HardwareError",
        }
    }

    /// Structured recovery context for the error record.
    pub fn error_info(&self) -> Map<String, Value> {
        let info = match self {
            EngineError::IncompatibleAddressableArea {
                area_name,
                cutout_id,
                conflicting_areas,
            } => json!({
                "areaName": area_name,
                "cutoutId": cutout_id,
                "conflictingAreas": conflicting_areas,
            }),
            EngineError::AreaNotInDeckConfiguration {
                area_name,
                cutout_id,
            } => json!({ "areaName": area_name, "cutoutId": cutout_id }),
            EngineError::Overpressure {
                pipette_id,
                retry_location,
            } => json!({
                "pipetteId": pipette_id,
                "retryLocation": [retry_location.x, retry_location.y, retry_location.z],
            }),
            EngineError::LiquidNotFound {
                pipette_id,
                position,
            } => json!({
                "pipetteId": pipette_id,
                "position": [position.x, position.y, position.z],
            }),
            EngineError::TipPhysicallyAttached(pipette_id)
            | EngineError::TipPhysicallyMissing(pipette_id) => json!({ "pipetteId": pipette_id }),
            EngineError::GripperMovement { labware_id, kind } => {
                json!({ "labwareId": labware_id, "kind": kind })
            }
            _ => json!({}),
        };
        match info {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Serialisable record of an error, as stored on a failed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOccurrence {
    pub id: String,
    pub error_type: String,
    pub detail: String,
    pub kind: ErrorKind,
    #[serde(default)]
    pub error_info: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ErrorOccurrence {
    /// Record `error` as occurring at `created_at`.
    pub fn from_error(error: &EngineError, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            error_type: error.error_type().to_string(),
            detail: error.to_string(),
            kind: error.kind(),
            error_info: error.error_info(),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{point, Mount};

    #[test]
    fn test_error_display() {
        let err = EngineError::LabwareNotFound("plate-1".to_string());
        assert_eq!(err.to_string(), "Labware plate-1 not found");
    }

    #[test]
    fn test_incompatible_area_names_both_areas() {
        let err = EngineError::IncompatibleAddressableArea {
            area_name: "heaterShakerV1D3".into(),
            cutout_id: "cutoutD3".into(),
            conflicting_areas: vec!["temperatureModuleV2D3".into()],
        };
        let text = err.to_string();
        assert!(text.contains("heaterShakerV1D3"));
        assert!(text.contains("temperatureModuleV2D3"));
        assert_eq!(err.kind(), ErrorKind::Defined);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            EngineError::TipNotAttached("p".into()).kind(),
            ErrorKind::Validation
        );
        let hw = HardwareError::Overpressure {
            mount: Mount::Left,
            position: point(1.0, 2.0, 3.0),
        };
        assert_eq!(EngineError::from(hw).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_occurrence_carries_retry_location() {
        let err = EngineError::Overpressure {
            pipette_id: "p1".into(),
            retry_location: point(10.0, 20.0, 30.0),
        };
        let occurrence = ErrorOccurrence::from_error(&err, Utc::now());
        assert_eq!(occurrence.error_type, "Overpressure");
        assert_eq!(occurrence.error_info["retryLocation"], json!([10.0, 20.0, 30.0]));
    }
}
