//! Hardware control boundary.
//!
//! The engine never talks to motors, sensors or modules directly. Every
//! physical action goes through [`HardwareControl`], which may be backed by a
//! real robot or by a simulator. Operations are async and never assumed to be
//! instantaneous; each returns a structured [`HardwareError`] on failure that
//! command implementations classify into the engine's error taxonomy.
//!
//! # Contract
//!
//! - Implementations must be cancel-safe: dropping an in-flight future
//!   (because the run was stopped) must leave the adapter usable.
//! - The engine serialises all motion through its own lock; implementations
//!   need not guard against two concurrent moves on the same mount.

use crate::definitions::{ModuleModel, PipetteConfig};
use crate::types::{CriticalPoint, Mount, MotorAxis, MountType, Point, TipPresence};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

/// Result alias for adapter calls.
pub type HardwareResult<T> = Result<T, HardwareError>;

/// Failure modes of the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GripperErrorKind {
    /// Jaws closed on nothing
    PickupFailed,
    /// Labware lost while in transit
    LabwareDropped,
    /// Stall or collision during the move
    Collision,
}

impl fmt::Display for GripperErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GripperErrorKind::PickupFailed => "pickup failed",
            GripperErrorKind::LabwareDropped => "labware dropped",
            GripperErrorKind::Collision => "collision",
        };
        f.write_str(label)
    }
}

/// Structured errors returned by the hardware adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Pressure sensor tripped during a plunger motion.
    #[error("Overpressure detected on {mount} mount at {position}")]
    Overpressure { mount: Mount, position: Point },

    /// Liquid probe reached its limit without detecting liquid.
    #[error("No liquid detected on {mount} mount, probe ended at {position}")]
    LiquidNotFound { mount: Mount, position: Point },

    /// Gripper lost, missed or collided with labware.
    #[error("Gripper {kind}")]
    Gripper { kind: GripperErrorKind },

    /// A motor stalled.
    #[error("Motor stall detected (axis: {axis:?})")]
    Stall { axis: Option<MotorAxis> },

    /// Motion requested before the axes were homed.
    #[error("Axes must be homed before moving: {axes:?}")]
    MustHome { axes: Vec<MotorAxis> },

    /// No instrument on the requested mount.
    #[error("No instrument attached to {mount} mount")]
    InstrumentNotFound { mount: MountType },

    /// The instrument on the mount does not match the request.
    #[error("Requested {requested} on {mount} mount but {found} is attached")]
    InstrumentMismatch {
        mount: MountType,
        requested: String,
        found: String,
    },

    /// No gripper attached.
    #[error("No gripper attached")]
    GripperNotAttached,

    /// A module rejected or failed an operation.
    #[error("Module {serial}: {message}")]
    Module { serial: String, message: String },

    /// Transport-level failure talking to firmware.
    #[error("Hardware communication error: {0}")]
    Communication(String),

    /// The operation was interrupted by a stop request.
    #[error("Hardware operation cancelled")]
    Cancelled,
}

/// An attached module as reported by the hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedModule {
    pub serial_number: String,
    pub model: ModuleModel,
}

/// Operations a module can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum ModuleOperation {
    EngageMagnet { height: f64 },
    DisengageMagnet,
    SetTemperature { celsius: f64 },
    DeactivateTemperature,
    OpenLid,
    CloseLid,
    SetBlockTemperature { celsius: f64 },
    OpenLatch,
    CloseLatch,
    SetShakeSpeed { rpm: u32 },
    DeactivateShaker,
}

/// State of the front door sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoorState {
    Open,
    Closed,
}

/// Physical actuation surface.
#[async_trait]
pub trait HardwareControl: Send + Sync {
    /// Home the given axes, or every axis when `axes` is `None`.
    async fn home(&self, axes: Option<&[MotorAxis]>) -> HardwareResult<()>;

    /// Move `mount` so that its `critical_point` reaches `position`.
    async fn move_to(
        &self,
        mount: Mount,
        position: Point,
        critical_point: Option<CriticalPoint>,
        speed: Option<f64>,
    ) -> HardwareResult<()>;

    /// Move `mount` by `delta` from where it is.
    async fn move_rel(&self, mount: Mount, delta: Point, speed: Option<f64>) -> HardwareResult<()>;

    /// Current position of `mount` for `critical_point`.
    async fn gantry_position(
        &self,
        mount: Mount,
        critical_point: Option<CriticalPoint>,
    ) -> HardwareResult<Point>;

    /// Re-scan the pipette on `mount` and return its configuration.
    async fn cache_instrument(
        &self,
        mount: MountType,
        requested_name: &str,
    ) -> HardwareResult<PipetteConfig>;

    /// Whether a gripper is attached.
    async fn has_gripper(&self) -> HardwareResult<bool>;

    /// Modules currently connected.
    async fn attached_modules(&self) -> HardwareResult<Vec<AttachedModule>>;

    /// Press a tip onto the nozzle(s) at the current position.
    async fn pick_up_tip(&self, mount: MountType, tip_length: f64) -> HardwareResult<()>;

    /// Eject the tip(s) at the current position.
    async fn drop_tip(&self, mount: MountType, home_after: bool) -> HardwareResult<()>;

    /// Read the tip presence sensor.
    async fn tip_presence(&self, mount: MountType) -> HardwareResult<TipPresence>;

    /// Move the plunger to its bottom position so it is ready to aspirate.
    async fn prepare_for_aspirate(&self, mount: MountType) -> HardwareResult<()>;

    async fn aspirate(&self, mount: MountType, volume: f64, flow_rate: f64) -> HardwareResult<()>;

    async fn dispense(
        &self,
        mount: MountType,
        volume: f64,
        flow_rate: f64,
        push_out: Option<f64>,
    ) -> HardwareResult<()>;

    /// Close the gripper jaws with `force` newtons.
    async fn grip(&self, force: f64) -> HardwareResult<()>;

    /// Open the gripper jaws.
    async fn ungrip(&self) -> HardwareResult<()>;

    /// Probe downward up to `max_distance` mm; returns the z where liquid was found.
    async fn probe_liquid(&self, mount: MountType, max_distance: f64) -> HardwareResult<f64>;

    /// Run an operation on the module with `serial_number`.
    async fn module_command(
        &self,
        serial_number: &str,
        operation: ModuleOperation,
    ) -> HardwareResult<()>;

    /// Stop all motion immediately.
    async fn halt(&self) -> HardwareResult<()>;

    /// Subscribe to door sensor changes, if the hardware has a door sensor.
    fn subscribe_door(&self) -> Option<broadcast::Receiver<DoorState>> {
        None
    }
}
