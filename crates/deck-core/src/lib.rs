//! `deck-core`
//!
//! Shared vocabulary for the deck execution engine.
//!
//! This crate holds everything the engine, the hardware adapters and the
//! definition providers need to agree on, and nothing that owns state:
//!
//! - [`types`]: points, mounts, critical points, labware and pipette locations
//! - [`definitions`]: labware, deck, module and pipette definition schemas
//! - [`error`]: the command error taxonomy ([`EngineError`], [`ErrorKind`])
//! - [`hardware`]: the [`HardwareControl`] actuation boundary
//! - [`provider`]: the [`DataProvider`] definition lookup boundary
//! - [`limits`]: motion and timing constants
//!
//! ## Error Taxonomy
//!
//! - **Validation**: rejected before any hardware call, no partial state
//! - **Defined**: anticipated physical failure carrying recovery context
//! - **Fatal**: unexpected adapter failure; the run stops

pub mod definitions;
pub mod error;
pub mod hardware;
pub mod limits;
pub mod provider;
pub mod types;

pub use error::{EngineError, EngineResult, ErrorKind, ErrorOccurrence, MotionPlanningError};
pub use hardware::{
    AttachedModule, DoorState, GripperErrorKind, HardwareControl, HardwareError, HardwareResult,
    ModuleOperation,
};
pub use provider::{DataProvider, DataProviderError};
pub use types::{
    point, CriticalPoint, LabwareLocation, LabwareMovementStrategy, Mount, MountType, MotorAxis,
    PipetteLocation, Point, TipGeometry, TipPresence, WellLocation, WellOffset, WellOrigin,
    Waypoint,
};
