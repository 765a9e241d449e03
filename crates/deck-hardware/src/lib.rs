//! `deck-hardware`
//!
//! Collaborators the engine needs to run without a physical robot.
//!
//! # Available Components
//!
//! - [`SimulatedHardware`]: a [`HardwareControl`](deck_core::HardwareControl)
//!   that tracks positions, tips and plunger volumes, records every call and
//!   injects scripted faults
//! - [`BuiltinCatalog`]: standard deck, module and labware definitions
//!   compiled into the binary
//! - [`FilesystemProvider`]: labware definitions from JSON directories,
//!   layered over the built-in catalog
//! - [`HardwareConfig`]: TOML-friendly description of a simulated robot
//!
//! # Example
//!
//! ```rust,ignore
//! use deck_hardware::{BuiltinCatalog, SimulatedHardware};
//!
//! let hardware = Arc::new(
//!     SimulatedHardware::builder()
//!         .pipette(MountType::Left, "p1000_single")
//!         .gripper(true)
//!         .build(),
//! );
//! let provider = Arc::new(BuiltinCatalog::new());
//! ```

pub mod catalog;
pub mod config;
pub mod provider;
pub mod simulator;

pub use catalog::{BuiltinCatalog, STANDARD_NAMESPACE};
pub use config::{HardwareConfig, PipetteMounts};
pub use provider::FilesystemProvider;
pub use simulator::{
    pipette_config, Fault, FaultScript, HardwareCall, HardwareOperation, SimulatedHardware,
    SimulatedHardwareBuilder, SimulationMode,
};
