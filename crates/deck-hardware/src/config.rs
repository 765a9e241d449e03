//! Simulator configuration.
//!
//! ```toml
//! [hardware]
//! mode = "instant"
//! gripper = true
//! liquid_fill = 0.5
//!
//! [hardware.pipettes]
//! left = "p1000_single"
//!
//! [[hardware.modules]]
//! serialNumber = "TM-001"
//! model = "temperatureModuleV2"
//!
//! [[hardware.faults]]
//! operation = "aspirate"
//! fault = { type = "overpressure" }
//! after = 2
//! ```

use crate::simulator::{pipette_config, FaultScript, SimulatedHardware, SimulationMode};
use anyhow::{bail, Result};
use deck_core::hardware::AttachedModule;
use deck_core::types::MountType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Pipette names per mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipetteMounts {
    pub left: Option<String>,
    pub right: Option<String>,
}

impl PipetteMounts {
    fn iter(&self) -> impl Iterator<Item = (MountType, &str)> {
        [
            (MountType::Left, self.left.as_deref()),
            (MountType::Right, self.right.as_deref()),
        ]
        .into_iter()
        .filter_map(|(mount, name)| name.map(|n| (mount, n)))
    }
}

/// What the simulated robot has attached and how it misbehaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub mode: SimulationMode,
    pub pipettes: PipetteMounts,
    pub gripper: bool,
    pub door_sensor: bool,
    pub modules: Vec<AttachedModule>,
    pub faults: Vec<FaultScript>,
    /// Fraction of a probed well reported as liquid
    pub liquid_fill: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            mode: SimulationMode::Instant,
            pipettes: PipetteMounts::default(),
            gripper: false,
            door_sensor: true,
            modules: Vec::new(),
            faults: Vec::new(),
            liquid_fill: 0.5,
        }
    }
}

impl HardwareConfig {
    /// Reject pipette names the simulator does not know, out-of-range fill
    /// fractions and duplicate module serial numbers.
    pub fn validate(&self) -> Result<()> {
        for (mount, name) in self.pipettes.iter() {
            if pipette_config(name).is_none() {
                bail!("Unknown pipette '{}' on {} mount", name, mount);
            }
        }
        if !(0.0..=1.0).contains(&self.liquid_fill) {
            bail!("liquid_fill must be within 0..=1, got {}", self.liquid_fill);
        }
        let mut serials = HashSet::new();
        for module in &self.modules {
            if !serials.insert(module.serial_number.as_str()) {
                bail!("Duplicate module serial number '{}'", module.serial_number);
            }
        }
        Ok(())
    }

    pub fn build(&self) -> SimulatedHardware {
        let mut builder = SimulatedHardware::builder()
            .mode(self.mode)
            .gripper(self.gripper)
            .door_sensor(self.door_sensor)
            .liquid_fill(self.liquid_fill);
        for (mount, name) in self.pipettes.iter() {
            builder = builder.pipette(mount, name);
        }
        for module in &self.modules {
            builder = builder.module(module.serial_number.clone(), module.model);
        }
        for fault in &self.faults {
            builder = builder.fault(fault.clone());
        }
        builder.build()
    }
}
