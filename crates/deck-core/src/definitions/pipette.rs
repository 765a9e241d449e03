//! Pipette configuration reported by the hardware when an instrument is cached.

use crate::types::Point;
use serde::{Deserialize, Serialize};

/// Default flow rates in µL/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRates {
    pub aspirate: f64,
    pub dispense: f64,
}

/// Static configuration of an attached pipette.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipetteConfig {
    /// Requested pipette name, e.g. `"p1000_single"`
    pub pipette_name: String,
    /// Specific model reported by the instrument
    pub model: String,
    pub channels: u32,
    /// Nominal maximum volume in µL
    pub max_volume: f64,
    pub min_volume: f64,
    /// How far a tip slides onto the nozzle, subtracted from tip length
    pub tip_overlap: f64,
    /// Nozzle offset from the mount reference point
    pub nozzle_offset: Point,
    /// Highest reachable nozzle z with no tip attached
    pub max_nozzle_z: f64,
    pub default_flow_rates: FlowRates,
}

impl PipetteConfig {
    /// Highest reachable z for the tip end, given an attached tip length.
    pub fn max_travel_z(&self, tip_length: Option<f64>) -> f64 {
        self.max_nozzle_z - tip_length.unwrap_or(0.0)
    }
}
