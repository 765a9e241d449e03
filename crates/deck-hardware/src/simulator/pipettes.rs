//! Pipette models the simulator can report as attached.

use deck_core::definitions::{FlowRates, PipetteConfig};
use deck_core::types::point;

/// Highest nozzle z every simulated pipette can reach without a tip (mm).
pub const SIMULATED_MAX_NOZZLE_Z: f64 = 230.0;

/// Names accepted by [`pipette_config`].
pub const PIPETTE_NAMES: [&str; 5] = [
    "p50_single",
    "p50_multi",
    "p1000_single",
    "p1000_multi",
    "p1000_96",
];

/// Configuration the simulator reports for `name`, if it knows the model.
pub fn pipette_config(name: &str) -> Option<PipetteConfig> {
    let (model, channels, max_volume, min_volume, flow) = match name {
        "p50_single" => ("p50_single_v3.5", 1, 50.0, 1.0, (35.0, 57.0)),
        "p50_multi" => ("p50_multi_v3.5", 8, 50.0, 1.0, (35.0, 57.0)),
        "p1000_single" => ("p1000_single_v3.5", 1, 1000.0, 5.0, (160.0, 160.0)),
        "p1000_multi" => ("p1000_multi_v3.5", 8, 1000.0, 5.0, (160.0, 160.0)),
        "p1000_96" => ("p1000_96_v3.6", 96, 1000.0, 5.0, (160.0, 160.0)),
        _ => return None,
    };
    let nozzle_offset = match channels {
        1 => point(-8.0, -22.0, -259.15),
        8 => point(-8.0, -16.0, -259.15),
        _ => point(-36.0, -25.5, -259.15),
    };
    Some(PipetteConfig {
        pipette_name: name.to_string(),
        model: model.to_string(),
        channels,
        max_volume,
        min_volume,
        tip_overlap: 10.5,
        nozzle_offset,
        max_nozzle_z: SIMULATED_MAX_NOZZLE_Z,
        default_flow_rates: FlowRates {
            aspirate: flow.0,
            dispense: flow.1,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in PIPETTE_NAMES {
            let config = pipette_config(name).unwrap();
            assert_eq!(config.pipette_name, name);
        }
        assert!(pipette_config("p20_single").is_none());
    }

    #[test]
    fn channel_counts() {
        assert_eq!(pipette_config("p50_multi").map(|c| c.channels), Some(8));
        assert_eq!(pipette_config("p1000_96").map(|c| c.channels), Some(96));
    }
}
