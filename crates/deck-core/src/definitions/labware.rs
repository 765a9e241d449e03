//! Labware definition schema.
//!
//! A definition describes one kind of labware: its footprint, its wells and
//! how it may be used (ordinary labware, adapter, lid, fixture). Definitions
//! are immutable once fetched from the data provider and are shared between
//! stores behind an `Arc`.

use crate::types::{point, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Roles a labware definition may be loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabwareRole {
    Labware,
    Adapter,
    Fixture,
    Lid,
    System,
}

/// Display category, used mostly to tell tip racks and trash apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayCategory {
    WellPlate,
    TipRack,
    Reservoir,
    TubeRack,
    AluminumBlock,
    Adapter,
    Lid,
    Trash,
    Other,
}

/// `namespace/loadName/version` identity of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabwareUri(String);

impl LabwareUri {
    /// Build a URI from its parts.
    pub fn new(namespace: &str, load_name: &str, version: u32) -> Self {
        Self(format!("{}/{}/{}", namespace, load_name, version))
    }

    /// The URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabwareUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outer dimensions of a labware, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub x_dimension: f64,
    pub y_dimension: f64,
    pub z_dimension: f64,
}

/// Well cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum WellShape {
    Circular {
        diameter: f64,
    },
    #[serde(rename_all = "camelCase")]
    Rectangular {
        x_dimension: f64,
        y_dimension: f64,
    },
}

/// One well of a labware. `x`, `y`, `z` locate the well bottom center
/// relative to the labware origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellDefinition {
    pub depth: f64,
    pub total_liquid_volume: f64,
    #[serde(flatten)]
    pub shape: WellShape,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WellDefinition {
    /// Bottom center of the well relative to the labware origin.
    pub fn bottom(&self) -> Point {
        point(self.x, self.y, self.z)
    }
}

/// Load-name level parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareParameters {
    pub load_name: String,
    #[serde(default)]
    pub is_tiprack: bool,
    /// Nominal tip length for tip racks
    #[serde(default)]
    pub tip_length: Option<f64>,
    /// Slots this labware is restricted to, for fixed fixtures such as trash
    #[serde(default)]
    pub permitted_slots: Option<Vec<String>>,
}

/// Gripper grip parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GripParameters {
    /// Height above the labware bottom at which the jaws close
    pub grip_height_from_labware_bottom: f64,
    /// Grip force in newtons
    pub grip_force: f64,
}

impl Default for GripParameters {
    fn default() -> Self {
        Self {
            grip_height_from_labware_bottom: 10.0,
            grip_force: 15.0,
        }
    }
}

/// Full labware definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareDefinition {
    pub namespace: String,
    pub version: u32,
    pub display_name: String,
    pub display_category: DisplayCategory,
    pub parameters: LabwareParameters,
    pub dimensions: Dimensions,
    pub wells: BTreeMap<String, WellDefinition>,
    /// Wells grouped by column, back to front within a column
    pub ordering: Vec<Vec<String>>,
    #[serde(default = "default_roles")]
    pub allowed_roles: Vec<LabwareRole>,
    /// Overlap when stacked on another labware, keyed by the lower labware's load name
    #[serde(default)]
    pub stacking_offset_with_labware: BTreeMap<String, WellOffsetVector>,
    /// Overlap when placed on a module, keyed by module model
    #[serde(default)]
    pub stacking_offset_with_module: BTreeMap<String, WellOffsetVector>,
    /// Load names this lid may cover
    #[serde(default)]
    pub compatible_parent_labware: Vec<String>,
    /// Maximum number of identical lids in one stack
    #[serde(default)]
    pub stack_limit: Option<u32>,
    #[serde(default)]
    pub grip: GripParameters,
}

/// Plain x/y/z triple used in definition files.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WellOffsetVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<WellOffsetVector> for Point {
    fn from(v: WellOffsetVector) -> Self {
        point(v.x, v.y, v.z)
    }
}

fn default_roles() -> Vec<LabwareRole> {
    vec![LabwareRole::Labware]
}

impl LabwareDefinition {
    /// Definition URI.
    pub fn uri(&self) -> LabwareUri {
        LabwareUri::new(&self.namespace, &self.parameters.load_name, self.version)
    }

    /// Load name shortcut.
    pub fn load_name(&self) -> &str {
        &self.parameters.load_name
    }

    pub fn is_tiprack(&self) -> bool {
        self.parameters.is_tiprack
    }

    pub fn is_lid(&self) -> bool {
        self.allowed_roles.contains(&LabwareRole::Lid)
    }

    pub fn is_adapter(&self) -> bool {
        self.allowed_roles.contains(&LabwareRole::Adapter)
    }

    /// Fixture-only labware (trash and the like) cannot sit on modules or other labware.
    pub fn is_fixture_only(&self) -> bool {
        self.allowed_roles == [LabwareRole::Fixture]
    }

    /// Look up a well by name.
    pub fn well(&self, well_name: &str) -> Option<&WellDefinition> {
        self.wells.get(well_name)
    }

    /// Number of rows in the well grid.
    pub fn row_count(&self) -> usize {
        self.ordering.first().map(Vec::len).unwrap_or(0)
    }

    /// Wells in column-major order, as used for tip selection.
    pub fn wells_in_order(&self) -> impl Iterator<Item = &str> {
        self.ordering.iter().flatten().map(String::as_str)
    }

    /// Whether `self` may be placed on top of a labware with `bottom` definition.
    pub fn can_stack_on(&self, bottom: &LabwareDefinition) -> bool {
        if self.is_lid() && self.compatible_parent_labware.iter().any(|n| n == bottom.load_name()) {
            return true;
        }
        bottom.is_adapter() || self.stacking_offset_with_labware.contains_key(bottom.load_name())
    }

    /// Vertical overlap when stacked on `bottom_load_name`.
    pub fn stacking_overlap_with_labware(&self, bottom_load_name: &str) -> Point {
        self.stacking_offset_with_labware
            .get(bottom_load_name)
            .copied()
            .map(Point::from)
            .unwrap_or(Point::ZERO)
    }

    /// Vertical overlap when placed on a module of `model`.
    pub fn stacking_overlap_with_module(&self, model: &str) -> Point {
        self.stacking_offset_with_module
            .get(model)
            .copied()
            .map(Point::from)
            .unwrap_or(Point::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_formats_parts() {
        let uri = LabwareUri::new("std", "plate_96", 2);
        assert_eq!(uri.as_str(), "std/plate_96/2");
    }

    #[test]
    fn well_shape_is_flattened() {
        let json = serde_json::json!({
            "depth": 10.0,
            "totalLiquidVolume": 200.0,
            "shape": "circular",
            "diameter": 6.4,
            "x": 14.38,
            "y": 74.24,
            "z": 1.0
        });
        let well: WellDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(well.shape, WellShape::Circular { diameter: 6.4 });
        assert_eq!(well.bottom(), point(14.38, 74.24, 1.0));
    }
}
