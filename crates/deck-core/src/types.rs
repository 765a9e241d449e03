//! Shared value types used across the engine.
//!
//! Everything in this module is plain data: positions, mounts, locations and
//! the small enums that commands and stores exchange. None of these types own
//! state; they are cloned freely between stores, views and commands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in deck coordinates, in millimetres.
///
/// The deck origin is the front-left corner of the front-left cutout; `z`
/// grows upward from the deck surface.
pub type Point = glam::DVec3;

/// Build a [`Point`] from its three components.
pub const fn point(x: f64, y: f64, z: f64) -> Point {
    glam::DVec3::new(x, y, z)
}

// =============================================================================
// Mounts and axes
// =============================================================================

/// Pipette mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountType {
    /// Left pipette mount
    Left,
    /// Right pipette mount
    Right,
}

impl MountType {
    /// The physical mount this pipette mount corresponds to.
    pub fn to_mount(self) -> Mount {
        match self {
            MountType::Left => Mount::Left,
            MountType::Right => Mount::Right,
        }
    }
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountType::Left => write!(f, "left"),
            MountType::Right => write!(f, "right"),
        }
    }
}

/// Any physical mount on the gantry, including the gripper extension mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mount {
    /// Left pipette mount
    Left,
    /// Right pipette mount
    Right,
    /// Gripper mount
    Extension,
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mount::Left => write!(f, "left"),
            Mount::Right => write!(f, "right"),
            Mount::Extension => write!(f, "extension"),
        }
    }
}

/// Homeable motor axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotorAxis {
    X,
    Y,
    LeftZ,
    RightZ,
    LeftPlunger,
    RightPlunger,
    ExtensionZ,
    ExtensionJaw,
}

impl MotorAxis {
    /// All Z axes; homed before any operation that moves hardware under the gantry.
    pub const Z_AXES: [MotorAxis; 3] = [MotorAxis::LeftZ, MotorAxis::RightZ, MotorAxis::ExtensionZ];
}

/// Reference point of an instrument used when positioning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriticalPoint {
    /// End of the attached tip, or of the nozzle when no tip is attached
    Tip,
    /// Geometric center of all nozzles
    XyCenter,
    /// Frontmost nozzle of a multi-channel pipette
    FrontNozzle,
    /// Center between the gripper jaws
    GripperJawCenter,
}

/// A point in a planned motion, with the critical point that should be used
/// to reach it. Only used during planning, never persisted in state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    /// Target position
    pub position: Point,
    /// Critical point used for this segment
    pub critical_point: Option<CriticalPoint>,
}

impl Waypoint {
    /// Waypoint at `position` reached with `critical_point`.
    pub fn new(position: Point, critical_point: Option<CriticalPoint>) -> Self {
        Self {
            position,
            critical_point,
        }
    }
}

// =============================================================================
// Locations
// =============================================================================

/// Where a labware currently is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LabwareLocation {
    /// Directly on a fixed deck slot
    #[serde(rename_all = "camelCase")]
    DeckSlot {
        /// Slot name, e.g. `"C2"`
        slot_name: String,
    },
    /// On a named addressable area (staging slot, waste chute, trash)
    #[serde(rename_all = "camelCase")]
    AddressableArea {
        /// Area name, e.g. `"B4"`
        addressable_area_name: String,
    },
    /// On top of a loaded module
    #[serde(rename_all = "camelCase")]
    Module {
        /// Id of the module
        module_id: String,
    },
    /// Stacked on another labware
    #[serde(rename_all = "camelCase")]
    OnLabware {
        /// Id of the labware underneath
        labware_id: String,
    },
    /// Off the deck, in the operator's hands
    OffDeck,
    /// Tracked by the engine but not physically present
    System,
}

impl LabwareLocation {
    /// Deck slot location helper.
    pub fn slot(slot_name: impl Into<String>) -> Self {
        LabwareLocation::DeckSlot {
            slot_name: slot_name.into(),
        }
    }

    /// Whether the location is physically on the deck (directly or indirectly).
    pub fn is_on_deck(&self) -> bool {
        !matches!(self, LabwareLocation::OffDeck | LabwareLocation::System)
    }

    /// Deck area this location names directly.
    ///
    /// A deck slot and the addressable area of the same name are one area.
    pub fn deck_area_name(&self) -> Option<&str> {
        match self {
            LabwareLocation::DeckSlot { slot_name } => Some(slot_name),
            LabwareLocation::AddressableArea {
                addressable_area_name,
            } => Some(addressable_area_name),
            _ => None,
        }
    }

    /// Whether both locations put labware in the same physical place.
    pub fn is_same_place(&self, other: &LabwareLocation) -> bool {
        match (self.deck_area_name(), other.deck_area_name()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for LabwareLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabwareLocation::DeckSlot { slot_name } => write!(f, "slot {}", slot_name),
            LabwareLocation::AddressableArea {
                addressable_area_name,
            } => write!(f, "area {}", addressable_area_name),
            LabwareLocation::Module { module_id } => write!(f, "module {}", module_id),
            LabwareLocation::OnLabware { labware_id } => write!(f, "labware {}", labware_id),
            LabwareLocation::OffDeck => write!(f, "off deck"),
            LabwareLocation::System => write!(f, "system"),
        }
    }
}

/// Location used to place a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckSlotLocation {
    /// Slot name, e.g. `"D1"`
    pub slot_name: String,
}

/// Reference height inside a well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WellOrigin {
    /// Top rim of the well
    #[default]
    Top,
    /// Bottom of the well
    Bottom,
    /// Half depth
    Center,
}

/// Offset from a well origin, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WellOffset {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl WellOffset {
    /// Offset as a vector.
    pub fn as_point(&self) -> Point {
        point(self.x, self.y, self.z)
    }
}

/// A position relative to a well.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellLocation {
    #[serde(default)]
    pub origin: WellOrigin,
    #[serde(default)]
    pub offset: WellOffset,
}

impl WellLocation {
    /// Top of the well, offset by `z`.
    pub fn top(z: f64) -> Self {
        Self {
            origin: WellOrigin::Top,
            offset: WellOffset { x: 0.0, y: 0.0, z },
        }
    }

    /// Bottom of the well, offset by `z`.
    pub fn bottom(z: f64) -> Self {
        Self {
            origin: WellOrigin::Bottom,
            offset: WellOffset { x: 0.0, y: 0.0, z },
        }
    }
}

/// Where a pipette logically is: used to decide between direct and arc moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PipetteLocation {
    /// Above or inside a well
    #[serde(rename_all = "camelCase")]
    Well {
        labware_id: String,
        well_name: String,
    },
    /// Above an addressable area
    #[serde(rename_all = "camelCase")]
    AddressableArea { addressable_area_name: String },
}

/// Result of a tip presence sensor read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TipPresence {
    Present,
    Absent,
    Unknown,
}

/// Geometry of an attached tip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipGeometry {
    /// Effective length added below the nozzle, in mm
    pub length: f64,
    /// Tip diameter at the opening, in mm
    pub diameter: f64,
    /// Tip capacity, in µL
    pub volume: f64,
}

/// How a labware is moved between locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabwareMovementStrategy {
    /// Robot moves it with the gripper
    UsingGripper,
    /// Operator moves it; the run pauses afterwards
    ManualMoveWithPause,
    /// Operator moves it; the run continues
    #[default]
    ManualMoveWithoutPause,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labware_location_wire_shape() {
        let loc = LabwareLocation::slot("C2");
        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "deckSlot", "slotName": "C2"}));

        let off: LabwareLocation = serde_json::from_str(r#"{"kind":"offDeck"}"#).unwrap();
        assert_eq!(off, LabwareLocation::OffDeck);
        assert!(!off.is_on_deck());
    }

    #[test]
    fn slot_and_area_of_one_name_are_one_place() {
        let slot = LabwareLocation::slot("C2");
        let area = LabwareLocation::AddressableArea {
            addressable_area_name: "C2".to_string(),
        };
        assert!(slot.is_same_place(&area));
        assert!(area.is_same_place(&slot));
        assert!(!slot.is_same_place(&LabwareLocation::slot("C3")));
        assert!(LabwareLocation::OffDeck.is_same_place(&LabwareLocation::OffDeck));
        assert!(!LabwareLocation::OffDeck.is_same_place(&LabwareLocation::System));
    }

    #[test]
    fn well_location_defaults_to_top() {
        let loc: WellLocation = serde_json::from_str("{}").unwrap();
        assert_eq!(loc.origin, WellOrigin::Top);
        assert_eq!(loc.offset.as_point(), Point::ZERO);
    }
}
