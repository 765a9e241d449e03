//! Deck definition schema: cutouts, cutout fixtures and addressable areas.
//!
//! A cutout is a physical opening in the deck. A cutout fixture is an insert
//! that mounts into one cutout and provides one or more addressable areas.
//! Some fixtures (the thermocycler) also block neighbouring cutouts.

use crate::types::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of an addressable area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AreaType {
    Slot,
    StagingSlot,
    MovableTrash,
    WasteChute,
    TemperatureModule,
    HeaterShakerModule,
    MagneticModule,
    MagneticBlock,
    Thermocycler,
}

impl AreaType {
    /// Whether labware can be loaded directly onto an area of this type.
    pub fn holds_labware(self) -> bool {
        matches!(self, AreaType::Slot | AreaType::StagingSlot)
    }

    /// Whether the area is a disposal area (trash bin or waste chute).
    pub fn is_disposal(self) -> bool {
        matches!(self, AreaType::MovableTrash | AreaType::WasteChute)
    }
}

/// Axis-aligned bounding box size, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A physical deck opening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutoutDefinition {
    pub id: String,
    /// Front-left-bottom corner of the cutout
    pub position: Point,
}

/// A named location on the deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressableAreaDefinition {
    pub id: String,
    pub area_type: AreaType,
    /// Offset of the area's front-left-bottom corner from its cutout's position
    pub offset_from_cutout_fixture: Point,
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub ability_to_drop_tips: bool,
    #[serde(default)]
    pub ability_to_drop_labware: bool,
}

/// An insert that mounts into a cutout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutoutFixtureDefinition {
    pub id: String,
    pub may_mount_to: Vec<String>,
    /// Areas provided, keyed by the cutout the fixture is mounted in
    pub provides_addressable_areas: BTreeMap<String, Vec<String>>,
    /// Extra cutouts blocked by the fixture, keyed by the cutout it is mounted in
    #[serde(default)]
    pub occupies_cutouts: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub display_name: String,
}

impl CutoutFixtureDefinition {
    /// Areas this fixture provides when mounted in `cutout_id`.
    pub fn areas_in(&self, cutout_id: &str) -> &[String] {
        self.provides_addressable_areas
            .get(cutout_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Neighbouring cutouts blocked when mounted in `cutout_id`.
    pub fn blocked_cutouts(&self, cutout_id: &str) -> &[String] {
        self.occupies_cutouts
            .get(cutout_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Full deck definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckDefinition {
    pub id: String,
    pub cutouts: Vec<CutoutDefinition>,
    pub addressable_areas: Vec<AddressableAreaDefinition>,
    pub cutout_fixtures: Vec<CutoutFixtureDefinition>,
}

impl DeckDefinition {
    pub fn cutout(&self, cutout_id: &str) -> Option<&CutoutDefinition> {
        self.cutouts.iter().find(|c| c.id == cutout_id)
    }

    pub fn addressable_area(&self, area_name: &str) -> Option<&AddressableAreaDefinition> {
        self.addressable_areas.iter().find(|a| a.id == area_name)
    }

    pub fn cutout_fixture(&self, fixture_id: &str) -> Option<&CutoutFixtureDefinition> {
        self.cutout_fixtures.iter().find(|f| f.id == fixture_id)
    }

    /// Every (cutout, fixture) pairing that provides `area_name`.
    pub fn providers_of<'a>(
        &'a self,
        area_name: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a CutoutFixtureDefinition)> + 'a {
        self.cutout_fixtures.iter().flat_map(move |fixture| {
            fixture
                .provides_addressable_areas
                .iter()
                .filter(move |(_, areas)| areas.iter().any(|a| a == area_name))
                .map(move |(cutout, _)| (cutout.as_str(), fixture))
        })
    }
}
