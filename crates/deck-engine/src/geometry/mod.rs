//! Derived geometry over labware, module, area and pipette state.
//!
//! [`GeometryView`] owns nothing. It borrows the stores it needs for the
//! duration of one call and computes positions: labware origins through
//! arbitrarily deep stacks, well positions, obstacle heights, gripper grip
//! and drop points, and full motion plans to wells and areas.

pub mod motion;

use crate::state::{AddressableArea, AddressableAreaStore, LabwareOffsetLocation, LabwareStore, LoadedModule, ModuleStore, PipetteStore};
use deck_core::definitions::{AreaType, LabwareDefinition};
use deck_core::error::{EngineError, EngineResult};
use deck_core::limits::{
    GENERAL_ARC_Z_MARGIN, GRIPPER_TRAVEL_MARGIN, IN_LABWARE_ARC_Z_MARGIN, TRASH_DROP_HEIGHT,
    WASTE_CHUTE_DROP_HEIGHT,
};
use deck_core::types::{
    point, CriticalPoint, LabwareLocation, PipetteLocation, Point, WellLocation, WellOffset,
    WellOrigin,
};
pub use motion::{plan_waypoints, MotionPlan, MotionRequest, MoveType, PathKind};

/// Options shared by pipette moves.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveOptions {
    /// Raise the travel height to at least this z
    pub minimum_z_height: Option<f64>,
    /// Skip the arc and move straight to the target
    pub force_direct: bool,
}

/// Read-only geometry over borrowed stores.
#[derive(Debug, Clone, Copy)]
pub struct GeometryView<'a> {
    labware: &'a LabwareStore,
    modules: &'a ModuleStore,
    areas: &'a AddressableAreaStore,
    pipettes: &'a PipetteStore,
}

impl<'a> GeometryView<'a> {
    pub fn new(
        labware: &'a LabwareStore,
        modules: &'a ModuleStore,
        areas: &'a AddressableAreaStore,
        pipettes: &'a PipetteStore,
    ) -> Self {
        Self {
            labware,
            modules,
            areas,
            pipettes,
        }
    }

    // =========================================================================
    // Locations
    // =========================================================================

    /// Deck slot (or area name for staging areas) under a location.
    pub fn slot_of(&self, location: &LabwareLocation) -> EngineResult<Option<String>> {
        match location {
            LabwareLocation::DeckSlot { slot_name } => Ok(Some(slot_name.clone())),
            LabwareLocation::AddressableArea {
                addressable_area_name,
            } => Ok(Some(self.areas.area(addressable_area_name)?.base_slot)),
            LabwareLocation::Module { module_id } => {
                Ok(Some(self.modules.get(module_id)?.location.slot_name.clone()))
            }
            LabwareLocation::OnLabware { labware_id } => {
                self.slot_of(self.labware.location(labware_id)?)
            }
            LabwareLocation::OffDeck | LabwareLocation::System => Ok(None),
        }
    }

    /// Slot under whatever a pipette is positioned over.
    pub fn slot_of_pipette_location(&self, location: &PipetteLocation) -> EngineResult<Option<String>> {
        match location {
            PipetteLocation::Well { labware_id, .. } => {
                self.slot_of(self.labware.location(labware_id)?)
            }
            PipetteLocation::AddressableArea {
                addressable_area_name,
            } => Ok(Some(self.areas.area(addressable_area_name)?.base_slot)),
        }
    }

    /// Module a location ultimately sits on, through any stack.
    pub fn module_under(&self, location: &LabwareLocation) -> EngineResult<Option<&'a LoadedModule>> {
        match location {
            LabwareLocation::Module { module_id } => Ok(Some(self.modules.get(module_id)?)),
            LabwareLocation::OnLabware { labware_id } => {
                self.module_under(self.labware.location(labware_id)?)
            }
            _ => Ok(None),
        }
    }

    /// Key under which calibration offsets for `location` are registered.
    pub fn offset_location(&self, location: &LabwareLocation) -> EngineResult<Option<LabwareOffsetLocation>> {
        match location {
            LabwareLocation::DeckSlot { slot_name } => Ok(Some(LabwareOffsetLocation {
                slot_name: slot_name.clone(),
                module_model: None,
            })),
            LabwareLocation::AddressableArea {
                addressable_area_name,
            } => Ok(Some(LabwareOffsetLocation {
                slot_name: addressable_area_name.clone(),
                module_model: None,
            })),
            LabwareLocation::Module { module_id } => {
                let module = self.modules.get(module_id)?;
                Ok(Some(LabwareOffsetLocation {
                    slot_name: module.location.slot_name.clone(),
                    module_model: Some(module.model),
                }))
            }
            LabwareLocation::OnLabware { labware_id } => {
                self.offset_location(self.labware.location(labware_id)?)
            }
            LabwareLocation::OffDeck | LabwareLocation::System => Ok(None),
        }
    }

    /// Id of the calibration offset that applies to `definition` at `location`.
    pub fn find_offset_id(
        &self,
        definition: &LabwareDefinition,
        location: &LabwareLocation,
    ) -> EngineResult<Option<String>> {
        Ok(self
            .offset_location(location)?
            .and_then(|key| self.labware.find_offset(&definition.uri(), &key))
            .map(|offset| offset.id.clone()))
    }

    // =========================================================================
    // Positions
    // =========================================================================

    /// Origin of a labware with `definition` if it were placed at `location`,
    /// before its own calibration offset.
    pub fn placement_origin(
        &self,
        location: &LabwareLocation,
        definition: &LabwareDefinition,
    ) -> EngineResult<Point> {
        match location {
            LabwareLocation::DeckSlot { slot_name } => Ok(self.areas.area(slot_name)?.position),
            LabwareLocation::AddressableArea {
                addressable_area_name,
            } => Ok(self.areas.area(addressable_area_name)?.position),
            LabwareLocation::Module { module_id } => {
                let module = self.modules.get(module_id)?;
                let area = self.areas.area(&module.addressable_area_name)?;
                Ok(area.position + module.definition.labware_offset
                    - definition.stacking_overlap_with_module(module.model.as_str()))
            }
            LabwareLocation::OnLabware { labware_id } => {
                let parent = self.labware.get(labware_id)?;
                let parent_origin = self.labware_origin(labware_id)?;
                Ok(parent_origin + point(0.0, 0.0, parent.definition.dimensions.z_dimension)
                    - definition.stacking_overlap_with_labware(parent.definition.load_name()))
            }
            LabwareLocation::OffDeck | LabwareLocation::System => {
                Err(EngineError::InvalidLocation {
                    load_name: definition.load_name().to_string(),
                    location: location.to_string(),
                    reason: "location is not on the deck".to_string(),
                })
            }
        }
    }

    /// Front-left-bottom corner of a loaded labware, calibrated.
    pub fn labware_origin(&self, labware_id: &str) -> EngineResult<Point> {
        let labware = self.labware.get(labware_id)?;
        let origin = self.placement_origin(&labware.location, &labware.definition)?;
        Ok(origin + self.labware.offset_vector(labware_id)?)
    }

    /// Highest point of a loaded labware.
    pub fn labware_top(&self, labware_id: &str) -> EngineResult<f64> {
        let definition = self.labware.definition(labware_id)?;
        Ok(self.labware_origin(labware_id)?.z + definition.dimensions.z_dimension)
    }

    /// Center of a labware footprint at `height` above its origin.
    pub fn labware_center(&self, labware_id: &str, height: f64) -> EngineResult<Point> {
        let dimensions = self.labware.definition(labware_id)?.dimensions;
        Ok(self.labware_origin(labware_id)?
            + point(dimensions.x_dimension / 2.0, dimensions.y_dimension / 2.0, height))
    }

    /// Absolute position of a point relative to a well.
    pub fn well_position(
        &self,
        labware_id: &str,
        well_name: &str,
        well_location: &WellLocation,
    ) -> EngineResult<Point> {
        let well = self.labware.well(labware_id, well_name)?;
        let bottom = self.labware_origin(labware_id)? + well.bottom();
        let origin_z = match well_location.origin {
            WellOrigin::Top => well.depth,
            WellOrigin::Bottom => 0.0,
            WellOrigin::Center => well.depth / 2.0,
        };
        Ok(bottom + point(0.0, 0.0, origin_z) + well_location.offset.as_point())
    }

    /// Highest obstacle on the deck: any on-deck labware or module.
    pub fn highest_z(&self) -> f64 {
        let labware_tops = self
            .labware
            .all()
            .filter(|lw| lw.location.is_on_deck())
            .filter_map(|lw| self.labware_top(&lw.id).ok());
        let module_tops = self.modules.all().filter_map(|module| {
            self.areas
                .area(&module.addressable_area_name)
                .ok()
                .map(|area| area.position.z + module.definition.overall_height)
        });
        labware_tops.chain(module_tops).fold(0.0, f64::max)
    }

    /// Position of a point relative to an addressable area's top center.
    pub fn area_position(&self, area: &AddressableArea, offset: &WellOffset) -> Point {
        area.top_center() + offset.as_point()
    }

    // =========================================================================
    // Gripper
    // =========================================================================

    /// Jaw-center position to grip a loaded labware.
    pub fn grip_point(&self, labware_id: &str) -> EngineResult<Point> {
        let grip = self.labware.definition(labware_id)?.grip;
        self.labware_center(labware_id, grip.grip_height_from_labware_bottom)
    }

    /// Jaw-center position to release `definition` at `location`.
    ///
    /// Disposal areas release from above the area so the labware falls clear.
    pub fn drop_point(
        &self,
        location: &LabwareLocation,
        definition: &LabwareDefinition,
    ) -> EngineResult<Point> {
        if let LabwareLocation::AddressableArea {
            addressable_area_name,
        } = location
        {
            let area = self.areas.area(addressable_area_name)?;
            let clearance = match area.area_type {
                AreaType::WasteChute => Some(WASTE_CHUTE_DROP_HEIGHT),
                AreaType::MovableTrash => Some(TRASH_DROP_HEIGHT),
                _ => None,
            };
            if let Some(clearance) = clearance {
                return Ok(area.top_center() + point(0.0, 0.0, clearance));
            }
        }
        let origin = self.placement_origin(location, definition)?;
        let offset = match self.find_offset_id(definition, location)? {
            Some(id) => self
                .labware
                .offsets()
                .iter()
                .find(|o| o.id == id)
                .map(|o| o.vector)
                .unwrap_or(Point::ZERO),
            None => Point::ZERO,
        };
        Ok(origin
            + offset
            + point(
                definition.dimensions.x_dimension / 2.0,
                definition.dimensions.y_dimension / 2.0,
                definition.grip.grip_height_from_labware_bottom,
            ))
    }

    /// Plan a gripper move between two jaw-center positions.
    pub fn plan_gripper_move(
        &self,
        origin: Point,
        destination: Point,
        carried_height: f64,
        max_travel_z: f64,
    ) -> EngineResult<MotionPlan> {
        let request = MotionRequest {
            origin,
            origin_critical_point: Some(CriticalPoint::GripperJawCenter),
            destination,
            destination_critical_point: Some(CriticalPoint::GripperJawCenter),
            min_travel_z: self.highest_z() + carried_height,
            max_travel_z,
            extra_waypoints: Vec::new(),
            move_type: MoveType::GeneralArc,
            arc_margin: GRIPPER_TRAVEL_MARGIN,
        };
        Ok(plan_waypoints(&request)?)
    }

    // =========================================================================
    // Pipette motion
    // =========================================================================

    /// Critical point used to position a pipette.
    pub fn critical_point_for(&self, pipette_id: &str) -> EngineResult<Option<CriticalPoint>> {
        let pipette = self.pipettes.get(pipette_id)?;
        Ok((pipette.config.channels >= 96).then_some(CriticalPoint::XyCenter))
    }

    /// Highest reachable z for a pipette with its current tip.
    pub fn max_travel_z(&self, pipette_id: &str) -> EngineResult<f64> {
        let pipette = self.pipettes.get(pipette_id)?;
        Ok(pipette.config.max_travel_z(pipette.tip.map(|t| t.length)))
    }

    /// Detours needed between two slots because of loaded modules.
    pub fn dodge_waypoints(&self, from_slot: &str, to_slot: &str) -> EngineResult<Vec<(f64, f64)>> {
        let mut waypoints = Vec::new();
        for module in self.modules.all() {
            if !module.definition.should_dodge(from_slot, to_slot) {
                continue;
            }
            if let Some(through) = &module.definition.dodge_through {
                let center = self.areas.area(through)?.center();
                if !waypoints.contains(&(center.x, center.y)) {
                    waypoints.push((center.x, center.y));
                }
            }
        }
        Ok(waypoints)
    }

    /// Plan a pipette move from `origin` to a well.
    ///
    /// Moves within the same well are direct, moves within the same labware
    /// arc just over it, and everything else arcs over the whole deck.
    pub fn plan_to_well(
        &self,
        pipette_id: &str,
        origin: Point,
        labware_id: &str,
        well_name: &str,
        well_location: &WellLocation,
        options: MoveOptions,
    ) -> EngineResult<MotionPlan> {
        let destination = self.well_position(labware_id, well_name, well_location)?;
        let current = self.pipettes.location_of(pipette_id);
        let (move_type, min_travel_z, arc_margin) = match current {
            _ if options.force_direct => (MoveType::Direct, self.highest_z(), 0.0),
            Some(PipetteLocation::Well {
                labware_id: at_labware,
                well_name: at_well,
            }) if at_labware == labware_id && at_well == well_name => {
                (MoveType::Direct, self.highest_z(), 0.0)
            }
            Some(PipetteLocation::Well {
                labware_id: at_labware,
                ..
            }) if at_labware == labware_id => (
                MoveType::InLabwareArc,
                self.labware_top(labware_id)?,
                IN_LABWARE_ARC_Z_MARGIN,
            ),
            _ => (MoveType::GeneralArc, self.highest_z(), GENERAL_ARC_Z_MARGIN),
        };

        let to_slot = self.slot_of(self.labware.location(labware_id)?)?;
        let extra_waypoints = self.dodges_from(current, to_slot.as_deref(), move_type)?;
        let critical_point = self.critical_point_for(pipette_id)?;
        let request = MotionRequest {
            origin,
            origin_critical_point: critical_point,
            destination,
            destination_critical_point: critical_point,
            min_travel_z: min_travel_z.max(options.minimum_z_height.unwrap_or(f64::MIN)),
            max_travel_z: self.max_travel_z(pipette_id)?,
            extra_waypoints,
            move_type,
            arc_margin,
        };
        Ok(plan_waypoints(&request)?)
    }

    /// Plan a pipette move from `origin` to an addressable area.
    pub fn plan_to_area(
        &self,
        pipette_id: &str,
        origin: Point,
        area: &AddressableArea,
        offset: &WellOffset,
        options: MoveOptions,
    ) -> EngineResult<MotionPlan> {
        let destination = self.area_position(area, offset);
        let current = self.pipettes.location_of(pipette_id);
        let already_there = matches!(
            current,
            Some(PipetteLocation::AddressableArea { addressable_area_name }) if *addressable_area_name == area.name
        );
        let move_type = if options.force_direct || already_there {
            MoveType::Direct
        } else {
            MoveType::GeneralArc
        };
        let extra_waypoints = self.dodges_from(current, Some(&area.base_slot), move_type)?;
        let critical_point = self.critical_point_for(pipette_id)?;
        let request = MotionRequest {
            origin,
            origin_critical_point: critical_point,
            destination,
            destination_critical_point: critical_point,
            min_travel_z: self
                .highest_z()
                .max(options.minimum_z_height.unwrap_or(f64::MIN)),
            max_travel_z: self.max_travel_z(pipette_id)?,
            extra_waypoints,
            move_type,
            arc_margin: GENERAL_ARC_Z_MARGIN,
        };
        Ok(plan_waypoints(&request)?)
    }

    fn dodges_from(
        &self,
        current: Option<&PipetteLocation>,
        to_slot: Option<&str>,
        move_type: MoveType,
    ) -> EngineResult<Vec<(f64, f64)>> {
        if move_type != MoveType::GeneralArc {
            return Ok(Vec::new());
        }
        let from_slot = match current {
            Some(location) => self.slot_of_pipette_location(location)?,
            None => None,
        };
        match (from_slot, to_slot) {
            (Some(from), Some(to)) => self.dodge_waypoints(&from, to),
            _ => Ok(Vec::new()),
        }
    }
}
