//! Loaded labware, their locations, lids and calibration offsets.

use super::StateStore;
use crate::actions::Action;
use chrono::{DateTime, Utc};
use deck_core::definitions::{LabwareDefinition, LabwareUri, ModuleModel, WellDefinition};
use deck_core::error::{EngineError, EngineResult};
use deck_core::types::{LabwareLocation, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A labware known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedLabware {
    pub id: String,
    pub definition_uri: LabwareUri,
    pub location: LabwareLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Lid currently covering this labware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid_id: Option<String>,
    #[serde(skip)]
    pub definition: Arc<LabwareDefinition>,
}

/// Where a calibration offset applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareOffsetLocation {
    pub slot_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_model: Option<ModuleModel>,
}

/// A calibration vector for one definition at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabwareOffset {
    pub id: String,
    pub definition_uri: LabwareUri,
    pub location: LabwareOffsetLocation,
    pub vector: Point,
    pub created_at: DateTime<Utc>,
}

/// Labware slice of engine state.
#[derive(Debug, Default)]
pub struct LabwareStore {
    labware: BTreeMap<String, LoadedLabware>,
    load_order: Vec<String>,
    offsets: Vec<LabwareOffset>,
}

impl LabwareStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, labware_id: &str) -> EngineResult<&LoadedLabware> {
        self.labware
            .get(labware_id)
            .ok_or_else(|| EngineError::LabwareNotFound(labware_id.to_string()))
    }

    pub fn definition(&self, labware_id: &str) -> EngineResult<&Arc<LabwareDefinition>> {
        Ok(&self.get(labware_id)?.definition)
    }

    pub fn location(&self, labware_id: &str) -> EngineResult<&LabwareLocation> {
        Ok(&self.get(labware_id)?.location)
    }

    /// Every labware in load order.
    pub fn all(&self) -> impl Iterator<Item = &LoadedLabware> {
        self.load_order.iter().filter_map(|id| self.labware.get(id))
    }

    pub fn len(&self) -> usize {
        self.labware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labware.is_empty()
    }

    /// Labware occupying `location`. Off-deck and system locations are never occupied.
    pub fn labware_at(&self, location: &LabwareLocation) -> Option<&LoadedLabware> {
        if !location.is_on_deck() {
            return None;
        }
        self.all().find(|lw| lw.location.is_same_place(location))
    }

    /// Labware stacked directly on `labware_id`.
    pub fn labware_on_top(&self, labware_id: &str) -> Option<&LoadedLabware> {
        self.all().find(|lw| {
            matches!(&lw.location, LabwareLocation::OnLabware { labware_id: below } if below == labware_id)
        })
    }

    /// Lid covering `labware_id`, if any.
    pub fn lid(&self, labware_id: &str) -> EngineResult<Option<&str>> {
        Ok(self.get(labware_id)?.lid_id.as_deref())
    }

    /// Well definition, failing for unknown labware or wells.
    pub fn well(&self, labware_id: &str, well_name: &str) -> EngineResult<&WellDefinition> {
        self.definition(labware_id)?
            .well(well_name)
            .ok_or_else(|| EngineError::WellDoesNotExist {
                labware_id: labware_id.to_string(),
                well_name: well_name.to_string(),
            })
    }

    /// Calibration vector applied to `labware_id`.
    pub fn offset_vector(&self, labware_id: &str) -> EngineResult<Point> {
        let labware = self.get(labware_id)?;
        Ok(labware
            .offset_id
            .as_deref()
            .and_then(|id| self.offsets.iter().find(|o| o.id == id))
            .map(|o| o.vector)
            .unwrap_or(Point::ZERO))
    }

    /// Most recently added offset matching a definition and location.
    pub fn find_offset(
        &self,
        uri: &LabwareUri,
        location: &LabwareOffsetLocation,
    ) -> Option<&LabwareOffset> {
        self.offsets
            .iter()
            .rev()
            .find(|o| &o.definition_uri == uri && &o.location == location)
    }

    pub fn offsets(&self) -> &[LabwareOffset] {
        &self.offsets
    }
}

impl StateStore for LabwareStore {
    fn handle_action(&mut self, action: &Action) {
        if let Action::AddLabwareOffset { offset } = action {
            self.offsets.push(offset.clone());
            return;
        }
        let Some(update) = action.state_update() else {
            return;
        };

        for load in &update.loaded_labware {
            if !self.labware.contains_key(&load.labware_id) {
                self.load_order.push(load.labware_id.clone());
            }
            self.labware.insert(
                load.labware_id.clone(),
                LoadedLabware {
                    id: load.labware_id.clone(),
                    definition_uri: load.definition.uri(),
                    location: load.location.clone(),
                    offset_id: load.offset_id.clone(),
                    display_name: load.display_name.clone(),
                    lid_id: None,
                    definition: Arc::clone(&load.definition),
                },
            );
        }

        for (labware_id, change) in &update.labware_locations {
            match self.labware.get_mut(labware_id) {
                Some(labware) => {
                    labware.location = change.location.clone();
                    labware.offset_id = change.offset_id.clone();
                }
                None => invariant_violation!("moved unknown labware {}", labware_id),
            }
        }

        for (labware_id, lid_id) in &update.labware_lids {
            match self.labware.get_mut(labware_id) {
                Some(labware) => labware.lid_id = lid_id.clone(),
                None => invariant_violation!("set lid on unknown labware {}", labware_id),
            }
        }
    }
}
