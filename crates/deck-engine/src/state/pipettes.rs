//! Loaded pipettes: tips, volumes and where the gantry last left them.

use super::StateStore;
use crate::actions::Action;
use crate::state_update::PipetteLocationUpdate;
use deck_core::definitions::PipetteConfig;
use deck_core::error::{EngineError, EngineResult};
use deck_core::types::{MountType, PipetteLocation, TipGeometry};
use serde::Serialize;
use std::collections::BTreeMap;

/// A pipette known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedPipette {
    pub id: String,
    pub mount: MountType,
    pub pipette_name: String,
    pub config: PipetteConfig,
    pub tip: Option<TipGeometry>,
    /// Liquid in the tip; `None` when there is no tip or the amount is unknown
    pub current_volume: Option<f64>,
    pub ready_to_aspirate: bool,
    pub tip_rack_ids: Vec<String>,
}

impl LoadedPipette {
    /// Largest volume the pipette can hold with its current tip.
    pub fn working_volume(&self) -> f64 {
        match self.tip {
            Some(tip) => self.config.max_volume.min(tip.volume),
            None => self.config.max_volume,
        }
    }
}

/// Last known position of a pipette relative to deck items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPipetteLocation {
    pub pipette_id: String,
    pub location: PipetteLocation,
}

/// Pipette slice of engine state.
#[derive(Debug, Default)]
pub struct PipetteStore {
    pipettes: BTreeMap<String, LoadedPipette>,
    load_order: Vec<String>,
    current_location: Option<CurrentPipetteLocation>,
}

impl PipetteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pipette_id: &str) -> EngineResult<&LoadedPipette> {
        self.pipettes
            .get(pipette_id)
            .ok_or_else(|| EngineError::PipetteNotFound(pipette_id.to_string()))
    }

    pub fn all(&self) -> impl Iterator<Item = &LoadedPipette> {
        self.load_order.iter().filter_map(|id| self.pipettes.get(id))
    }

    pub fn on_mount(&self, mount: MountType) -> Option<&LoadedPipette> {
        self.all().find(|p| p.mount == mount)
    }

    pub fn current_location(&self) -> Option<&CurrentPipetteLocation> {
        self.current_location.as_ref()
    }

    /// Location of `pipette_id`, if it is the pipette that moved last.
    pub fn location_of(&self, pipette_id: &str) -> Option<&PipetteLocation> {
        self.current_location
            .as_ref()
            .filter(|c| c.pipette_id == pipette_id)
            .map(|c| &c.location)
    }

    /// Attached tip, failing when there is none.
    pub fn attached_tip(&self, pipette_id: &str) -> EngineResult<TipGeometry> {
        self.get(pipette_id)?
            .tip
            .ok_or_else(|| EngineError::TipNotAttached(pipette_id.to_string()))
    }

    /// Fail when a tip is attached.
    pub fn ensure_no_tip(&self, pipette_id: &str) -> EngineResult<()> {
        match self.get(pipette_id)?.tip {
            Some(_) => Err(EngineError::TipAlreadyAttached(pipette_id.to_string())),
            None => Ok(()),
        }
    }

    /// Liquid currently held, failing when unknown.
    pub fn known_volume(&self, pipette_id: &str) -> EngineResult<f64> {
        self.get(pipette_id)?
            .current_volume
            .ok_or_else(|| EngineError::PipetteVolumeUnknown(pipette_id.to_string()))
    }
}

impl StateStore for PipetteStore {
    fn handle_action(&mut self, action: &Action) {
        let Some(update) = action.state_update() else {
            return;
        };

        for load in &update.loaded_pipettes {
            if !self.pipettes.contains_key(&load.pipette_id) {
                self.load_order.push(load.pipette_id.clone());
            }
            self.pipettes.insert(
                load.pipette_id.clone(),
                LoadedPipette {
                    id: load.pipette_id.clone(),
                    mount: load.mount,
                    pipette_name: load.config.pipette_name.clone(),
                    config: load.config.clone(),
                    tip: None,
                    current_volume: None,
                    ready_to_aspirate: false,
                    tip_rack_ids: load.tip_rack_ids.clone(),
                },
            );
        }

        for (pipette_id, tip) in &update.pipette_tips {
            match self.pipettes.get_mut(pipette_id) {
                Some(pipette) => pipette.tip = *tip,
                None => invariant_violation!("tip change on unknown pipette {}", pipette_id),
            }
        }

        for (pipette_id, volume) in &update.pipette_volumes {
            match self.pipettes.get_mut(pipette_id) {
                Some(pipette) => pipette.current_volume = *volume,
                None => invariant_violation!("volume change on unknown pipette {}", pipette_id),
            }
        }

        for (pipette_id, ready) in &update.pipette_ready_to_aspirate {
            if let Some(pipette) = self.pipettes.get_mut(pipette_id) {
                pipette.ready_to_aspirate = *ready;
            }
        }

        match &update.pipette_location {
            Some(PipetteLocationUpdate::Clear) => self.current_location = None,
            Some(PipetteLocationUpdate::Set {
                pipette_id,
                location,
            }) => {
                self.current_location = Some(CurrentPipetteLocation {
                    pipette_id: pipette_id.clone(),
                    location: location.clone(),
                });
            }
            None => {}
        }
    }
}
