//! Loaded modules and their module-specific sub-state.

use super::StateStore;
use crate::actions::Action;
use crate::state_update::ModuleLoad;
use deck_core::definitions::{ModuleDefinition, ModuleModel, ModuleType};
use deck_core::error::{EngineError, EngineResult};
use deck_core::types::DeckSlotLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Heater-shaker labware latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatchStatus {
    Unknown,
    Open,
    Closed,
}

/// Module-specific state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "moduleType", rename_all = "camelCase")]
pub enum ModuleSubState {
    #[serde(rename_all = "camelCase")]
    Magnetic { engaged_height: Option<f64> },
    #[serde(rename_all = "camelCase")]
    Temperature { target_celsius: Option<f64> },
    #[serde(rename_all = "camelCase")]
    Thermocycler {
        lid_open: bool,
        target_block_celsius: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    HeaterShaker {
        latch: LatchStatus,
        target_speed: Option<u32>,
    },
    MagneticBlock,
}

impl ModuleSubState {
    /// State of a freshly loaded module of `module_type`.
    pub fn initial(module_type: ModuleType) -> Self {
        match module_type {
            ModuleType::Magnetic => ModuleSubState::Magnetic {
                engaged_height: None,
            },
            ModuleType::Temperature => ModuleSubState::Temperature {
                target_celsius: None,
            },
            ModuleType::Thermocycler => ModuleSubState::Thermocycler {
                lid_open: false,
                target_block_celsius: None,
            },
            ModuleType::HeaterShaker => ModuleSubState::HeaterShaker {
                latch: LatchStatus::Unknown,
                target_speed: None,
            },
            ModuleType::MagneticBlock => ModuleSubState::MagneticBlock,
        }
    }
}

/// A module known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedModule {
    pub id: String,
    pub model: ModuleModel,
    pub serial_number: String,
    pub location: DeckSlotLocation,
    pub addressable_area_name: String,
    pub state: ModuleSubState,
    #[serde(skip)]
    pub definition: Arc<ModuleDefinition>,
}

impl LoadedModule {
    pub fn module_type(&self) -> ModuleType {
        self.model.module_type()
    }
}

/// Module slice of engine state.
#[derive(Debug, Default)]
pub struct ModuleStore {
    modules: BTreeMap<String, LoadedModule>,
    load_order: Vec<String>,
}

impl ModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module_id: &str) -> EngineResult<&LoadedModule> {
        self.modules
            .get(module_id)
            .ok_or_else(|| EngineError::ModuleNotFound(module_id.to_string()))
    }

    /// Module of the expected family.
    pub fn get_typed(&self, module_id: &str, expected: ModuleType) -> EngineResult<&LoadedModule> {
        let module = self.get(module_id)?;
        if module.module_type() != expected {
            return Err(EngineError::WrongModuleType {
                module_id: module_id.to_string(),
                expected: format!("{:?} module", expected),
            });
        }
        Ok(module)
    }

    pub fn all(&self) -> impl Iterator<Item = &LoadedModule> {
        self.load_order.iter().filter_map(|id| self.modules.get(id))
    }

    pub fn in_slot(&self, slot_name: &str) -> Option<&LoadedModule> {
        self.all().find(|m| m.location.slot_name == slot_name)
    }

    pub fn by_serial(&self, serial_number: &str) -> Option<&LoadedModule> {
        self.all().find(|m| m.serial_number == serial_number)
    }

    /// Fail unless labware on the module can be reached.
    ///
    /// Pipetting and gripping both need an open thermocycler lid and a
    /// stationary heater-shaker. The gripper additionally needs the
    /// heater-shaker latch open.
    pub fn ensure_labware_accessible(&self, module_id: &str, by_gripper: bool) -> EngineResult<()> {
        let module = self.get(module_id)?;
        match &module.state {
            ModuleSubState::Thermocycler { lid_open: false, .. } => {
                Err(EngineError::ThermocyclerLidClosed(module_id.to_string()))
            }
            ModuleSubState::HeaterShaker {
                target_speed: Some(_),
                ..
            } => Err(EngineError::HeaterShakerShaking(module_id.to_string())),
            ModuleSubState::HeaterShaker { latch, .. }
                if by_gripper && *latch != LatchStatus::Open =>
            {
                Err(EngineError::HeaterShakerLatch {
                    module_id: module_id.to_string(),
                    required: "open".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, load: &ModuleLoad) {
        if !self.modules.contains_key(&load.module_id) {
            self.load_order.push(load.module_id.clone());
        }
        self.modules.insert(
            load.module_id.clone(),
            LoadedModule {
                id: load.module_id.clone(),
                model: load.definition.model,
                serial_number: load.serial_number.clone(),
                location: load.location.clone(),
                addressable_area_name: load.addressable_area_name.clone(),
                state: ModuleSubState::initial(load.definition.model.module_type()),
                definition: Arc::clone(&load.definition),
            },
        );
    }
}

impl StateStore for ModuleStore {
    fn handle_action(&mut self, action: &Action) {
        if let Action::AddModule { module } = action {
            self.insert(module);
            return;
        }
        let Some(update) = action.state_update() else {
            return;
        };
        for load in &update.loaded_modules {
            self.insert(load);
        }
        for (module_id, state) in &update.module_states {
            match self.modules.get_mut(module_id) {
                Some(module) => module.state = state.clone(),
                None => invariant_violation!("state change on unknown module {}", module_id),
            }
        }
    }
}
