//! Module definition schema.

use crate::types::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Specific module hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleModel {
    TemperatureModuleV2,
    MagneticModuleV2,
    HeaterShakerModuleV1,
    ThermocyclerModuleV2,
    MagneticBlockV1,
}

impl ModuleModel {
    /// Module family of this model.
    pub fn module_type(self) -> ModuleType {
        match self {
            ModuleModel::TemperatureModuleV2 => ModuleType::Temperature,
            ModuleModel::MagneticModuleV2 => ModuleType::Magnetic,
            ModuleModel::HeaterShakerModuleV1 => ModuleType::HeaterShaker,
            ModuleModel::ThermocyclerModuleV2 => ModuleType::Thermocycler,
            ModuleModel::MagneticBlockV1 => ModuleType::MagneticBlock,
        }
    }

    /// Wire name of the model.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleModel::TemperatureModuleV2 => "temperatureModuleV2",
            ModuleModel::MagneticModuleV2 => "magneticModuleV2",
            ModuleModel::HeaterShakerModuleV1 => "heaterShakerModuleV1",
            ModuleModel::ThermocyclerModuleV2 => "thermocyclerModuleV2",
            ModuleModel::MagneticBlockV1 => "magneticBlockV1",
        }
    }

    /// Every known model.
    pub const ALL: [ModuleModel; 5] = [
        ModuleModel::TemperatureModuleV2,
        ModuleModel::MagneticModuleV2,
        ModuleModel::HeaterShakerModuleV1,
        ModuleModel::ThermocyclerModuleV2,
        ModuleModel::MagneticBlockV1,
    ];
}

impl fmt::Display for ModuleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleType {
    Temperature,
    Magnetic,
    HeaterShaker,
    Thermocycler,
    MagneticBlock,
}

/// A slot pair whose direct traverse would strike the module superstructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DodgeTransition {
    pub from: String,
    pub to: String,
}

/// Physical module definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    pub model: ModuleModel,
    pub display_name: String,
    /// Models that satisfy a load request for this model
    #[serde(default)]
    pub compatible_with: Vec<ModuleModel>,
    /// Prefix of the module's addressable area; the slot name is appended
    /// unless `fixed_slot` is set
    pub addressable_area_prefix: String,
    /// Slot the module must occupy, for modules with a single position
    #[serde(default)]
    pub fixed_slot: Option<String>,
    /// Labware origin relative to the module's addressable area
    pub labware_offset: Point,
    /// Height of the module above the deck, including any lid
    pub overall_height: f64,
    /// Magnet engage height bounds, for magnetic modules
    #[serde(default)]
    pub max_engage_height: Option<f64>,
    /// Target temperature bounds in °C
    #[serde(default)]
    pub temperature_range: Option<(f64, f64)>,
    /// Shake speed bounds in rpm
    #[serde(default)]
    pub speed_range: Option<(u32, u32)>,
    /// Slot pairs whose traverses must detour around this module
    #[serde(default)]
    pub dodge_transitions: Vec<DodgeTransition>,
    /// Slot whose center is used as the detour waypoint
    #[serde(default)]
    pub dodge_through: Option<String>,
}

impl ModuleDefinition {
    /// Addressable area name for this module placed in `slot_name`.
    pub fn addressable_area_for(&self, slot_name: &str) -> String {
        match &self.fixed_slot {
            Some(_) => self.addressable_area_prefix.clone(),
            None => format!("{}{}", self.addressable_area_prefix, slot_name),
        }
    }

    /// Whether an attached module of `model` satisfies a request for this definition.
    pub fn accepts(&self, model: ModuleModel) -> bool {
        model == self.model || self.compatible_with.contains(&model)
    }

    /// Whether a move from `from` to `to` must detour around this module.
    pub fn should_dodge(&self, from: &str, to: &str) -> bool {
        self.dodge_transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }
}
