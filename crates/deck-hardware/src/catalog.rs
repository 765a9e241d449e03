//! Definitions compiled into the binary.
//!
//! The catalog covers the standard deck, every module model and a small set
//! of common labware in the `std` namespace. Definitions are parsed on each
//! lookup so callers always receive an owned, unshared copy.

use async_trait::async_trait;
use deck_core::definitions::{DeckDefinition, LabwareDefinition, ModuleDefinition, ModuleModel};
use deck_core::provider::{DataProvider, DataProviderError};
use serde::de::DeserializeOwned;

/// Namespace of every built-in labware definition.
pub const STANDARD_NAMESPACE: &str = "std";

const DECK: &str = include_str!("../definitions/deck/standard.json");

const LABWARE: &[(&str, &str)] = &[
    (
        "wellplate_96_360ul_flat",
        include_str!("../definitions/labware/wellplate_96_360ul_flat.json"),
    ),
    (
        "pcr_plate_96_200ul",
        include_str!("../definitions/labware/pcr_plate_96_200ul.json"),
    ),
    (
        "tiprack_50ul",
        include_str!("../definitions/labware/tiprack_50ul.json"),
    ),
    (
        "tiprack_1000ul",
        include_str!("../definitions/labware/tiprack_1000ul.json"),
    ),
    (
        "reservoir_12_15ml",
        include_str!("../definitions/labware/reservoir_12_15ml.json"),
    ),
    (
        "aluminum_block_adapter_96",
        include_str!("../definitions/labware/aluminum_block_adapter_96.json"),
    ),
    (
        "plate_lid",
        include_str!("../definitions/labware/plate_lid.json"),
    ),
    (
        "fixed_trash",
        include_str!("../definitions/labware/fixed_trash.json"),
    ),
];

const MODULES: &[(ModuleModel, &str)] = &[
    (
        ModuleModel::TemperatureModuleV2,
        include_str!("../definitions/modules/temperatureModuleV2.json"),
    ),
    (
        ModuleModel::MagneticModuleV2,
        include_str!("../definitions/modules/magneticModuleV2.json"),
    ),
    (
        ModuleModel::HeaterShakerModuleV1,
        include_str!("../definitions/modules/heaterShakerModuleV1.json"),
    ),
    (
        ModuleModel::ThermocyclerModuleV2,
        include_str!("../definitions/modules/thermocyclerModuleV2.json"),
    ),
    (
        ModuleModel::MagneticBlockV1,
        include_str!("../definitions/modules/magneticBlockV1.json"),
    ),
];

fn parse<T: DeserializeOwned>(what: &str, source: &str) -> Result<T, DataProviderError> {
    serde_json::from_str(source)
        .map_err(|e| DataProviderError::Unavailable(format!("built-in {}: {}", what, e)))
}

/// Provider backed by the compiled-in definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Load names of every built-in labware definition.
    pub fn labware_names(&self) -> impl Iterator<Item = &'static str> {
        LABWARE.iter().map(|(name, _)| *name)
    }

    /// Every built-in labware definition, parsed.
    pub fn all_labware(&self) -> Result<Vec<LabwareDefinition>, DataProviderError> {
        LABWARE
            .iter()
            .map(|(name, source)| parse(name, source))
            .collect()
    }

    pub(crate) fn labware(
        &self,
        load_name: &str,
        namespace: &str,
        version: u32,
    ) -> Result<LabwareDefinition, DataProviderError> {
        let not_found = || DataProviderError::LabwareNotFound {
            namespace: namespace.to_string(),
            load_name: load_name.to_string(),
            version,
        };
        let (_, source) = LABWARE
            .iter()
            .find(|(name, _)| *name == load_name)
            .ok_or_else(not_found)?;
        let definition: LabwareDefinition = parse(load_name, source)?;
        if definition.namespace != namespace || definition.version != version {
            return Err(not_found());
        }
        Ok(definition)
    }

    pub(crate) fn deck(&self) -> Result<DeckDefinition, DataProviderError> {
        parse("deck", DECK)
    }

    pub(crate) fn module(&self, model: ModuleModel) -> Result<ModuleDefinition, DataProviderError> {
        let (_, source) = MODULES
            .iter()
            .find(|(m, _)| *m == model)
            .ok_or(DataProviderError::ModuleNotFound(model))?;
        parse(model.as_str(), source)
    }
}

#[async_trait]
impl DataProvider for BuiltinCatalog {
    async fn labware_definition(
        &self,
        load_name: &str,
        namespace: &str,
        version: u32,
    ) -> Result<LabwareDefinition, DataProviderError> {
        self.labware(load_name, namespace, version)
    }

    async fn deck_definition(&self) -> Result<DeckDefinition, DataProviderError> {
        self.deck()
    }

    async fn module_definition(
        &self,
        model: ModuleModel,
    ) -> Result<ModuleDefinition, DataProviderError> {
        self.module(model)
    }
}
