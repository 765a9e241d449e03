//! Labware, deck and module definition lookups.

use crate::definitions::{DeckDefinition, LabwareDefinition, ModuleDefinition, ModuleModel};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from definition lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataProviderError {
    /// No definition with this identity exists.
    #[error("Labware definition {namespace}/{load_name}/{version} not found")]
    LabwareNotFound {
        namespace: String,
        load_name: String,
        version: u32,
    },

    /// No definition for this module model.
    #[error("Module definition for {0} not found")]
    ModuleNotFound(ModuleModel),

    /// The backing store could not be read.
    #[error("Definition source unavailable: {0}")]
    Unavailable(String),
}

/// Source of immutable definitions.
///
/// Lookups may hit disk or network but must be idempotent: asking twice for
/// the same identity returns equal definitions.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn labware_definition(
        &self,
        load_name: &str,
        namespace: &str,
        version: u32,
    ) -> Result<LabwareDefinition, DataProviderError>;

    async fn deck_definition(&self) -> Result<DeckDefinition, DataProviderError>;

    async fn module_definition(
        &self,
        model: ModuleModel,
    ) -> Result<ModuleDefinition, DataProviderError>;
}
