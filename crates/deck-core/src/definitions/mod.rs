//! Definition schemas consumed from the data provider.

pub mod deck;
pub mod labware;
pub mod module;
pub mod pipette;

pub use deck::{
    AddressableAreaDefinition, AreaType, BoundingBox, CutoutDefinition, CutoutFixtureDefinition,
    DeckDefinition,
};
pub use labware::{
    DisplayCategory, GripParameters, LabwareDefinition, LabwareRole, LabwareUri, WellDefinition,
    WellShape,
};
pub use module::{DodgeTransition, ModuleDefinition, ModuleModel, ModuleType};
pub use pipette::{FlowRates, PipetteConfig};
