//! Per-domain state stores.
//!
//! Each store owns one slice of engine state and changes only in
//! [`StateStore::handle_action`]. Everything else reads stores through shared
//! references: a `&LabwareStore` is the labware view. Getters that take an id
//! fail with the domain's not-found error for unknown ids and never fail
//! otherwise.
//!
//! [`EngineState`] bundles the stores and applies actions to them in a fixed
//! order: commands, labware, pipettes, modules, addressable areas, lid stacks,
//! tips.

pub mod addressable_areas;
pub mod commands;
pub mod labware;
pub mod lid_stacks;
pub mod modules;
pub mod pipettes;
pub mod tips;

use crate::actions::Action;
use crate::geometry::GeometryView;
use deck_core::definitions::DeckDefinition;
use std::sync::Arc;

pub use addressable_areas::{
    AddressableArea, AddressableAreaStore, CutoutFixturePlacement, DeckConfiguration,
};
pub use commands::{CommandStore, RunStatus};
pub use labware::{LabwareOffset, LabwareOffsetLocation, LabwareStore, LoadedLabware};
pub use lid_stacks::{LidStack, LidStackStore};
pub use modules::{LatchStatus, LoadedModule, ModuleStore, ModuleSubState};
pub use pipettes::{CurrentPipetteLocation, LoadedPipette, PipetteStore};
pub use tips::TipStore;

/// A slice of engine state that reacts to actions.
pub trait StateStore {
    /// Apply `action` to this slice. Must not fail for structurally valid actions.
    fn handle_action(&mut self, action: &Action);
}

/// All engine state.
#[derive(Debug)]
pub struct EngineState {
    commands: CommandStore,
    labware: LabwareStore,
    pipettes: PipetteStore,
    modules: ModuleStore,
    addressable_areas: AddressableAreaStore,
    lid_stacks: LidStackStore,
    tips: TipStore,
}

impl EngineState {
    /// Empty state over `deck`.
    pub fn new(deck: Arc<DeckDefinition>, configuration: DeckConfiguration) -> Self {
        Self {
            commands: CommandStore::new(),
            labware: LabwareStore::new(),
            pipettes: PipetteStore::new(),
            modules: ModuleStore::new(),
            addressable_areas: AddressableAreaStore::new(deck, configuration),
            lid_stacks: LidStackStore::new(),
            tips: TipStore::new(),
        }
    }

    pub fn commands(&self) -> &CommandStore {
        &self.commands
    }

    pub fn labware(&self) -> &LabwareStore {
        &self.labware
    }

    pub fn pipettes(&self) -> &PipetteStore {
        &self.pipettes
    }

    pub fn modules(&self) -> &ModuleStore {
        &self.modules
    }

    pub fn addressable_areas(&self) -> &AddressableAreaStore {
        &self.addressable_areas
    }

    pub fn lid_stacks(&self) -> &LidStackStore {
        &self.lid_stacks
    }

    pub fn tips(&self) -> &TipStore {
        &self.tips
    }

    /// Derived geometry over the current state.
    pub fn geometry(&self) -> GeometryView<'_> {
        GeometryView::new(
            &self.labware,
            &self.modules,
            &self.addressable_areas,
            &self.pipettes,
        )
    }

    /// Feed `action` to every store in registration order.
    pub(crate) fn apply(&mut self, action: &Action) {
        self.commands.handle_action(action);
        self.labware.handle_action(action);
        self.pipettes.handle_action(action);
        self.modules.handle_action(action);
        self.addressable_areas.handle_action(action);
        self.lid_stacks.handle_action(action);
        self.tips.handle_action(action);
    }
}
