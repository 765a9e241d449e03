//! Sparse, mergeable state patches.
//!
//! A [`StateUpdate`] describes the net effect of one command on engine state.
//! Every field is either "no change" (`None`, an empty collection) or a
//! concrete new value. Command implementations build updates with the
//! chainable setters below; stores read the fields they own when the
//! executor dispatches the update inside a succeed or fail action.
//!
//! # Merge
//!
//! [`StateUpdate::merge`] combines two patches so that applying the result
//! equals applying `self` then `other`. Merge is associative:
//!
//! - `Option` fields: the later value wins
//! - map fields: key-wise, the later value wins
//! - set fields: union
//! - list fields (loads, tip consumption): concatenation

use crate::state::modules::ModuleSubState;
use deck_core::definitions::{LabwareDefinition, LabwareUri, ModuleDefinition, PipetteConfig};
use deck_core::types::{DeckSlotLocation, LabwareLocation, MountType, PipetteLocation, TipGeometry};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A labware entering the deck.
#[derive(Debug, Clone, PartialEq)]
pub struct LabwareLoad {
    pub labware_id: String,
    pub definition: Arc<LabwareDefinition>,
    pub location: LabwareLocation,
    pub offset_id: Option<String>,
    pub display_name: Option<String>,
}

/// New placement of an existing labware.
#[derive(Debug, Clone, PartialEq)]
pub struct LabwareMove {
    pub location: LabwareLocation,
    pub offset_id: Option<String>,
}

/// A pipette being loaded on a mount.
#[derive(Debug, Clone, PartialEq)]
pub struct PipetteLoad {
    pub pipette_id: String,
    pub mount: MountType,
    pub config: PipetteConfig,
    pub tip_rack_ids: Vec<String>,
}

/// A module being loaded into a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleLoad {
    pub module_id: String,
    pub serial_number: String,
    pub definition: Arc<ModuleDefinition>,
    pub location: DeckSlotLocation,
    pub addressable_area_name: String,
}

/// Tip rack wells consumed by a pick-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipsUsed {
    pub labware_id: String,
    pub well_names: Vec<String>,
}

/// Full membership of a lid stack after a change.
#[derive(Debug, Clone, PartialEq)]
pub struct LidStackUpdate {
    pub definition_uri: LabwareUri,
    pub location: LabwareLocation,
    /// Bottom lid first
    pub lid_ids: Vec<String>,
}

/// Change to the "where is the pipette" bookkeeping used by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipetteLocationUpdate {
    /// Nothing is known about what is under any pipette
    Clear,
    /// `pipette_id` is now at `location`
    Set {
        pipette_id: String,
        location: PipetteLocation,
    },
}

/// Sparse patch produced by a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub pipette_location: Option<PipetteLocationUpdate>,
    pub loaded_labware: Vec<LabwareLoad>,
    pub loaded_pipettes: Vec<PipetteLoad>,
    pub loaded_modules: Vec<ModuleLoad>,
    pub labware_locations: BTreeMap<String, LabwareMove>,
    /// Lid currently covering each labware, `None` when uncovered
    pub labware_lids: BTreeMap<String, Option<String>>,
    pub lid_stacks: BTreeMap<String, LidStackUpdate>,
    pub module_states: BTreeMap<String, ModuleSubState>,
    pub tips_used: Vec<TipsUsed>,
    /// Attached tip per pipette, `None` when no tip
    pub pipette_tips: BTreeMap<String, Option<TipGeometry>>,
    /// Volume in each pipette's tip, `None` when unknown
    pub pipette_volumes: BTreeMap<String, Option<f64>>,
    pub pipette_ready_to_aspirate: BTreeMap<String, bool>,
    pub addressable_areas_used: BTreeSet<String>,
}

impl StateUpdate {
    /// An update with no changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine with a later update. `other` wins wherever both set a value.
    pub fn merge(mut self, other: StateUpdate) -> StateUpdate {
        if other.pipette_location.is_some() {
            self.pipette_location = other.pipette_location;
        }
        self.loaded_labware.extend(other.loaded_labware);
        self.loaded_pipettes.extend(other.loaded_pipettes);
        self.loaded_modules.extend(other.loaded_modules);
        self.labware_locations.extend(other.labware_locations);
        self.labware_lids.extend(other.labware_lids);
        self.lid_stacks.extend(other.lid_stacks);
        self.module_states.extend(other.module_states);
        self.tips_used.extend(other.tips_used);
        self.pipette_tips.extend(other.pipette_tips);
        self.pipette_volumes.extend(other.pipette_volumes);
        self.pipette_ready_to_aspirate
            .extend(other.pipette_ready_to_aspirate);
        self.addressable_areas_used
            .extend(other.addressable_areas_used);
        self
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn set_pipette_location(mut self, pipette_id: &str, location: PipetteLocation) -> Self {
        self.pipette_location = Some(PipetteLocationUpdate::Set {
            pipette_id: pipette_id.to_string(),
            location,
        });
        self
    }

    /// Forget what is under every pipette.
    pub fn clear_pipette_locations(mut self) -> Self {
        self.pipette_location = Some(PipetteLocationUpdate::Clear);
        self
    }

    pub fn load_labware(mut self, load: LabwareLoad) -> Self {
        self.loaded_labware.push(load);
        self
    }

    pub fn load_pipette(mut self, load: PipetteLoad) -> Self {
        self.loaded_pipettes.push(load);
        self
    }

    pub fn load_module(mut self, load: ModuleLoad) -> Self {
        self.loaded_modules.push(load);
        self
    }

    pub fn move_labware(
        mut self,
        labware_id: &str,
        location: LabwareLocation,
        offset_id: Option<String>,
    ) -> Self {
        self.labware_locations.insert(
            labware_id.to_string(),
            LabwareMove {
                location,
                offset_id,
            },
        );
        self
    }

    pub fn set_labware_lid(mut self, labware_id: &str, lid_id: Option<String>) -> Self {
        self.labware_lids.insert(labware_id.to_string(), lid_id);
        self
    }

    pub fn set_lid_stack(mut self, stack_id: &str, stack: LidStackUpdate) -> Self {
        self.lid_stacks.insert(stack_id.to_string(), stack);
        self
    }

    pub fn set_module_state(mut self, module_id: &str, state: ModuleSubState) -> Self {
        self.module_states.insert(module_id.to_string(), state);
        self
    }

    pub fn mark_tips_used(mut self, labware_id: &str, well_names: Vec<String>) -> Self {
        self.tips_used.push(TipsUsed {
            labware_id: labware_id.to_string(),
            well_names,
        });
        self
    }

    pub fn set_tip(mut self, pipette_id: &str, tip: Option<TipGeometry>) -> Self {
        self.pipette_tips.insert(pipette_id.to_string(), tip);
        self
    }

    pub fn set_volume(mut self, pipette_id: &str, volume: f64) -> Self {
        self.pipette_volumes
            .insert(pipette_id.to_string(), Some(volume));
        self
    }

    /// Mark the liquid in a pipette as unknown.
    pub fn set_volume_unknown(mut self, pipette_id: &str) -> Self {
        self.pipette_volumes.insert(pipette_id.to_string(), None);
        self
    }

    pub fn set_ready_to_aspirate(mut self, pipette_id: &str, ready: bool) -> Self {
        self.pipette_ready_to_aspirate
            .insert(pipette_id.to_string(), ready);
        self
    }

    pub fn mark_area_used(mut self, area_name: impl Into<String>) -> Self {
        self.addressable_areas_used.insert(area_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::types::LabwareLocation;

    fn well(labware_id: &str, well_name: &str) -> PipetteLocation {
        PipetteLocation::Well {
            labware_id: labware_id.into(),
            well_name: well_name.into(),
        }
    }

    fn samples() -> Vec<StateUpdate> {
        vec![
            StateUpdate::new()
                .set_pipette_location("p1", well("plate", "A1"))
                .set_volume("p1", 10.0)
                .mark_area_used("C2")
                .mark_tips_used("tips", vec!["A1".into()]),
            StateUpdate::new()
                .clear_pipette_locations()
                .set_volume_unknown("p1")
                .move_labware("plate", LabwareLocation::slot("D1"), None)
                .mark_area_used("D1"),
            StateUpdate::new()
                .set_volume("p2", 3.0)
                .move_labware("plate", LabwareLocation::OffDeck, None)
                .set_ready_to_aspirate("p1", true)
                .mark_tips_used("tips", vec!["B1".into()])
                .mark_area_used("C2"),
            StateUpdate::new(),
        ]
    }

    #[test]
    fn merge_is_associative() {
        let updates = samples();
        for a in &updates {
            for b in &updates {
                for c in &updates {
                    let left = a.clone().merge(b.clone()).merge(c.clone());
                    let right = a.clone().merge(b.clone().merge(c.clone()));
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn empty_update_is_identity() {
        for update in samples() {
            assert_eq!(update.clone().merge(StateUpdate::new()), update);
            assert_eq!(StateUpdate::new().merge(update.clone()), update);
        }
    }

    #[test]
    fn later_values_win() {
        let updates = samples();
        let merged = updates[0].clone().merge(updates[1].clone());
        assert_eq!(merged.pipette_location, Some(PipetteLocationUpdate::Clear));
        assert_eq!(merged.pipette_volumes.get("p1"), Some(&None));
        assert_eq!(merged.addressable_areas_used.len(), 2);
        assert_eq!(merged.tips_used.len(), 1);
    }
}
