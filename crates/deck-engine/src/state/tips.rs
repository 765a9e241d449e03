//! Per-well tip consumption for loaded tip racks.
//!
//! Each tip rack well can be picked up from at most once. Multi-channel
//! pipettes consume every well under their nozzles: a run of wells down one
//! column for an 8-channel, the whole rack for a 96-channel.

use super::StateStore;
use crate::actions::Action;
use deck_core::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct TipRack {
    /// Wells by column, back to front
    columns: Vec<Vec<String>>,
    used: BTreeSet<String>,
}

impl TipRack {
    fn rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    fn all_wells(&self) -> impl Iterator<Item = &String> {
        self.columns.iter().flatten()
    }

    fn is_clean(&self, well: &str) -> bool {
        !self.used.contains(well)
    }

    /// Wells under the nozzles when the primary nozzle is at `well_name`.
    fn wells_under(&self, well_name: &str, channels: usize) -> Option<Vec<String>> {
        if channels <= 1 {
            return self
                .all_wells()
                .find(|w| *w == well_name)
                .map(|w| vec![w.clone()]);
        }
        if channels > self.rows() {
            let first = self.columns.first()?.first()?;
            return (first == well_name).then(|| self.all_wells().cloned().collect());
        }
        self.columns.iter().find_map(|column| {
            let start = column.iter().position(|w| w == well_name)?;
            (start + channels <= column.len()).then(|| column[start..start + channels].to_vec())
        })
    }
}

/// Tip slice of engine state.
#[derive(Debug, Default)]
pub struct TipStore {
    racks: BTreeMap<String, TipRack>,
}

impl TipStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rack(&self, labware_id: &str) -> EngineResult<&TipRack> {
        self.racks
            .get(labware_id)
            .ok_or_else(|| EngineError::LabwareIsNotTipRack(labware_id.to_string()))
    }

    pub fn is_clean(&self, labware_id: &str, well_name: &str) -> EngineResult<bool> {
        Ok(self.rack(labware_id)?.is_clean(well_name))
    }

    /// Wells a pick-up at `well_name` consumes, failing if any is used.
    pub fn wells_for_pickup(
        &self,
        labware_id: &str,
        well_name: &str,
        channels: u32,
    ) -> EngineResult<Vec<String>> {
        let rack = self.rack(labware_id)?;
        let unavailable = || EngineError::TipNotAvailable {
            labware_id: labware_id.to_string(),
            well_name: well_name.to_string(),
        };
        let wells = rack
            .wells_under(well_name, channels as usize)
            .ok_or_else(unavailable)?;
        if wells.iter().all(|w| rack.is_clean(w)) {
            Ok(wells)
        } else {
            Err(unavailable())
        }
    }

    /// First well where a full set of clean tips is available, column-major.
    pub fn next_tip(&self, labware_id: &str, channels: u32) -> EngineResult<Option<String>> {
        let rack = self.rack(labware_id)?;
        Ok(rack
            .all_wells()
            .find(|well| {
                rack.wells_under(well, channels as usize)
                    .is_some_and(|wells| wells.iter().all(|w| rack.is_clean(w)))
            })
            .cloned())
    }

    pub fn used_count(&self, labware_id: &str) -> EngineResult<usize> {
        Ok(self.rack(labware_id)?.used.len())
    }
}

impl StateStore for TipStore {
    fn handle_action(&mut self, action: &Action) {
        let Some(update) = action.state_update() else {
            return;
        };
        for load in &update.loaded_labware {
            if load.definition.is_tiprack() {
                self.racks.insert(
                    load.labware_id.clone(),
                    TipRack {
                        columns: load.definition.ordering.clone(),
                        used: BTreeSet::new(),
                    },
                );
            }
        }
        for used in &update.tips_used {
            match self.racks.get_mut(&used.labware_id) {
                Some(rack) => rack.used.extend(used.well_names.iter().cloned()),
                None => invariant_violation!("tips used from unknown rack {}", used.labware_id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rack() -> TipRack {
        let columns = (1..=3)
            .map(|col| ["A", "B", "C", "D"].iter().map(|row| format!("{row}{col}")).collect())
            .collect();
        TipRack {
            columns,
            used: BTreeSet::new(),
        }
    }

    #[test]
    fn multichannel_takes_column_run() {
        let rack = rack();
        assert_eq!(
            rack.wells_under("A2", 4),
            Some(vec!["A2".into(), "B2".into(), "C2".into(), "D2".into()])
        );
        assert_eq!(rack.wells_under("B2", 4), None);
    }

    #[test]
    fn full_rack_pickup_starts_at_first_well() {
        let rack = rack();
        assert_eq!(rack.wells_under("A1", 96).map(|w| w.len()), Some(12));
        assert_eq!(rack.wells_under("A2", 96), None);
    }
}
