//! Serialisable snapshot of a run, produced when the run finishes.

use crate::commands::Command;
use crate::state::{
    AddressableArea, EngineState, LabwareOffset, LoadedLabware, LoadedModule, LoadedPipette,
    RunStatus,
};
use chrono::{DateTime, Utc};
use deck_core::error::ErrorOccurrence;
use serde::Serialize;

/// Everything a client needs to report on a run after the fact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub status: RunStatus,
    pub commands: Vec<Command>,
    pub labware: Vec<LoadedLabware>,
    pub labware_offsets: Vec<LabwareOffset>,
    pub pipettes: Vec<LoadedPipette>,
    pub modules: Vec<LoadedModule>,
    /// Addressable areas the run touched, in deck order
    pub used_addressable_areas: Vec<AddressableArea>,
    pub errors: Vec<ErrorOccurrence>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn from_state(state: &EngineState, created_at: DateTime<Utc>) -> Self {
        let commands = state.commands();
        Self {
            status: commands.run_status(),
            commands: commands.all().cloned().collect(),
            labware: state.labware().all().cloned().collect(),
            labware_offsets: state.labware().offsets().to_vec(),
            pipettes: state.pipettes().all().cloned().collect(),
            modules: state.modules().all().cloned().collect(),
            used_addressable_areas: state.addressable_areas().used_areas().cloned().collect(),
            errors: commands.run_errors().to_vec(),
            created_at,
            started_at: commands.started_at(),
            completed_at: commands.completed_at(),
        }
    }

    /// Number of commands that ended in each terminal status.
    pub fn counts(&self) -> (usize, usize) {
        use crate::commands::CommandStatus;
        let succeeded = self
            .commands
            .iter()
            .filter(|c| c.status == CommandStatus::Succeeded)
            .count();
        let failed = self
            .commands
            .iter()
            .filter(|c| c.status == CommandStatus::Failed)
            .count();
        (succeeded, failed)
    }
}
