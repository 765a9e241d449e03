//! Stacks of identical lids.
//!
//! A lid stack is an ordered list of lid labware, bottom first. The bottom
//! lid sits at the stack location and each further lid sits on the one
//! below it. Moving the top lid away pops it; moving a lid of the same
//! definition onto the top lid pushes it.

use super::StateStore;
use crate::actions::Action;
use deck_core::definitions::LabwareUri;
use deck_core::types::LabwareLocation;
use serde::Serialize;
use std::collections::BTreeMap;

/// One lid stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LidStack {
    pub id: String,
    pub definition_uri: LabwareUri,
    pub location: LabwareLocation,
    /// Bottom lid first
    pub lid_ids: Vec<String>,
}

impl LidStack {
    pub fn top(&self) -> Option<&str> {
        self.lid_ids.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lid_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lid_ids.is_empty()
    }
}

/// Lid-stack slice of engine state.
#[derive(Debug, Default)]
pub struct LidStackStore {
    stacks: BTreeMap<String, LidStack>,
}

impl LidStackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stack_id: &str) -> Option<&LidStack> {
        self.stacks.get(stack_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &LidStack> {
        self.stacks.values()
    }

    /// Stack whose top lid is `lid_id`.
    pub fn with_top(&self, lid_id: &str) -> Option<&LidStack> {
        self.stacks.values().find(|s| s.top() == Some(lid_id))
    }
}

impl StateStore for LidStackStore {
    fn handle_action(&mut self, action: &Action) {
        let Some(update) = action.state_update() else {
            return;
        };
        for (stack_id, change) in &update.lid_stacks {
            self.stacks.insert(
                stack_id.clone(),
                LidStack {
                    id: stack_id.clone(),
                    definition_uri: change.definition_uri.clone(),
                    location: change.location.clone(),
                    lid_ids: change.lid_ids.clone(),
                },
            );
        }
    }
}
