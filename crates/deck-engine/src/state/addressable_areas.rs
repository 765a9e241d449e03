//! Addressable areas and cutout fixture resolution.
//!
//! An addressable area is a named place on the deck (slot, staging slot,
//! module area, trash bin, waste chute). Each one is provided by a cutout
//! fixture mounted in a cutout, and a cutout holds exactly one fixture. Two
//! areas that share a cutout can therefore only both be used if a single
//! fixture provides both.
//!
//! The store resolves areas in one of two modes:
//!
//! - [`DeckConfiguration::Inferred`]: the layout is inferred from what the
//!   protocol uses. Each cutout remembers the set of fixtures that could
//!   still be mounted there; using an area narrows that set to the fixtures
//!   that also provide the new area. An empty narrowing is an
//!   [`EngineError::IncompatibleAddressableArea`] naming the new area and the
//!   areas already claiming the cutout.
//! - [`DeckConfiguration::Concrete`]: the robot's configuration is
//!   authoritative and any area its configured fixtures do not provide is
//!   rejected immediately with [`EngineError::AreaNotInDeckConfiguration`].
//!
//! Fixtures that block neighbouring cutouts (a thermocycler spans two) claim
//! those cutouts too, so areas in a blocked cutout conflict with them.

use super::StateStore;
use crate::actions::Action;
use deck_core::definitions::{AreaType, BoundingBox, DeckDefinition};
use deck_core::error::{EngineError, EngineResult};
use deck_core::types::{point, Point};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// One fixture mounted in one cutout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutoutFixturePlacement {
    pub cutout_id: String,
    pub cutout_fixture_id: String,
}

/// How the deck layout is known.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeckConfiguration {
    /// Inferred lazily from the areas the protocol uses
    #[default]
    Inferred,
    /// Provided up front by the robot
    Concrete(Vec<CutoutFixturePlacement>),
}

/// A resolved addressable area.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressableArea {
    pub name: String,
    pub area_type: AreaType,
    pub cutout_id: String,
    /// Deck slot of the cutout providing the area
    pub base_slot: String,
    /// Front-left-bottom corner in deck coordinates
    pub position: Point,
    pub bounding_box: BoundingBox,
    pub ability_to_drop_tips: bool,
    pub ability_to_drop_labware: bool,
}

impl AddressableArea {
    /// Center of the area's footprint at its base height.
    pub fn center(&self) -> Point {
        self.position + point(self.bounding_box.x / 2.0, self.bounding_box.y / 2.0, 0.0)
    }

    /// Center of the area's footprint at the top of its bounding box.
    pub fn top_center(&self) -> Point {
        self.center() + point(0.0, 0.0, self.bounding_box.z)
    }
}

/// Fixture candidates an area requires in one cutout.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CutoutClaim {
    cutout_id: String,
    fixtures: BTreeSet<String>,
}

/// Narrowing state for inferred mode.
#[derive(Debug, Clone, Default)]
struct FixtureInference {
    /// Fixtures that could still be mounted in each claimed cutout
    potential_fixtures: BTreeMap<String, BTreeSet<String>>,
    /// Areas that have claimed each cutout, in claim order
    claimants: BTreeMap<String, Vec<String>>,
}

impl FixtureInference {
    /// Narrow every cutout `claims` touches, or fail without changing anything.
    fn narrow(&mut self, area_name: &str, claims: &[CutoutClaim]) -> EngineResult<()> {
        let mut narrowed = Vec::with_capacity(claims.len());
        for claim in claims {
            let remaining: BTreeSet<String> = match self.potential_fixtures.get(&claim.cutout_id) {
                Some(existing) => existing.intersection(&claim.fixtures).cloned().collect(),
                None => claim.fixtures.clone(),
            };
            if remaining.is_empty() {
                return Err(EngineError::IncompatibleAddressableArea {
                    area_name: area_name.to_string(),
                    cutout_id: claim.cutout_id.clone(),
                    conflicting_areas: self
                        .claimants
                        .get(&claim.cutout_id)
                        .cloned()
                        .unwrap_or_default(),
                });
            }
            narrowed.push((claim.cutout_id.clone(), remaining));
        }
        for (cutout_id, remaining) in narrowed {
            debug!(cutout = %cutout_id, area = %area_name, fixtures = ?remaining, "Narrowed potential fixtures");
            self.claimants
                .entry(cutout_id.clone())
                .or_default()
                .push(area_name.to_string());
            self.potential_fixtures.insert(cutout_id, remaining);
        }
        Ok(())
    }
}

/// Addressable-area slice of engine state.
#[derive(Debug)]
pub struct AddressableAreaStore {
    deck: Arc<DeckDefinition>,
    configuration: DeckConfiguration,
    used: BTreeMap<String, AddressableArea>,
    inference: FixtureInference,
}

impl AddressableAreaStore {
    pub fn new(deck: Arc<DeckDefinition>, configuration: DeckConfiguration) -> Self {
        Self {
            deck,
            configuration,
            used: BTreeMap::new(),
            inference: FixtureInference::default(),
        }
    }

    pub fn deck(&self) -> &DeckDefinition {
        &self.deck
    }

    pub fn configuration(&self) -> &DeckConfiguration {
        &self.configuration
    }

    /// Geometry of an area as defined by the deck, without any conflict check.
    pub fn area(&self, area_name: &str) -> EngineResult<AddressableArea> {
        if let Some(area) = self.used.get(area_name) {
            return Ok(area.clone());
        }
        let definition = self
            .deck
            .addressable_area(area_name)
            .ok_or_else(|| EngineError::AddressableAreaDoesNotExist(area_name.to_string()))?;
        let cutout_id = self.primary_cutout(area_name)?;
        let cutout = self
            .deck
            .cutout(&cutout_id)
            .ok_or_else(|| EngineError::AddressableAreaDoesNotExist(area_name.to_string()))?;
        Ok(AddressableArea {
            name: definition.id.clone(),
            area_type: definition.area_type,
            base_slot: cutout_id.trim_start_matches("cutout").to_string(),
            position: cutout.position + definition.offset_from_cutout_fixture,
            bounding_box: definition.bounding_box,
            ability_to_drop_tips: definition.ability_to_drop_tips,
            ability_to_drop_labware: definition.ability_to_drop_labware,
            cutout_id,
        })
    }

    /// Resolve an area and verify it can be used alongside every area already in use.
    ///
    /// Does not change the store; the area is claimed when a state update
    /// listing it is applied.
    pub fn check_area(&self, area_name: &str) -> EngineResult<AddressableArea> {
        let area = self.area(area_name)?;
        if self.used.contains_key(area_name) {
            return Ok(area);
        }
        match &self.configuration {
            DeckConfiguration::Inferred => {
                let claims = self.claims_for(area_name)?;
                self.inference.clone().narrow(area_name, &claims)?;
            }
            DeckConfiguration::Concrete(placements) => {
                self.check_configured(area_name, placements)?;
            }
        }
        Ok(area)
    }

    /// Verify a group of areas can all be used together.
    pub fn check_areas<'a>(&self, area_names: impl IntoIterator<Item = &'a str>) -> EngineResult<()> {
        let mut inference = self.inference.clone();
        let mut seen = BTreeSet::new();
        for area_name in area_names {
            self.area(area_name)?;
            if self.used.contains_key(area_name) || !seen.insert(area_name) {
                continue;
            }
            match &self.configuration {
                DeckConfiguration::Inferred => {
                    let claims = self.claims_for(area_name)?;
                    inference.narrow(area_name, &claims)?;
                }
                DeckConfiguration::Concrete(placements) => {
                    self.check_configured(area_name, placements)?;
                }
            }
        }
        Ok(())
    }

    pub fn is_used(&self, area_name: &str) -> bool {
        self.used.contains_key(area_name)
    }

    /// Every area used so far, by name.
    pub fn used_areas(&self) -> impl Iterator<Item = &AddressableArea> {
        self.used.values()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// Fixtures that could still be mounted in `cutout_id`; `None` if unclaimed.
    pub fn potential_fixtures(&self, cutout_id: &str) -> Option<&BTreeSet<String>> {
        self.inference.potential_fixtures.get(cutout_id)
    }

    fn primary_cutout(&self, area_name: &str) -> EngineResult<String> {
        self.deck
            .providers_of(area_name)
            .map(|(cutout_id, _)| cutout_id.to_string())
            .min()
            .ok_or_else(|| EngineError::AddressableAreaDoesNotExist(area_name.to_string()))
    }

    fn claims_for(&self, area_name: &str) -> EngineResult<Vec<CutoutClaim>> {
        let cutout_id = self.primary_cutout(area_name)?;
        let providers: Vec<_> = self
            .deck
            .providers_of(area_name)
            .filter(|(cutout, _)| *cutout == cutout_id)
            .map(|(_, fixture)| fixture)
            .collect();

        let mut claims = vec![CutoutClaim {
            cutout_id: cutout_id.clone(),
            fixtures: providers.iter().map(|f| f.id.clone()).collect(),
        }];

        // A neighbour is claimed only if every candidate fixture blocks it.
        let mut neighbours: BTreeSet<&str> = BTreeSet::new();
        for fixture in &providers {
            neighbours.extend(fixture.blocked_cutouts(&cutout_id).iter().map(String::as_str));
        }
        for neighbour in neighbours {
            if neighbour == cutout_id {
                continue;
            }
            let blockers: BTreeSet<String> = providers
                .iter()
                .filter(|f| f.blocked_cutouts(&cutout_id).iter().any(|c| c == neighbour))
                .map(|f| f.id.clone())
                .collect();
            if blockers.len() == providers.len() {
                claims.push(CutoutClaim {
                    cutout_id: neighbour.to_string(),
                    fixtures: blockers,
                });
            }
        }
        Ok(claims)
    }

    fn check_configured(
        &self,
        area_name: &str,
        placements: &[CutoutFixturePlacement],
    ) -> EngineResult<()> {
        let provided = self.deck.providers_of(area_name).any(|(cutout_id, fixture)| {
            placements
                .iter()
                .any(|p| p.cutout_id == cutout_id && p.cutout_fixture_id == fixture.id)
        });
        if provided {
            Ok(())
        } else {
            Err(EngineError::AreaNotInDeckConfiguration {
                area_name: area_name.to_string(),
                cutout_id: self.primary_cutout(area_name)?,
            })
        }
    }

    fn claim(&mut self, area_name: &str) -> EngineResult<()> {
        if self.used.contains_key(area_name) {
            return Ok(());
        }
        let area = self.area(area_name)?;
        match &self.configuration {
            DeckConfiguration::Inferred => {
                let claims = self.claims_for(area_name)?;
                self.inference.narrow(area_name, &claims)?;
            }
            DeckConfiguration::Concrete(placements) => {
                self.check_configured(area_name, placements)?;
            }
        }
        self.used.insert(area_name.to_string(), area);
        Ok(())
    }
}

impl StateStore for AddressableAreaStore {
    fn handle_action(&mut self, action: &Action) {
        let areas: Vec<String> = match action {
            Action::AddModule { module } => vec![module.addressable_area_name.clone()],
            _ => match action.state_update() {
                Some(update) => update.addressable_areas_used.iter().cloned().collect(),
                None => return,
            },
        };
        for area_name in areas {
            if let Err(error) = self.claim(&area_name) {
                invariant_violation!("unchecked area {} applied: {}", area_name, error);
            }
        }
    }
}
