//! Waypoint planning.
//!
//! Pure functions: given an origin, a destination and height constraints,
//! produce the waypoints an instrument should follow.
//!
//! - **Direct**: one waypoint at the destination. Used when the instrument
//!   is already at the target well.
//! - **Arc**: rise to a travel height, traverse, descend. The travel height
//!   clears every obstacle, plus a margin when there is room for it.
//! - **Dodging arc**: an arc with extra lateral waypoints at travel height,
//!   used to route around a module superstructure.
//!
//! A move whose origin equals its destination is a zero-length direct plan
//! and is never executed.

use deck_core::error::MotionPlanningError;
use deck_core::limits::POSITION_TOLERANCE;
use deck_core::types::{point, CriticalPoint, Point, Waypoint};
use serde::Serialize;
use tracing::debug;

/// Kind of path the planner produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PathKind {
    Direct,
    Arc,
    DodgingArc,
}

/// Strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    /// Straight to the destination
    Direct,
    /// Arc between two wells of the same labware
    InLabwareArc,
    /// Arc over everything on the deck
    GeneralArc,
}

/// Input to [`plan_waypoints`].
#[derive(Debug, Clone, PartialEq)]
pub struct MotionRequest {
    pub origin: Point,
    pub origin_critical_point: Option<CriticalPoint>,
    pub destination: Point,
    pub destination_critical_point: Option<CriticalPoint>,
    /// Lowest height that clears every obstacle along the way
    pub min_travel_z: f64,
    /// Highest height the instrument can reach
    pub max_travel_z: f64,
    /// Lateral detours, traversed in order at travel height
    pub extra_waypoints: Vec<(f64, f64)>,
    pub move_type: MoveType,
    /// Preferred clearance above `min_travel_z`
    pub arc_margin: f64,
}

/// Result of planning.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionPlan {
    pub kind: PathKind,
    pub origin: Point,
    pub waypoints: Vec<Waypoint>,
}

impl MotionPlan {
    /// Total path length.
    pub fn length(&self) -> f64 {
        let mut from = self.origin;
        let mut total = 0.0;
        for waypoint in &self.waypoints {
            total += from.distance(waypoint.position);
            from = waypoint.position;
        }
        total
    }

    /// Whether executing the plan would not move anything.
    pub fn is_no_op(&self) -> bool {
        self.length() <= POSITION_TOLERANCE
    }

    pub fn destination(&self) -> Option<Point> {
        self.waypoints.last().map(|w| w.position)
    }
}

/// Plan the waypoints for one move.
///
/// Fails instead of clamping when the height constraints cannot be met.
pub fn plan_waypoints(request: &MotionRequest) -> Result<MotionPlan, MotionPlanningError> {
    let MotionRequest {
        origin,
        origin_critical_point,
        destination,
        destination_critical_point,
        min_travel_z,
        max_travel_z,
        ..
    } = *request;

    if min_travel_z > max_travel_z {
        return Err(MotionPlanningError::TravelHeightConflict {
            min_travel_z,
            max_travel_z,
        });
    }
    if destination.z > max_travel_z + POSITION_TOLERANCE {
        return Err(MotionPlanningError::DestinationOutOfBounds {
            destination_z: destination.z,
            max_travel_z,
        });
    }

    let direct = || MotionPlan {
        kind: PathKind::Direct,
        origin,
        waypoints: vec![Waypoint::new(destination, destination_critical_point)],
    };

    if origin.distance(destination) <= POSITION_TOLERANCE || request.move_type == MoveType::Direct {
        return Ok(direct());
    }

    let preferred_z = min_travel_z + request.arc_margin;
    if preferred_z > max_travel_z {
        debug!(
            preferred_z,
            max_travel_z, "Arc margin reduced to stay within reach"
        );
    }
    let travel_z = preferred_z
        .min(max_travel_z)
        .max(destination.z)
        .max(origin.z.min(max_travel_z));

    let mut waypoints = Vec::with_capacity(3 + request.extra_waypoints.len());
    let mut push = |position: Point, critical_point: Option<CriticalPoint>| {
        let previous = waypoints
            .last()
            .map(|w: &Waypoint| w.position)
            .unwrap_or(origin);
        if previous.distance(position) > POSITION_TOLERANCE {
            waypoints.push(Waypoint::new(position, critical_point));
        }
    };

    push(point(origin.x, origin.y, travel_z), origin_critical_point);
    for &(x, y) in &request.extra_waypoints {
        push(point(x, y, travel_z), destination_critical_point);
    }
    push(
        point(destination.x, destination.y, travel_z),
        destination_critical_point,
    );
    push(destination, destination_critical_point);

    let kind = if request.extra_waypoints.is_empty() {
        PathKind::Arc
    } else {
        PathKind::DodgingArc
    };
    Ok(MotionPlan {
        kind,
        origin,
        waypoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(origin: Point, destination: Point) -> MotionRequest {
        MotionRequest {
            origin,
            origin_critical_point: None,
            destination,
            destination_critical_point: None,
            min_travel_z: 100.0,
            max_travel_z: 200.0,
            extra_waypoints: Vec::new(),
            move_type: MoveType::GeneralArc,
            arc_margin: 10.0,
        }
    }

    #[test]
    fn zero_length_move_is_direct_no_op() {
        let here = point(10.0, 20.0, 30.0);
        let plan = plan_waypoints(&request(here, here)).unwrap();
        assert_eq!(plan.kind, PathKind::Direct);
        assert_eq!(plan.waypoints.len(), 1);
        assert!(plan.is_no_op());
    }

    #[test]
    fn general_arc_rises_traverses_descends() {
        let plan = plan_waypoints(&request(point(0.0, 0.0, 50.0), point(100.0, 0.0, 40.0))).unwrap();
        assert_eq!(plan.kind, PathKind::Arc);
        let positions: Vec<Point> = plan.waypoints.iter().map(|w| w.position).collect();
        assert_eq!(
            positions,
            vec![
                point(0.0, 0.0, 110.0),
                point(100.0, 0.0, 110.0),
                point(100.0, 0.0, 40.0),
            ]
        );
    }

    #[test]
    fn margin_is_reduced_but_obstacle_clearance_is_kept() {
        let mut req = request(point(0.0, 0.0, 50.0), point(100.0, 0.0, 40.0));
        req.min_travel_z = 195.0;
        let plan = plan_waypoints(&req).unwrap();
        assert!(plan.waypoints.iter().all(|w| w.position.z <= 200.0));
        assert_eq!(plan.waypoints[0].position.z, 200.0);
    }

    #[test]
    fn conflicting_heights_fail() {
        let mut req = request(point(0.0, 0.0, 50.0), point(100.0, 0.0, 40.0));
        req.min_travel_z = 250.0;
        assert!(matches!(
            plan_waypoints(&req),
            Err(MotionPlanningError::TravelHeightConflict { .. })
        ));

        let req = request(point(0.0, 0.0, 50.0), point(100.0, 0.0, 250.0));
        assert!(matches!(
            plan_waypoints(&req),
            Err(MotionPlanningError::DestinationOutOfBounds { .. })
        ));
    }

    #[test]
    fn dodge_inserts_lateral_waypoint() {
        let mut req = request(point(0.0, 0.0, 50.0), point(200.0, 300.0, 40.0));
        req.extra_waypoints = vec![(100.0, 100.0)];
        let plan = plan_waypoints(&req).unwrap();
        assert_eq!(plan.kind, PathKind::DodgingArc);
        assert_eq!(plan.waypoints[1].position, point(100.0, 100.0, 110.0));
        assert_eq!(plan.waypoints.len(), 4);
    }
}
