//! Shared motion and timing constants.
//!
//! This module centralizes:
//! - Clearance margins used by the motion planner
//! - Gripper drop offsets for disposal locations
//! - Volume tolerance and channel parameters
//!
//! Keeping them in one place makes tuning against real hardware easier.

use std::time::Duration;

// =============================================================================
// Motion Planning
// =============================================================================

/// Extra height added above the tallest obstacle for a general arc (mm).
pub const GENERAL_ARC_Z_MARGIN: f64 = 10.0;

/// Extra height above the labware top for an arc between two wells of the
/// same labware (mm).
pub const IN_LABWARE_ARC_Z_MARGIN: f64 = 5.0;

/// Distance below which two positions are considered identical (mm).
pub const POSITION_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Gripper
// =============================================================================

/// Height above the drop location at which the gripper releases labware
/// into a waste chute, so the labware falls clear of the chute walls (mm).
pub const WASTE_CHUTE_DROP_HEIGHT: f64 = 80.0;

/// Height above a trash bin at which the gripper releases labware (mm).
pub const TRASH_DROP_HEIGHT: f64 = 40.0;

/// Clearance above the tallest obstacle while carrying labware (mm).
pub const GRIPPER_TRAVEL_MARGIN: f64 = 20.0;

/// Highest reachable jaw-center z of the gripper (mm).
pub const GRIPPER_MAX_Z: f64 = 240.0;

// =============================================================================
// Liquid Handling
// =============================================================================

/// Slack allowed when comparing pipette volumes against their bounds (µL).
pub const VOLUME_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Channels and Timing
// =============================================================================

/// Default capacity of the action notification broadcast channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Default capacity of the background action queue.
pub const DEFAULT_ACTION_QUEUE_CAPACITY: usize = 64;

/// Simulated gantry speed when realistic timing is enabled (mm/s).
pub const SIMULATED_GANTRY_SPEED: f64 = 400.0;

/// Upper bound on a single simulated hardware delay.
pub const MAX_SIMULATED_DELAY: Duration = Duration::from_secs(2);
