use anyhow::Result;

use crate::flight::{EAST_TOLERANCE_M, NORTH_TOLERANCE_M, TAKEOFF_ALTITUDE_M};
use crate::planner::Mission;

/// Pre-flight checks on a planned mission.
pub fn check_mission(mission: &Mission) -> Result<()> {
    mission.validate()?;
    anyhow::ensure!(mission.len() >= 2, "mission needs at least 2 waypoints, has {}", mission.len());

    // Waypoint transitions only move the target horizontally.
    for (i, wp) in mission.waypoints().iter().enumerate() {
        anyhow::ensure!(
            (wp.altitude - TAKEOFF_ALTITUDE_M).abs() < f64::EPSILON,
            "waypoint {} altitude {} differs from takeoff altitude {}",
            i, wp.altitude, TAKEOFF_ALTITUDE_M
        );
    }

    // Consecutive corners closer than the arrival gate would be skipped in one step.
    for (i, pair) in mission.waypoints().windows(2).enumerate() {
        let (a, b) = (&pair[0], &pair[1]);
        anyhow::ensure!(
            (a.north - b.north).abs() >= NORTH_TOLERANCE_M || (a.east - b.east).abs() >= EAST_TOLERANCE_M,
            "waypoints {} and {} are inside one arrival gate",
            i, i + 1
        );
    }
    Ok(())
}
