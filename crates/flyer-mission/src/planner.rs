use serde::{Deserialize, Serialize};

use crate::error::MissionError;

/// Side length of the box, metres.
pub const BOX_SIDE_M: f64 = 10.0;
/// Cruise altitude for every box corner, metres above the local origin.
pub const BOX_ALTITUDE_M: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub north: f64,
    pub east: f64,
    /// Positive up.
    pub altitude: f64,
    /// Degrees. Always 0 for the box.
    pub heading: f64,
}

impl Waypoint {
    pub const fn new(north: f64, east: f64, altitude: f64, heading: f64) -> Self {
        Self { north, east, altitude, heading }
    }
}

/// Ordered, immutable list of waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    waypoints: Vec<Waypoint>,
}

impl Mission {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Look up a waypoint by signed index. Negative indices count back from
    /// the end, so `-1` is the last waypoint. Anything outside
    /// `[-len, len)` yields `None`.
    pub fn waypoint_at(&self, index: i32) -> Option<&Waypoint> {
        let len = self.waypoints.len() as i64;
        let idx = index as i64;
        let resolved = if idx < 0 { len + idx } else { idx };
        if (0..len).contains(&resolved) {
            self.waypoints.get(resolved as usize)
        } else {
            None
        }
    }

    /// Reject missions the flight controller cannot fly.
    pub fn validate(&self) -> Result<(), MissionError> {
        if self.waypoints.is_empty() {
            return Err(MissionError::EmptyMission);
        }
        for (index, wp) in self.waypoints.iter().enumerate() {
            if !(wp.north.is_finite() && wp.east.is_finite() && wp.heading.is_finite()) {
                return Err(MissionError::NonFiniteWaypoint { index });
            }
            if !wp.altitude.is_finite() || wp.altitude <= 0.0 {
                return Err(MissionError::InvalidAltitude { index, altitude: wp.altitude });
            }
        }
        Ok(())
    }
}

/// Corners of the box. The flight controller walks this list from the back,
/// so the vehicle leaves the origin heading east and closes the loop north.
pub fn calculate_box() -> Mission {
    Mission::new(vec![
        Waypoint::new(BOX_SIDE_M, 0.0, BOX_ALTITUDE_M, 0.0),
        Waypoint::new(BOX_SIDE_M, BOX_SIDE_M, BOX_ALTITUDE_M, 0.0),
        Waypoint::new(0.0, BOX_SIDE_M, BOX_ALTITUDE_M, 0.0),
        Waypoint::new(0.0, 0.0, BOX_ALTITUDE_M, 0.0),
    ])
}
