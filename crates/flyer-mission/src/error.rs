use thiserror::Error;

/// Problems that prevent a mission from starting at all.
#[derive(Debug, Error, PartialEq)]
pub enum MissionError {
    #[error("mission has no waypoints")]
    EmptyMission,

    #[error("waypoint {index} has invalid altitude {altitude} (must be finite and > 0)")]
    InvalidAltitude { index: usize, altitude: f64 },

    #[error("waypoint {index} has non-finite coordinates")]
    NonFiniteWaypoint { index: usize },
}
