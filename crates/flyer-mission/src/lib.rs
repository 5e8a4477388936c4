pub mod doctor;
pub mod error;
pub mod flight;
pub mod navlog;
pub mod observer;
pub mod planner;
pub mod runner;

pub use error::MissionError;
pub use flight::{FlightController, FlightState, MissionProgress};
pub use planner::{calculate_box, Mission, Waypoint};
