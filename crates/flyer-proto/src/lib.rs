pub mod telemetry;
pub mod vehicle;

pub use telemetry::{GlobalPosition, Notification, Position3, TelemetrySnapshot, Velocity3};
pub use vehicle::{TelemetryFeed, Vehicle};
