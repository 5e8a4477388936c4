use anyhow::Result;

use crate::telemetry::{Notification, TelemetrySnapshot};

/// Commands the mission core may issue to a vehicle.
///
/// Every command is fire-and-forget: implementations report failures through
/// their own logging and the caller never waits for an acknowledgement.
pub trait Vehicle {
    fn take_control(&mut self);
    fn release_control(&mut self);
    fn arm(&mut self);
    fn disarm(&mut self);
    fn set_home_position(&mut self, lat: f64, lon: f64, alt: f64);
    fn takeoff(&mut self, target_altitude: f64);
    fn land(&mut self);
    /// Fly to a local position. `altitude` is positive up, `heading` in degrees.
    fn cmd_position(&mut self, north: f64, east: f64, altitude: f64, heading: f64);
    /// Close the telemetry feed; the run loop exits on its next check.
    fn stop(&mut self);

    fn telemetry(&self) -> &TelemetrySnapshot;
}

/// Source of telemetry notifications.
///
/// Notifications are handed out in order and one batch at a time, so a single
/// consumer never sees two of them concurrently.
pub trait TelemetryFeed {
    /// Pull whatever the link has decoded since the last call. An empty batch
    /// means nothing new arrived.
    fn next_notifications(&mut self) -> Result<Vec<Notification>>;

    fn is_open(&self) -> bool;

    /// True once the snapshot holds a usable global position. The mission
    /// core reads it to set home, so nothing is dispatched before then.
    fn ready(&self) -> bool {
        true
    }

    /// Ground station heartbeat; links that need none can keep the default.
    fn send_heartbeat(&mut self) -> Result<()> {
        Ok(())
    }
}
