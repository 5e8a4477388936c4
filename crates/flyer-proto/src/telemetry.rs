use serde::{Deserialize, Serialize};

/// Local NED position in metres, relative to the vehicle's local origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position3 {
    pub north: f64,
    pub east: f64,
    /// Positive downward.
    pub down: f64,
}

impl Position3 {
    pub fn new(north: f64, east: f64, down: f64) -> Self {
        Self { north, east, down }
    }

    pub fn from_altitude(north: f64, east: f64, altitude: f64) -> Self {
        Self { north, east, down: -altitude }
    }

    /// Height above the local origin, positive up.
    pub fn altitude(&self) -> f64 {
        -self.down
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity3 {
    pub vn: f64,
    pub ve: f64,
    pub vd: f64,
}

/// Geodetic position: degrees and metres above mean sea level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalPosition {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Most recent telemetry the link has decoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub local_position: Position3,
    pub local_velocity: Velocity3,
    pub global_position: GlobalPosition,
    pub global_home: GlobalPosition,
    pub armed: bool,
    pub guided: bool,
}

impl TelemetrySnapshot {
    pub fn altitude_above_home(&self) -> f64 {
        self.global_position.alt - self.global_home.alt
    }
}

/// Typed telemetry notification, one per decoded message category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LocalPosition(Position3),
    LocalVelocity(Velocity3),
    State { armed: bool, guided: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn altitude_is_negated_down() {
        let p = Position3::new(1.0, 2.0, -2.96);
        assert!((p.altitude() - 2.96).abs() < 1e-12);
        assert_eq!(Position3::from_altitude(1.0, 2.0, 3.0).down, -3.0);
    }

    #[test]
    fn altitude_above_home_uses_global_altitudes() {
        let snap = TelemetrySnapshot {
            global_position: GlobalPosition { lat: 37.79, lon: -122.39, alt: 10.05 },
            global_home: GlobalPosition { lat: 37.79, lon: -122.39, alt: 10.0 },
            ..Default::default()
        };
        assert!((snap.altitude_above_home() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn notification_serializes_with_kind_tag() {
        let n = Notification::State { armed: true, guided: false };
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, r#"{"kind":"state","armed":true,"guided":false}"#);
    }
}
