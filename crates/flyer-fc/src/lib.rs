pub mod mav;
pub mod autodetect;
pub mod state;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FcConfig {
    /// MAVLink address of the vehicle, e.g. "tcpout:127.0.0.1:5760",
    /// "udpin:0.0.0.0:14550" or "serial:/dev/ttyACM0:57600".
    pub connection: String,

    /// If true, probe `candidate_connections` and use the first that yields a
    /// HEARTBEAT instead of `connection`.
    pub autodetect: bool,

    /// Autodetect candidates. Defaults to local simulator ports plus the usual
    /// serial devices at common ArduPilot telemetry bauds.
    pub candidate_connections: Option<Vec<String>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (ground station side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (vehicle side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Autopilot custom modes used to take and release control.
    /// ArduCopter: GUIDED=4, STABILIZE=0.
    pub guided_mode: u32,
    pub manual_mode: u32,

    /// Ground station heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            connection: "tcpout:127.0.0.1:5760".into(),
            autodetect: false,
            candidate_connections: None,
            heartbeat_timeout_ms: None,
            sys_id: 255,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            guided_mode: 4,
            manual_mode: 0,
            send_heartbeat_hz: None,
        }
    }
}

impl FcConfig {
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        let hz = self.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        std::time::Duration::from_secs_f32(1.0 / hz)
    }
}
