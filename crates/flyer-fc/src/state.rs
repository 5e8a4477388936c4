use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct BatteryStatus {
    pub voltage: Option<f32>,      // Volts
    pub current: Option<f32>,      // Amps
    pub remaining: Option<u8>,     // Percent 0-100
}

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub endpoint: Option<String>,
    pub last_heartbeat: Option<Instant>,
    pub last_msg: Option<&'static str>,
    pub messages: u64,
    pub send_failures: u64,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}
