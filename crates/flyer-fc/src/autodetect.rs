use anyhow::Result;
use tracing::{info, warn};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use flyer_proto::TelemetryFeed;

use crate::mav::FcLink;
use crate::FcConfig;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub connection: String,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyACM0".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 921600]
}

/// Local simulator ports first, then every serial device at every baud.
pub fn default_candidates() -> Vec<String> {
    let mut out = vec![
        "tcpout:127.0.0.1:5760".to_string(),
        "udpin:0.0.0.0:14550".to_string(),
    ];
    for dev in default_candidate_devs() {
        for baud in default_candidate_bauds() {
            out.push(format!("serial:{}:{}", dev, baud));
        }
    }
    out
}

enum ProbeOutcome {
    Heartbeat,
    OpenFailed(String),
}

/// Open `connection` and wait for the target's HEARTBEAT on a separate
/// thread. mavlink receives block, so a probe that times out is abandoned and
/// its thread ends with the process.
fn probe(cfg: &FcConfig, connection: &str, timeout: Duration) -> (bool, String) {
    let (tx, rx) = mpsc::channel();
    let cfg = cfg.clone();
    let conn = connection.to_string();
    std::thread::spawn(move || {
        let outcome = match FcLink::from_config(&cfg, &conn) {
            Ok(mut link) => loop {
                let _ = link.send_heartbeat();
                if let Ok(Some((hdr, msg))) = link.poll_once() {
                    if hdr.system_id == cfg.target_sys && msg.is_heartbeat() {
                        break ProbeOutcome::Heartbeat;
                    }
                }
                if !link.is_open() {
                    break ProbeOutcome::OpenFailed("peer closed the link".into());
                }
                std::thread::sleep(Duration::from_millis(25));
            },
            Err(e) => ProbeOutcome::OpenFailed(format!("{:#}", e)),
        };
        let _ = tx.send(outcome);
    });

    match rx.recv_timeout(timeout) {
        Ok(ProbeOutcome::Heartbeat) => (true, "heartbeat".into()),
        Ok(ProbeOutcome::OpenFailed(e)) => (false, format!("open/connect failed: {}", e)),
        Err(_) => (false, "no heartbeat".into()),
    }
}

pub fn autodetect_fc(cfg: &FcConfig) -> Result<AutodetectResult> {
    let candidates = cfg.candidate_connections.clone().unwrap_or_else(default_candidates);
    anyhow::ensure!(!candidates.is_empty(), "fc.candidate_connections is empty");
    let timeout = Duration::from_millis(cfg.heartbeat_timeout_ms.unwrap_or(1500));

    let mut probes = Vec::new();
    for connection in candidates {
        let start = Instant::now();
        let (hb_seen, note) = probe(cfg, &connection, timeout);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if hb_seen {
            info!("fc autodetect: OK {}", connection);
            probes.push(ProbeResult { connection: connection.clone(), hb_seen, elapsed_ms, note });
            return Ok(AutodetectResult { chosen: Some(connection), probes });
        }
        warn!("fc autodetect probe failed connection={} note={}", connection, note);
        probes.push(ProbeResult { connection, hb_seen, elapsed_ms, note });
    }

    Ok(AutodetectResult { chosen: None, probes })
}

/// Connection to use: the configured one, or the autodetected one.
pub fn resolve_connection(cfg: &FcConfig) -> Result<String> {
    if !cfg.autodetect {
        anyhow::ensure!(!cfg.connection.is_empty(), "fc.connection missing (autodetect=false)");
        return Ok(cfg.connection.clone());
    }
    match autodetect_fc(cfg)?.chosen {
        Some(conn) => Ok(conn),
        None => anyhow::bail!("fc autodetect failed: no heartbeat found"),
    }
}

// helper trait-ish on mavlink message without leaking mavlink type to callers
trait HeartbeatCheck {
    fn is_heartbeat(&self) -> bool;
}

impl HeartbeatCheck for mavlink::common::MavMessage {
    fn is_heartbeat(&self) -> bool {
        matches!(self, mavlink::common::MavMessage::HEARTBEAT(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_candidates_start_with_simulator() {
        let c = default_candidates();
        assert_eq!(c[0], "tcpout:127.0.0.1:5760");
        assert_eq!(c.len(), 2 + default_candidate_devs().len() * default_candidate_bauds().len());
        assert!(c.contains(&"serial:/dev/ttyACM0:57600".to_string()));
    }

    #[test]
    fn resolve_without_autodetect_uses_configured_connection() {
        let cfg = FcConfig { connection: "udpin:0.0.0.0:14550".into(), ..Default::default() };
        assert_eq!(resolve_connection(&cfg).unwrap(), "udpin:0.0.0.0:14550");
    }

    #[test]
    fn resolve_rejects_empty_connection() {
        let cfg = FcConfig { connection: String::new(), ..Default::default() };
        assert!(resolve_connection(&cfg).is_err());
    }

    #[test]
    fn autodetect_with_no_candidates_is_an_error() {
        let cfg = FcConfig { autodetect: true, candidate_connections: Some(vec![]), ..Default::default() };
        assert!(autodetect_fc(&cfg).is_err());
    }
}
