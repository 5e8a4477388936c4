use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use flyer_proto::{TelemetryFeed, Vehicle};
use tracing::{info, warn};

use crate::flight::{FlightController, FlightState};
use crate::navlog::NavLog;
use crate::observer::FlightObserver;

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub notifications: u64,
    pub final_state: FlightState,
    pub mission_complete: bool,
}

/// Pumps notifications from a link into the flight controller, one at a time.
pub struct MissionRunner<O: FlightObserver = ()> {
    controller: FlightController<O>,
    heartbeat_interval: Duration,
    idle_sleep: Duration,
}

impl<O: FlightObserver> MissionRunner<O> {
    pub fn new(controller: FlightController<O>, heartbeat_interval: Duration) -> Self {
        Self {
            controller,
            heartbeat_interval,
            idle_sleep: Duration::from_millis(10),
        }
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn controller(&self) -> &FlightController<O> {
        &self.controller
    }

    pub fn into_controller(self) -> FlightController<O> {
        self.controller
    }

    /// Run until the link closes or `stop` is raised.
    pub fn fly<L>(&mut self, link: &mut L, log: &mut NavLog, stop: &AtomicBool) -> Result<RunSummary>
    where
        L: Vehicle + TelemetryFeed,
    {
        self.controller.start_mission();

        let mut last_hb: Option<Instant> = None;
        let mut notifications = 0u64;
        // Startup gate only; once open it stays open for the rest of the run.
        let mut has_fix = false;
        let mut held = 0u64;

        while link.is_open() && !stop.load(Ordering::Relaxed) {
            if last_hb.map_or(true, |t| t.elapsed() >= self.heartbeat_interval) {
                if let Err(e) = link.send_heartbeat() {
                    warn!("runner: heartbeat send failed: {:#}", e);
                }
                last_hb = Some(Instant::now());
            }

            let batch = link.next_notifications()?;
            if batch.is_empty() {
                std::thread::sleep(self.idle_sleep);
                continue;
            }

            if !has_fix {
                has_fix = link.ready();
                if has_fix && held > 0 {
                    info!("runner: global position fix after {} held notifications", held);
                } else if !has_fix {
                    if held == 0 {
                        info!("runner: waiting for a global position fix before flying");
                    }
                    held += batch.len() as u64;
                }
            }

            for n in &batch {
                log.record(n);
                if has_fix {
                    self.controller.dispatch(link, n);
                }
                notifications += 1;
            }
        }

        if stop.load(Ordering::Relaxed) {
            warn!("runner: stop requested in {:?}", self.controller.state());
        }

        let summary = RunSummary {
            notifications,
            final_state: self.controller.state(),
            mission_complete: !self.controller.progress().in_mission,
        };
        info!(
            "runner: link closed after {} notifications (state={:?}, complete={})",
            summary.notifications, summary.final_state, summary.mission_complete
        );
        Ok(summary)
    }
}
