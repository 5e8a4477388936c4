use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flyer_proto::Position3;
use serde::Serialize;
use tracing::warn;

use crate::flight::FlightState;

/// One point of the position/altitude stream fed to plotting tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSample {
    pub step: u64,
    pub north: f64,
    pub east: f64,
    pub down: f64,
    pub flight_state: FlightState,
}

impl TrackSample {
    pub fn new(step: u64, position: Position3, flight_state: FlightState) -> Self {
        Self {
            step,
            north: position.north,
            east: position.east,
            down: position.down,
            flight_state,
        }
    }
}

/// Passive listener on the flight controller. Never influences transitions.
pub trait FlightObserver: Send {
    fn on_sample(&mut self, sample: &TrackSample);

    fn on_transition(&mut self, _from: FlightState, _to: FlightState) {}
}

impl FlightObserver for () {
    fn on_sample(&mut self, _sample: &TrackSample) {}
}

impl<O: FlightObserver> FlightObserver for Option<O> {
    fn on_sample(&mut self, sample: &TrackSample) {
        if let Some(o) = self {
            o.on_sample(sample);
        }
    }

    fn on_transition(&mut self, from: FlightState, to: FlightState) {
        if let Some(o) = self {
            o.on_transition(from, to);
        }
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct TrackRecorder {
    pub samples: Vec<TrackSample>,
    pub transitions: Vec<(FlightState, FlightState)>,
}

impl FlightObserver for TrackRecorder {
    fn on_sample(&mut self, sample: &TrackSample) {
        self.samples.push(sample.clone());
    }

    fn on_transition(&mut self, from: FlightState, to: FlightState) {
        self.transitions.push((from, to));
    }
}

/// Writes samples as JSON lines, ready for an external plotter.
pub struct TrackLog {
    out: BufWriter<File>,
    failed: bool,
}

impl TrackLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create track dir {}", dir.display()))?;
        }
        let f = File::create(path).with_context(|| format!("create track log {}", path.display()))?;
        Ok(Self { out: BufWriter::new(f), failed: false })
    }

    fn write_line(&mut self, sample: &TrackSample) -> Result<()> {
        serde_json::to_writer(&mut self.out, sample).context("encode track sample")?;
        self.out.write_all(b"\n").context("write track sample")?;
        Ok(())
    }

    pub fn is_disabled(&self) -> bool {
        self.failed
    }

    /// Flush buffered samples and report whether the whole track made it to disk.
    pub fn finish(mut self) -> Result<()> {
        self.out.flush().context("flush track log")?;
        anyhow::ensure!(!self.failed, "track log incomplete: writes failed during the flight");
        Ok(())
    }
}

impl FlightObserver for TrackLog {
    fn on_sample(&mut self, sample: &TrackSample) {
        if self.failed {
            return;
        }
        if let Err(e) = self.write_line(sample) {
            // One warning, then stay quiet; plotting must not disturb the flight.
            warn!("track log disabled: {:#}", e);
            self.failed = true;
        }
    }
}

impl Drop for TrackLog {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!("track log flush failed: {:#}", e);
        }
    }
}
