//! End-to-end box flights against a simple kinematic vehicle.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Result;
use flyer_mission::flight::FlightState;
use flyer_mission::navlog::NavLog;
use flyer_mission::observer::TrackRecorder;
use flyer_mission::runner::MissionRunner;
use flyer_mission::{calculate_box, FlightController};
use flyer_proto::{
    GlobalPosition, Notification, Position3, TelemetryFeed, TelemetrySnapshot, Vehicle, Velocity3,
};

const STEP_M: f64 = 0.5;
const MAX_TICKS: u64 = 10_000;
const HOME_LAT: f64 = 37.792;
const HOME_LON: f64 = -122.397;
const HOME_ALT_M: f64 = 12.0;

#[derive(Debug, Clone, PartialEq)]
enum Cmd {
    TakeControl,
    ReleaseControl,
    Arm,
    Disarm,
    SetHome(f64),
    Takeoff(f64),
    Land,
    Position(f64, f64, f64),
    Stop,
}

/// Moves at most `STEP_M` per axis per tick towards its goal and reports
/// position and velocity every tick, vehicle state every `state_every` ticks.
struct SimVehicle {
    telemetry: TelemetrySnapshot,
    goal: Option<Position3>,
    cmds: Vec<Cmd>,
    tick: u64,
    state_every: u64,
    open: bool,
    heartbeats: u64,
    fix_at: u64,
}

impl SimVehicle {
    fn new(state_every: u64) -> Self {
        let ground = GlobalPosition { lat: HOME_LAT, lon: HOME_LON, alt: HOME_ALT_M };
        Self {
            telemetry: TelemetrySnapshot { global_position: ground, ..Default::default() },
            goal: None,
            cmds: Vec::new(),
            tick: 0,
            state_every,
            open: true,
            heartbeats: 0,
            fix_at: 0,
        }
    }

    /// No global position until `tick`, like a GPS still acquiring.
    fn without_fix_until(mut self, tick: u64) -> Self {
        self.telemetry.global_position = GlobalPosition::default();
        self.fix_at = tick;
        self
    }

    fn step_axis(cur: f64, goal: f64) -> f64 {
        let d = goal - cur;
        if d.abs() <= STEP_M { goal } else { cur + STEP_M * d.signum() }
    }

    fn advance(&mut self) {
        let before = self.telemetry.local_position;
        if let (Some(goal), true) = (self.goal, self.telemetry.armed) {
            self.telemetry.local_position = Position3::new(
                Self::step_axis(before.north, goal.north),
                Self::step_axis(before.east, goal.east),
                Self::step_axis(before.down, goal.down),
            );
        }
        let now = self.telemetry.local_position;
        self.telemetry.local_velocity = Velocity3 {
            vn: now.north - before.north,
            ve: now.east - before.east,
            vd: now.down - before.down,
        };
        if self.tick >= self.fix_at {
            self.telemetry.global_position =
                GlobalPosition { lat: HOME_LAT, lon: HOME_LON, alt: HOME_ALT_M + now.altitude() };
        }
    }

    fn positions(&self) -> Vec<(f64, f64, f64)> {
        self.cmds
            .iter()
            .filter_map(|c| match c {
                Cmd::Position(n, e, a) => Some((*n, *e, *a)),
                _ => None,
            })
            .collect()
    }
}

impl Vehicle for SimVehicle {
    fn take_control(&mut self) {
        self.telemetry.guided = true;
        self.cmds.push(Cmd::TakeControl);
    }
    fn release_control(&mut self) {
        self.telemetry.guided = false;
        self.cmds.push(Cmd::ReleaseControl);
    }
    fn arm(&mut self) {
        self.telemetry.armed = true;
        self.cmds.push(Cmd::Arm);
    }
    fn disarm(&mut self) {
        self.telemetry.armed = false;
        self.cmds.push(Cmd::Disarm);
    }
    fn set_home_position(&mut self, lat: f64, lon: f64, alt: f64) {
        self.telemetry.global_home = GlobalPosition { lat, lon, alt };
        self.cmds.push(Cmd::SetHome(alt));
    }
    fn takeoff(&mut self, target_altitude: f64) {
        let p = self.telemetry.local_position;
        self.goal = Some(Position3::from_altitude(p.north, p.east, target_altitude));
        self.cmds.push(Cmd::Takeoff(target_altitude));
    }
    fn land(&mut self) {
        let p = self.telemetry.local_position;
        self.goal = Some(Position3::new(p.north, p.east, 0.0));
        self.cmds.push(Cmd::Land);
    }
    fn cmd_position(&mut self, north: f64, east: f64, altitude: f64, _heading: f64) {
        self.goal = Some(Position3::from_altitude(north, east, altitude));
        self.cmds.push(Cmd::Position(north, east, altitude));
    }
    fn stop(&mut self) {
        self.open = false;
        self.cmds.push(Cmd::Stop);
    }
    fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }
}

impl TelemetryFeed for SimVehicle {
    fn next_notifications(&mut self) -> Result<Vec<Notification>> {
        self.tick += 1;
        if self.tick > MAX_TICKS {
            self.open = false;
            return Ok(Vec::new());
        }
        self.advance();
        let mut out = vec![
            Notification::LocalPosition(self.telemetry.local_position),
            Notification::LocalVelocity(self.telemetry.local_velocity),
        ];
        if self.state_every > 0 && self.tick % self.state_every == 0 {
            out.push(Notification::State {
                armed: self.telemetry.armed,
                guided: self.telemetry.guided,
            });
        }
        Ok(out)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn ready(&self) -> bool {
        self.tick >= self.fix_at
    }

    fn send_heartbeat(&mut self) -> Result<()> {
        self.heartbeats += 1;
        Ok(())
    }
}

fn runner() -> MissionRunner<TrackRecorder> {
    let fc = FlightController::with_observer(calculate_box(), TrackRecorder::default()).unwrap();
    MissionRunner::new(fc, Duration::from_secs(1)).with_idle_sleep(Duration::ZERO)
}

#[test]
fn flies_the_box_and_returns_to_manual() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    let mut sim = SimVehicle::new(4);
    let mut runner = runner();
    let stop = AtomicBool::new(false);

    let summary = runner.fly(&mut sim, &mut log, &stop).unwrap();

    assert!(summary.mission_complete);
    assert_eq!(summary.final_state, FlightState::Manual);
    assert!(!sim.is_open());

    // Corners walked from the back of the list, then the closing corner.
    assert_eq!(
        sim.positions(),
        vec![
            (0.0, 0.0, 3.0),
            (0.0, 10.0, 3.0),
            (10.0, 10.0, 3.0),
            (10.0, 0.0, 3.0),
            (0.0, 0.0, 3.0),
        ]
    );

    let first = &sim.cmds[..4];
    assert_eq!(first, &[Cmd::TakeControl, Cmd::Arm, Cmd::SetHome(HOME_ALT_M), Cmd::Takeoff(3.0)]);
    let tail = &sim.cmds[sim.cmds.len() - 4..];
    assert_eq!(tail, &[Cmd::Land, Cmd::Disarm, Cmd::ReleaseControl, Cmd::Stop]);

    let progress = runner.controller().progress();
    assert!(!progress.in_mission);
    assert_eq!(progress.remaining_waypoint_index, -2);
    assert_eq!(sim.telemetry.local_position, Position3::new(0.0, 0.0, 0.0));

    let states: Vec<FlightState> = runner
        .controller()
        .observer()
        .transitions
        .iter()
        .map(|(_, to)| *to)
        .collect();
    assert_eq!(
        states,
        vec![
            FlightState::Arming,
            FlightState::Takeoff,
            FlightState::Waypoint,
            FlightState::Landing,
            FlightState::Disarming,
            FlightState::Manual,
        ]
    );

    let path = log.path().to_path_buf();
    log.close().unwrap();
    let lines = std::fs::read_to_string(path).unwrap().lines().count() as u64;
    assert_eq!(lines, summary.notifications);
    assert!(sim.heartbeats >= 1);
}

#[test]
fn every_position_update_reaches_the_observer() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    let mut sim = SimVehicle::new(4);
    let mut runner = runner();
    runner.fly(&mut sim, &mut log, &AtomicBool::new(false)).unwrap();

    let samples = &runner.controller().observer().samples;
    let positions = sim.tick;
    assert_eq!(samples.len() as u64, positions);
    assert!(samples.windows(2).all(|w| w[1].step == w[0].step + 1));
    let peak = samples.iter().map(|s| -s.down).fold(f64::MIN, f64::max);
    assert!((peak - 3.0).abs() < 1e-9);
}

#[test]
fn stalled_link_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    // No vehicle-state notifications ever arrive.
    let mut sim = SimVehicle::new(0);
    let mut runner = runner();

    let summary = runner.fly(&mut sim, &mut log, &AtomicBool::new(false)).unwrap();

    assert_eq!(summary.final_state, FlightState::Manual);
    assert!(!summary.mission_complete);
    assert!(sim.cmds.is_empty());
}

#[test]
fn stop_flag_ends_the_run_before_any_notification() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    let mut sim = SimVehicle::new(4);
    let mut runner = runner();

    let summary = runner.fly(&mut sim, &mut log, &AtomicBool::new(true)).unwrap();

    assert_eq!(summary.notifications, 0);
    assert!(!summary.mission_complete);
    assert_eq!(log.records(), 0);
}

#[test]
fn finished_controller_can_fly_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    let mut runner = runner();

    let mut first = SimVehicle::new(4);
    assert!(runner.fly(&mut first, &mut log, &AtomicBool::new(false)).unwrap().mission_complete);

    let mut second = SimVehicle::new(4);
    let summary = runner.fly(&mut second, &mut log, &AtomicBool::new(false)).unwrap();
    assert!(summary.mission_complete);
    assert_eq!(second.positions().len(), 5);
}

#[test]
fn holds_commands_until_the_global_fix_arrives() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    let mut sim = SimVehicle::new(4).without_fix_until(20);
    let mut runner = runner();

    let summary = runner.fly(&mut sim, &mut log, &AtomicBool::new(false)).unwrap();

    assert!(summary.mission_complete);
    assert_eq!(sim.cmds[2], Cmd::SetHome(HOME_ALT_M));
    assert_eq!(sim.telemetry.global_home.lat, HOME_LAT);
    // Held notifications are still logged.
    assert_eq!(log.records(), summary.notifications);
}

#[test]
fn never_ready_link_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = NavLog::open(dir.path(), "NavLog.txt").unwrap();
    let mut sim = SimVehicle::new(4).without_fix_until(u64::MAX);
    let mut runner = runner();

    let summary = runner.fly(&mut sim, &mut log, &AtomicBool::new(false)).unwrap();

    assert!(sim.cmds.is_empty());
    assert_eq!(summary.final_state, FlightState::Manual);
    assert!(runner.controller().observer().samples.is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn failing_nav_log_does_not_abort_the_flight() {
    let mut log = NavLog::open("/dev", "full").unwrap();
    let mut sim = SimVehicle::new(4);
    let mut runner = runner();

    let summary = runner.fly(&mut sim, &mut log, &AtomicBool::new(false)).unwrap();

    assert!(log.is_disabled());
    assert!(summary.mission_complete);
    assert_eq!(summary.final_state, FlightState::Manual);
    assert_eq!(sim.positions().len(), 5);
    assert_eq!(sim.cmds.last(), Some(&Cmd::Stop));
}
