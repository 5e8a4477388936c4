//! Telemetry-driven flight state machine for the box mission.
//!
//! The controller never blocks and never waits for command acknowledgements.
//! If the vehicle does not react to a command, the expected telemetry simply
//! never arrives and the controller stays where it is. There is no timeout.

use flyer_proto::{Notification, Position3, Vehicle, Velocity3};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::MissionError;
use crate::observer::{FlightObserver, TrackSample};
use crate::planner::{Mission, Waypoint};

/// Altitude commanded at takeoff, metres.
pub const TAKEOFF_ALTITUDE_M: f64 = 3.0;
/// Fraction of the target altitude that counts as "reached".
pub const ALTITUDE_RATIO: f64 = 0.95;
/// Arrival tolerance along north, metres.
pub const NORTH_TOLERANCE_M: f64 = 0.5;
/// Arrival tolerance along east, metres. Tighter than north.
pub const EAST_TOLERANCE_M: f64 = 0.3;
/// Height above home below which a landing vehicle is considered down.
pub const LANDED_ALTITUDE_M: f64 = 0.1;
/// Lowest index still flown. Waypoints are consumed from the back and index
/// -1 resolves to the last entry, which closes the box at the origin.
pub const LAST_WAYPOINT_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightState {
    #[default]
    Manual,
    Arming,
    Takeoff,
    Waypoint,
    Landing,
    Disarming,
}

/// Mutable mission state, owned by one controller.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionProgress {
    pub flight_state: FlightState,
    pub target_position: Position3,
    pub remaining_waypoint_index: i32,
    pub in_mission: bool,
    /// Last position command sent, used to suppress identical re-sends.
    pub last_command: Option<Waypoint>,
}

impl MissionProgress {
    pub fn initial(waypoint_count: usize) -> Self {
        Self {
            flight_state: FlightState::Manual,
            target_position: Position3::default(),
            remaining_waypoint_index: waypoint_count as i32,
            in_mission: true,
            last_command: None,
        }
    }

    pub fn mission_exhausted(&self) -> bool {
        self.remaining_waypoint_index < LAST_WAYPOINT_INDEX
    }
}

/// Arrival gate: altitude, north and east must all be inside their bounds.
pub fn arrived(position: &Position3, target: &Position3) -> bool {
    position.altitude() > ALTITUDE_RATIO * target.altitude()
        && (position.north - target.north).abs() < NORTH_TOLERANCE_M
        && (position.east - target.east).abs() < EAST_TOLERANCE_M
}

/// Position commands the controller will issue for `mission`, in order.
pub fn flight_order(mission: &Mission) -> Vec<Waypoint> {
    (LAST_WAYPOINT_INDEX..mission.len() as i32)
        .rev()
        .filter_map(|i| mission.waypoint_at(i).copied())
        .collect()
}

pub struct FlightController<O: FlightObserver = ()> {
    mission: Mission,
    progress: MissionProgress,
    observer: O,
    step: u64,
}

impl FlightController<()> {
    pub fn new(mission: Mission) -> Result<Self, MissionError> {
        Self::with_observer(mission, ())
    }
}

impl<O: FlightObserver> FlightController<O> {
    pub fn with_observer(mission: Mission, observer: O) -> Result<Self, MissionError> {
        mission.validate()?;
        let progress = MissionProgress::initial(mission.len());
        Ok(Self { mission, progress, observer, step: 0 })
    }

    pub fn state(&self) -> FlightState {
        self.progress.flight_state
    }

    pub fn progress(&self) -> &MissionProgress {
        &self.progress
    }

    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Reset to a fresh Manual/in-mission state.
    pub fn start_mission(&mut self) {
        self.progress = MissionProgress::initial(self.mission.len());
        info!("mission: started ({} waypoints)", self.mission.len());
    }

    /// Route one notification to its handler.
    pub fn dispatch<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V, notification: &Notification) {
        match notification {
            Notification::LocalPosition(position) => {
                self.on_position_update(vehicle, *position);
                self.step += 1;
                let sample = TrackSample::new(self.step, *position, self.progress.flight_state);
                self.observer.on_sample(&sample);
            }
            Notification::LocalVelocity(velocity) => {
                let above_home = vehicle.telemetry().altitude_above_home();
                self.on_velocity_update(vehicle, *velocity, above_home);
            }
            Notification::State { armed, guided } => {
                self.on_vehicle_state_update(vehicle, *armed, *guided);
            }
        }
    }

    pub fn on_position_update<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V, position: Position3) {
        if !self.progress.in_mission {
            return;
        }
        match self.progress.flight_state {
            FlightState::Takeoff => {
                let target_alt = self.progress.target_position.altitude();
                if position.altitude() > ALTITUDE_RATIO * target_alt {
                    self.waypoint_transition(vehicle, position);
                }
            }
            // No-op once the mission is exhausted, which it always is here.
            FlightState::Landing => self.attempt_waypoint_advance(vehicle, position),
            FlightState::Manual
            | FlightState::Arming
            | FlightState::Waypoint
            | FlightState::Disarming => {}
        }
    }

    pub fn on_velocity_update<V: Vehicle + ?Sized>(
        &mut self,
        vehicle: &mut V,
        _velocity: Velocity3,
        altitude_above_home: f64,
    ) {
        if !self.progress.in_mission {
            return;
        }
        match self.progress.flight_state {
            FlightState::Landing if altitude_above_home < LANDED_ALTITUDE_M => {
                self.disarming_transition(vehicle);
            }
            _ => {}
        }
    }

    pub fn on_vehicle_state_update<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V, armed: bool, guided: bool) {
        if !self.progress.in_mission {
            return;
        }
        debug!("vehicle state: armed={} guided={} in {:?}", armed, guided, self.progress.flight_state);
        match self.progress.flight_state {
            FlightState::Manual => self.arming_transition(vehicle),
            FlightState::Arming => self.takeoff_transition(vehicle),
            FlightState::Disarming => self.manual_transition(vehicle),
            FlightState::Waypoint => {
                let position = vehicle.telemetry().local_position;
                self.attempt_waypoint_advance(vehicle, position);
            }
            FlightState::Takeoff | FlightState::Landing => {}
        }
    }

    fn set_state(&mut self, to: FlightState) {
        let from = self.progress.flight_state;
        if from == to {
            return;
        }
        self.progress.flight_state = to;
        info!("flight: {:?} -> {:?}", from, to);
        self.observer.on_transition(from, to);
    }

    fn arming_transition<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V) {
        vehicle.take_control();
        vehicle.arm();
        let home = vehicle.telemetry().global_position;
        vehicle.set_home_position(home.lat, home.lon, home.alt);
        self.set_state(FlightState::Arming);
    }

    fn takeoff_transition<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V) {
        self.progress.target_position = Position3::from_altitude(0.0, 0.0, TAKEOFF_ALTITUDE_M);
        vehicle.takeoff(TAKEOFF_ALTITUDE_M);
        self.set_state(FlightState::Takeoff);
    }

    fn waypoint_transition<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V, position: Position3) {
        self.set_state(FlightState::Waypoint);
        self.attempt_waypoint_advance(vehicle, position);
    }

    /// Shared by every trigger that may move the mission forward. Safe to call
    /// repeatedly: nothing happens unless the vehicle is inside the arrival
    /// gate of the current target, and identical commands are not re-sent.
    fn attempt_waypoint_advance<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V, position: Position3) {
        if self.progress.mission_exhausted() {
            return;
        }
        if !arrived(&position, &self.progress.target_position) {
            return;
        }

        self.progress.remaining_waypoint_index -= 1;
        let index = self.progress.remaining_waypoint_index;
        debug!("waypoint: arrived, remaining index {}", index);
        if index < LAST_WAYPOINT_INDEX {
            self.landing_transition(vehicle);
            return;
        }

        let Some(wp) = self.mission.waypoint_at(index).copied() else {
            warn!("waypoint: index {} outside mission of {}; landing", index, self.mission.len());
            self.landing_transition(vehicle);
            return;
        };
        self.progress.target_position.north = wp.north;
        self.progress.target_position.east = wp.east;
        self.command_target(vehicle, wp.heading);
    }

    fn command_target<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V, heading: f64) {
        let t = self.progress.target_position;
        let cmd = Waypoint::new(t.north, t.east, t.altitude(), heading);
        if self.progress.last_command == Some(cmd) {
            debug!("waypoint: target unchanged, not re-sending {:?}", cmd);
            return;
        }
        info!("waypoint: commanding n={:.2} e={:.2} alt={:.2}", cmd.north, cmd.east, cmd.altitude);
        vehicle.cmd_position(cmd.north, cmd.east, cmd.altitude, cmd.heading);
        self.progress.last_command = Some(cmd);
    }

    fn landing_transition<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V) {
        vehicle.land();
        self.set_state(FlightState::Landing);
    }

    fn disarming_transition<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V) {
        vehicle.disarm();
        self.set_state(FlightState::Disarming);
    }

    fn manual_transition<V: Vehicle + ?Sized>(&mut self, vehicle: &mut V) {
        vehicle.release_control();
        vehicle.stop();
        self.progress.in_mission = false;
        self.set_state(FlightState::Manual);
        info!("mission: complete");
    }
}
