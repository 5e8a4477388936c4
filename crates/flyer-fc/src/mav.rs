use anyhow::{Context, Result};
use flyer_proto::{GlobalPosition, Notification, Position3, TelemetryFeed, TelemetrySnapshot, Vehicle, Velocity3};
use mavlink::{
    common::{
        MavMessage, HEARTBEAT_DATA, MavAutopilot, MavModeFlag, MavState,
        COMMAND_INT_DATA, COMMAND_LONG_DATA, MavCmd, MavFrame, MavType, SYS_STATUS_DATA,
        SET_POSITION_TARGET_LOCAL_NED_DATA, PositionTargetTypemask,
    },
    error::MessageReadError,
    MavConnection, MavHeader, Message,
};
use std::io::ErrorKind;
use tracing::{debug, info, warn};

use crate::state::{BatteryStatus, LinkStatus};

/// Ignore velocity, acceleration and yaw rate; keep position and yaw.
const POSITION_ONLY_TYPEMASK: u16 = 0b0000_1001_1111_1000;

/// Armed and guided flags carried by a HEARTBEAT.
pub fn vehicle_state(hb: &HEARTBEAT_DATA) -> (bool, bool) {
    (
        hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
        hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_GUIDED_ENABLED),
    )
}

/// Receive errors that mean the peer is gone for good. Timeouts and
/// corrupt frames are not.
pub fn link_lost(err: &MessageReadError) -> bool {
    match err {
        MessageReadError::Io(e) => matches!(
            e.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected
        ),
        _ => false,
    }
}

/// degE7 / millimetres to degrees / metres.
pub fn global_from_int(lat_e7: i32, lon_e7: i32, alt_mm: i32) -> GlobalPosition {
    GlobalPosition {
        lat: lat_e7 as f64 / 1e7,
        lon: lon_e7 as f64 / 1e7,
        alt: alt_mm as f64 / 1000.0,
    }
}

/// Turns incoming MAVLink traffic from one vehicle into a telemetry snapshot
/// and typed notifications.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    target_sys: u8,
    snapshot: TelemetrySnapshot,
    battery: BatteryStatus,
    seen_heartbeat: bool,
    global_fix: bool,
}

impl TelemetryDecoder {
    pub fn new(target_sys: u8) -> Self {
        Self {
            target_sys,
            snapshot: TelemetrySnapshot::default(),
            battery: BatteryStatus::default(),
            seen_heartbeat: false,
            global_fix: false,
        }
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    pub fn battery_status(&self) -> &BatteryStatus {
        &self.battery
    }

    pub fn seen_heartbeat(&self) -> bool {
        self.seen_heartbeat
    }

    /// Autopilots report 0,0 until GPS locks, so that does not count.
    pub fn has_global_fix(&self) -> bool {
        self.global_fix
    }

    pub fn set_home(&mut self, home: GlobalPosition) {
        self.snapshot.global_home = home;
    }

    pub fn ingest(&mut self, hdr: &MavHeader, msg: &MavMessage) -> Vec<Notification> {
        if hdr.system_id != self.target_sys {
            return Vec::new();
        }
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                // Gimbals, cameras etc. share the system id but are not the autopilot.
                if hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID {
                    return Vec::new();
                }
                self.seen_heartbeat = true;
                let (armed, guided) = vehicle_state(hb);
                self.snapshot.armed = armed;
                self.snapshot.guided = guided;
                vec![Notification::State { armed, guided }]
            }
            MavMessage::LOCAL_POSITION_NED(p) => {
                let position = Position3::new(p.x as f64, p.y as f64, p.z as f64);
                let velocity = Velocity3 { vn: p.vx as f64, ve: p.vy as f64, vd: p.vz as f64 };
                self.snapshot.local_position = position;
                self.snapshot.local_velocity = velocity;
                vec![Notification::LocalPosition(position), Notification::LocalVelocity(velocity)]
            }
            MavMessage::GLOBAL_POSITION_INT(g) => {
                self.snapshot.global_position = global_from_int(g.lat, g.lon, g.alt);
                self.global_fix |= g.lat != 0 || g.lon != 0;
                Vec::new()
            }
            MavMessage::HOME_POSITION(h) => {
                self.snapshot.global_home = global_from_int(h.latitude, h.longitude, h.altitude);
                Vec::new()
            }
            MavMessage::SYS_STATUS(status) => {
                self.update_battery(status);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn update_battery(&mut self, status: &SYS_STATUS_DATA) {
        // voltage_battery is in millivolts, convert to volts
        if status.voltage_battery != u16::MAX {
            self.battery.voltage = Some(status.voltage_battery as f32 / 1000.0);
        }
        // current_battery is in centiamps (0.01A), -1 means invalid
        if status.current_battery != -1 {
            self.battery.current = Some(status.current_battery as f32 / 100.0);
        }
        // battery_remaining is percentage 0-100, -1 means invalid
        if status.battery_remaining >= 0 && status.battery_remaining <= 100 {
            self.battery.remaining = Some(status.battery_remaining as u8);
        }
    }
}

pub struct FcLink {
    conn: Box<dyn MavConnection<MavMessage> + Send>,
    hdr: MavHeader,
    target_sys: u8,
    target_comp: u8,
    guided_mode: u32,
    manual_mode: u32,
    open: bool,
    decoder: TelemetryDecoder,
    status: LinkStatus,
}

impl FcLink {
    pub fn open(
        connection: &str,
        sys_id: u8,
        comp_id: u8,
        target_sys: u8,
        target_comp: u8,
        guided_mode: u32,
        manual_mode: u32,
    ) -> Result<Self> {
        // quick validate serial device before handing it to mavlink
        if let Some(rest) = connection.strip_prefix("serial:") {
            let (dev, baud) = rest
                .rsplit_once(':')
                .with_context(|| format!("serial connection needs dev:baud, got {}", connection))?;
            let baud: u32 = baud.parse().with_context(|| format!("bad baud in {}", connection))?;
            let _ = tokio_serial::new(dev, baud)
                .open()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        let conn = mavlink::connect::<MavMessage>(connection)
            .with_context(|| format!("mavlink connect {}", connection))?;
        info!("fc: connected to {}", connection);

        Ok(Self {
            conn,
            hdr: MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 },
            target_sys,
            target_comp,
            guided_mode,
            manual_mode,
            open: true,
            decoder: TelemetryDecoder::new(target_sys),
            status: LinkStatus {
                connected: true,
                endpoint: Some(connection.to_string()),
                ..Default::default()
            },
        })
    }

    pub fn from_config(cfg: &crate::FcConfig, connection: &str) -> Result<Self> {
        Self::open(
            connection,
            cfg.sys_id, cfg.comp_id,
            cfg.target_sys, cfg.target_comp,
            cfg.guided_mode, cfg.manual_mode,
        )
    }

    /// Blocks until a message arrives. Returns Ok(None) if recv fails; a lost
    /// peer also closes the link.
    pub fn poll_once(&mut self) -> Result<Option<(MavHeader, MavMessage)>> {
        match self.conn.recv() {
            Ok((hdr, msg)) => {
                self.status.messages += 1;
                self.status.last_msg = Some(msg.message_name());
                if hdr.system_id == self.target_sys && matches!(msg, MavMessage::HEARTBEAT(_)) {
                    self.status.last_heartbeat = Some(std::time::Instant::now());
                }
                Ok(Some((hdr, msg)))
            }
            Err(e) if link_lost(&e) => {
                if self.open {
                    warn!("fc: link to {:?} lost: {:?}", self.status.endpoint, e);
                }
                self.open = false;
                self.status.connected = false;
                Ok(None)
            }
            Err(e) => {
                debug!("fc: recv failed: {:?}", e);
                Ok(None)
            }
        }
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    pub fn battery_status(&self) -> &BatteryStatus {
        self.decoder.battery_status()
    }

    pub fn seen_heartbeat(&self) -> bool {
        self.decoder.seen_heartbeat()
    }

    fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).context("mavlink send")?;
        Ok(())
    }

    fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    /// Commands are fire-and-forget; failures are logged and counted only.
    fn report(&mut self, what: &str, res: Result<()>) {
        match res {
            Ok(()) => info!("fc: sent {}", what),
            Err(e) => {
                self.status.send_failures += 1;
                warn!("fc: {} failed: {:#}", what, e);
            }
        }
    }

    fn set_mode(&mut self, what: &str, custom_mode: u32) {
        let flag = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        let res = self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [flag, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        );
        self.report(what, res);
    }
}

impl Vehicle for FcLink {
    fn take_control(&mut self) {
        let mode = self.guided_mode;
        self.set_mode("take control", mode);
    }

    fn release_control(&mut self) {
        let mode = self.manual_mode;
        self.set_mode("release control", mode);
    }

    fn arm(&mut self) {
        let res = self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        self.report("ARM", res);
    }

    fn disarm(&mut self) {
        let res = self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7]);
        self.report("DISARM", res);
    }

    fn set_home_position(&mut self, lat: f64, lon: f64, alt: f64) {
        // COMMAND_INT keeps full lat/lon precision.
        let cmd = COMMAND_INT_DATA {
            param1: 0.0, // use the given location, not the current one
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: (lat * 1e7).round() as i32,
            y: (lon * 1e7).round() as i32,
            z: alt as f32,
            command: MavCmd::MAV_CMD_DO_SET_HOME,
            target_system: self.target_sys,
            target_component: self.target_comp,
            frame: MavFrame::MAV_FRAME_GLOBAL,
            current: 0,
            autocontinue: 0,
        };
        let res = self.send(MavMessage::COMMAND_INT(cmd));
        if res.is_ok() {
            self.decoder.set_home(GlobalPosition { lat, lon, alt });
        }
        self.report("SET_HOME", res);
    }

    fn takeoff(&mut self, target_altitude: f64) {
        let res = self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, target_altitude as f32],
        );
        self.report("TAKEOFF", res);
    }

    fn land(&mut self) {
        let res = self.command_long(MavCmd::MAV_CMD_NAV_LAND, [0.0; 7]);
        self.report("LAND", res);
    }

    fn cmd_position(&mut self, north: f64, east: f64, altitude: f64, heading: f64) {
        let target = SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            x: north as f32,
            y: east as f32,
            z: -altitude as f32,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: heading.to_radians() as f32,
            yaw_rate: 0.0,
            type_mask: PositionTargetTypemask::from_bits_truncate(POSITION_ONLY_TYPEMASK),
            target_system: self.target_sys,
            target_component: self.target_comp,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
        };
        let res = self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(target));
        self.report("POSITION", res);
    }

    fn stop(&mut self) {
        info!("fc: closing link to {:?}", self.status.endpoint);
        self.open = false;
        self.status.connected = false;
    }

    fn telemetry(&self) -> &TelemetrySnapshot {
        self.decoder.snapshot()
    }
}

impl TelemetryFeed for FcLink {
    fn next_notifications(&mut self) -> Result<Vec<Notification>> {
        Ok(match self.poll_once()? {
            Some((hdr, msg)) => self.decoder.ingest(&hdr, &msg),
            None => Vec::new(),
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn ready(&self) -> bool {
        self.decoder.has_global_fix()
    }

    fn send_heartbeat(&mut self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }
}
