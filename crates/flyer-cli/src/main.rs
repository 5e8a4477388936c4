use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use flyer_fc::FcConfig;
use flyer_fc::mav::FcLink;
use flyer_fc::autodetect::{autodetect_fc, resolve_connection};
use flyer_mission::{calculate_box, doctor as mission_doctor, FlightController};
use flyer_mission::flight::flight_order;
use flyer_mission::navlog::NavLog;
use flyer_mission::observer::TrackLog;
use flyer_mission::runner::MissionRunner;
use flyer_proto::Vehicle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "flyer", version, about = "Box Flyer - autonomous box mission for a single drone")]
struct Cli {
    /// TOML config; built-in defaults when omitted.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Print the waypoints in the order they will be flown.
    Plan,
    Run {
        /// Vehicle host; overrides fc.connection with tcpout:HOST:PORT.
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe candidate connections for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    fc: FcConfig,
    log: LogCfg,
    track: Option<TrackCfg>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct LogCfg {
    dir: String,
    file: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self { dir: "Logs".into(), file: "NavLog.txt".into() }
    }
}

#[derive(Debug, serde::Deserialize)]
struct TrackCfg {
    path: String,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()); };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Plan => plan()?,
        Command::Run { host, port } => run(&cfg, host, port).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    mission_doctor::check_mission(&calculate_box())?;

    let fc = &cfg.fc;
    if fc.autodetect {
        info!("doctor: fc autodetect enabled (OK)");
    } else {
        anyhow::ensure!(!fc.connection.is_empty(), "fc.connection missing");
    }
    anyhow::ensure!(fc.sys_id != fc.target_sys, "fc.sys_id must differ from fc.target_sys");
    anyhow::ensure!(fc.guided_mode != fc.manual_mode, "fc.guided_mode and fc.manual_mode are identical");

    std::fs::create_dir_all(&cfg.log.dir).with_context(|| format!("log dir {} not writable", cfg.log.dir))?;
    anyhow::ensure!(!cfg.log.file.is_empty(), "log.file missing");

    info!("doctor: OK");
    Ok(())
}

fn plan() -> Result<()> {
    let mission = calculate_box();
    mission_doctor::check_mission(&mission)?;
    for (i, wp) in flight_order(&mission).iter().enumerate() {
        println!("{} n={:.1} e={:.1} alt={:.1} hdg={:.0}", i + 1, wp.north, wp.east, wp.altitude, wp.heading);
    }
    Ok(())
}

fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let res = autodetect_fc(&cfg.fc)?;
            if let Some(conn) = res.chosen {
                println!("CHOSEN: {}", conn);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!("probe connection={} hb={} {}ms note={}", p.connection, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
    }
}

fn connection_for(cfg: &FcConfig, host: Option<String>, port: Option<u16>) -> Result<String> {
    if host.is_none() && port.is_none() {
        return resolve_connection(cfg);
    }
    Ok(format!(
        "tcpout:{}:{}",
        host.as_deref().unwrap_or("127.0.0.1"),
        port.unwrap_or(5760)
    ))
}

async fn run(cfg: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    info!("run: starting");

    let mission = calculate_box();
    mission_doctor::check_mission(&mission)?;

    let track = cfg.track.as_ref().map(|t| TrackLog::create(&t.path)).transpose()?;
    let controller = FlightController::with_observer(mission, track)?;
    let mut runner = MissionRunner::new(controller, cfg.fc.heartbeat_interval());
    info!("run: box mission with {} waypoints", runner.controller().mission().len());

    let connection = connection_for(&cfg.fc, host, port)?;
    let mut link = FcLink::from_config(&cfg.fc, &connection).context("FC open")?;

    info!("run: creating log file");
    let mut log = NavLog::open(&cfg.log.dir, &cfg.log.file)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop2 = stop.clone();

    // mavlink recv blocks, so the whole mission loop lives on a blocking thread.
    let mut handle = tokio::task::spawn_blocking(move || {
        let res = runner.fly(&mut link, &mut log, &stop2);
        (res, log, link, runner)
    });

    let finished = tokio::select! {
        joined = &mut handle => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let (res, log, link, runner) = match finished {
        Some(joined) => joined.context("mission runner panicked")?,
        None => {
            warn!("run: interrupted, stopping after the next message");
            stop.store(true, Ordering::Relaxed);
            handle.await.context("mission runner panicked")?
        }
    };

    info!("run: closing log file");
    if let Err(e) = log.close() {
        warn!("run: {:#}", e);
    }
    if let Some(track) = runner.into_controller().into_observer() {
        if let Err(e) = track.finish() {
            warn!("run: {:#}", e);
        }
    }
    let summary = res?;

    let st = link.status();
    info!(
        "fc: messages={} send_failures={} last_msg={:?} hb_age={:?}",
        st.messages, st.send_failures, st.last_msg, st.hb_age()
    );
    let battery = link.battery_status();
    if let Some(v) = battery.voltage {
        info!("fc: battery {:.2}V remaining={:?}", v, battery.remaining);
    }
    let p = link.telemetry().local_position;
    info!("fc: final local position n={:.2} e={:.2} d={:.2}", p.north, p.east, p.down);

    if !summary.mission_complete {
        warn!("run: mission did not complete (state={:?})", summary.final_state);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_port_override_connection() {
        let cfg = FcConfig::default();
        assert_eq!(
            connection_for(&cfg, Some("10.0.0.2".into()), None).unwrap(),
            "tcpout:10.0.0.2:5760"
        );
        assert_eq!(connection_for(&cfg, None, Some(5762)).unwrap(), "tcpout:127.0.0.1:5762");
        assert_eq!(connection_for(&cfg, None, None).unwrap(), "tcpout:127.0.0.1:5760");
    }

    #[test]
    fn config_sections_are_optional() {
        let cfg: Config = toml::from_str(r#"
            [fc]
            connection = "udpin:0.0.0.0:14550"

            [track]
            path = "Logs/track.jsonl"
        "#).unwrap();
        assert_eq!(cfg.fc.connection, "udpin:0.0.0.0:14550");
        assert_eq!(cfg.log.dir, "Logs");
        assert_eq!(cfg.log.file, "NavLog.txt");
        assert_eq!(cfg.track.unwrap().path, "Logs/track.jsonl");
    }

    #[test]
    fn missing_config_path_gives_defaults() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.fc.connection, "tcpout:127.0.0.1:5760");
        assert!(cfg.track.is_none());
    }
}
