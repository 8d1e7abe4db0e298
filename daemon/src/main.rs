//! statetrans — host-resident network anomaly detector.
//!
//! Wires a packet-replay source (or, in a future capture-backed build, a
//! live interface) through `statetrans-core`'s engine, switches from
//! LEARNING to DETECTION after the configured duration, and forwards any
//! triggered anomaly reports to an upstream uplink controller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use statetrans_core::evaluator::chebyshev::ChebyshevEvaluator;
use statetrans_core::statemachine::tcp::{TcpStateMachine, TRANSITION_COUNT};
use statetrans_core::{Engine, Mode};

use statetrans_daemon::cli::Args;
use statetrans_daemon::config::{self, Config};
use statetrans_daemon::logger::StateLog;
use statetrans_daemon::replay::ReplaySource;
use statetrans_daemon::uplink::{self, UplinkClient};

type DetectorEngine = Engine<TcpStateMachine, ChebyshevEvaluator>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let cfg = config::resolve(&args).context("failed to resolve configuration")?;
    let state_log = StateLog::new(cfg.log_path.clone());
    state_log.info("statetrans starting up").ok();

    info!("threshold={} learn_seconds={}", cfg.threshold, cfg.learn_seconds);

    let replay_path = args
        .replay_file
        .clone()
        .context("a --replay-file is required until a live capture collaborator is wired in")?;

    let engine = build_engine(&cfg);
    let engine = Arc::new(Mutex::new(engine));

    let uplink = match &cfg.uplink_addr {
        Some(addr) => Some(Arc::new(Mutex::new(UplinkClient::connect(addr).await?))),
        None => {
            warn!("no uplink configured; anomaly reports will only be logged");
            None
        }
    };

    let learn_duration = Duration::from_secs(cfg.learn_seconds);
    let mode_switch_engine = Arc::clone(&engine);
    let mode_switch_log_path = cfg.log_path.clone();
    tokio::spawn(async move {
        sleep(learn_duration).await;
        let mut engine = mode_switch_engine.lock().await;
        engine.change_mode(Mode::Detection);
        let log = StateLog::new(mode_switch_log_path);
        log.info("switched to DETECTION mode").ok();
        info!("switched to DETECTION mode");
    });

    if let Some(uplink) = uplink.clone() {
        let recv_engine = Arc::clone(&engine);
        tokio::spawn(async move {
            loop {
                let msg = {
                    let mut client = uplink.lock().await;
                    client.recv_message().await
                };
                match msg {
                    Ok(statetrans_core::wire::InboundMessage::Config(update)) => {
                        let mut engine = recv_engine.lock().await;
                        engine.set_threshold(update.threshold);
                        info!("uplink updated threshold to {}", update.threshold);
                    }
                    Ok(statetrans_core::wire::InboundMessage::Block(directive)) => {
                        uplink::log_block_directive(&directive);
                    }
                    Ok(statetrans_core::wire::InboundMessage::Unknown(opcode)) => {
                        warn!("unknown uplink opcode {opcode:#x}, ignoring");
                    }
                    Err(e) => {
                        warn!("uplink receive loop ending: {e:#}");
                        break;
                    }
                }
            }
        });
    }

    run_replay(&replay_path, engine, uplink, &cfg).await?;

    state_log.info("statetrans shutting down").ok();
    Ok(())
}

fn build_engine(cfg: &Config) -> DetectorEngine {
    let statemachine = TcpStateMachine::new(cfg.timeslots_us.clone());
    let evaluator = ChebyshevEvaluator::new(cfg.timeslots_us.len(), TRANSITION_COUNT);
    Engine::new(statemachine, evaluator, cfg.threshold)
}

async fn run_replay(
    path: &PathBuf,
    engine: Arc<Mutex<DetectorEngine>>,
    uplink: Option<Arc<Mutex<UplinkClient>>>,
    cfg: &Config,
) -> Result<()> {
    let source = ReplaySource::load(path)?;
    if source.is_empty() {
        bail!("replay file {:?} contained no events", path);
    }
    info!("replaying {} events from {:?}", source.len(), path);

    let mut buffer = statetrans_core::PacketBuffer::with_capacity(cfg.reorder_window);

    for pkt in source.into_packets() {
        if let Some(emitted) = buffer.add(pkt) {
            dispatch(&engine, &uplink, emitted).await?;
        }
    }
    for pkt in buffer.drain_oldest_first() {
        dispatch(&engine, &uplink, pkt).await?;
    }

    Ok(())
}

async fn dispatch(
    engine: &Arc<Mutex<DetectorEngine>>,
    uplink: &Option<Arc<Mutex<UplinkClient>>>,
    pkt: statetrans_common::PacketInfo,
) -> Result<()> {
    let reports = {
        let mut engine = engine.lock().await;
        engine.handle_packet(&pkt)
    };

    for report in reports {
        info!(
            "anomaly score={:.3} {}:{} -> {}:{}",
            report.score,
            statetrans_common::format::format_ip(&report.src_ip, report.v6),
            report.src_port,
            statetrans_common::format::format_ip(&report.dst_ip, report.v6),
            report.dst_port
        );
        if let Some(uplink) = uplink {
            let unix_secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let mut client = uplink.lock().await;
            client.send_anomaly_report(&report, unix_secs).await?;
        }
    }
    Ok(())
}
