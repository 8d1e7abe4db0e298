//! Command-line surface, modeled on the teacher daemon's `Args`.

use std::path::PathBuf;

use clap::Parser;

/// Host-resident network anomaly detector.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Packet-replay file to read in place of a live capture interface.
    #[clap(long)]
    pub replay_file: Option<PathBuf>,

    /// Optional TOML configuration file. CLI flags below take precedence
    /// over anything it sets.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Uplink controller address, `host:port`.
    #[clap(long)]
    pub uplink: Option<String>,

    /// Anomaly score threshold in [0, 1]. Default 0.95.
    #[clap(long)]
    pub threshold: Option<f64>,

    /// Learning-phase duration in seconds. Default 90.
    #[clap(long)]
    pub learn_seconds: Option<u64>,

    /// Path to the persisted `statetrans.log` sink.
    #[clap(long)]
    pub log_path: Option<String>,

    /// Verbose logging.
    #[clap(short, long)]
    pub verbose: bool,
}
