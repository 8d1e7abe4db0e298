//! Configuration surface: an optional TOML file merged with CLI overrides.
//! Precedence is CLI flag > file value > built-in default.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use statetrans_core::{DEFAULT_LEARN_SECONDS, DEFAULT_REORDER_WINDOW, DEFAULT_THRESHOLD};

use crate::cli::Args;

#[derive(Debug, Clone)]
pub struct Config {
    pub uplink_addr: Option<String>,
    pub threshold: f64,
    pub learn_seconds: u64,
    pub timeslots_us: Vec<u64>,
    pub reorder_window: usize,
    pub log_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            uplink_addr: None,
            threshold: DEFAULT_THRESHOLD,
            learn_seconds: DEFAULT_LEARN_SECONDS,
            timeslots_us: statetrans_core::DEFAULT_TIMESLOT_SCHEDULE_US.to_vec(),
            reorder_window: DEFAULT_REORDER_WINDOW,
            log_path: "statetrans.log".to_string(),
        }
    }
}

/// Mirrors `Config`'s fields but every field optional, as parsed straight
/// from TOML — absence means "fall through to the default".
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    uplink_addr: Option<String>,
    threshold: Option<f64>,
    learn_seconds: Option<u64>,
    timeslots_us: Option<Vec<u64>>,
    reorder_window: Option<usize>,
    log_path: Option<String>,
}

fn load_file(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config file {:?}", path))
}

/// Build the effective configuration: defaults, overridden by the config
/// file (if any), overridden by CLI flags (if any).
pub fn resolve(args: &Args) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = &args.config {
        let file = load_file(path)?;
        if let Some(v) = file.uplink_addr {
            cfg.uplink_addr = Some(v);
        }
        if let Some(v) = file.threshold {
            cfg.threshold = v;
        }
        if let Some(v) = file.learn_seconds {
            cfg.learn_seconds = v;
        }
        if let Some(v) = file.timeslots_us {
            cfg.timeslots_us = v;
        }
        if let Some(v) = file.reorder_window {
            cfg.reorder_window = v;
        }
        if let Some(v) = file.log_path {
            cfg.log_path = v;
        }
    }

    if let Some(v) = &args.uplink {
        cfg.uplink_addr = Some(v.clone());
    }
    if let Some(v) = args.threshold {
        cfg.threshold = v;
    }
    if let Some(v) = args.learn_seconds {
        cfg.learn_seconds = v;
    }
    if let Some(v) = &args.log_path {
        cfg.log_path = v.clone();
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specified_fallbacks() {
        let cfg = Config::default();
        assert_eq!(cfg.threshold, 0.95);
        assert_eq!(cfg.learn_seconds, 90);
        assert_eq!(cfg.reorder_window, 20);
        assert_eq!(cfg.timeslots_us, vec![1, 10, 100, 1_000, 10_000, 100_000, 1_000_000]);
    }

    #[test]
    fn cli_threshold_overrides_default() {
        let args = Args {
            replay_file: None,
            config: None,
            uplink: None,
            threshold: Some(0.8),
            learn_seconds: None,
            log_path: None,
            verbose: false,
        };
        let cfg = resolve(&args).unwrap();
        assert_eq!(cfg.threshold, 0.8);
    }

    #[test]
    fn file_config_applies_when_cli_silent() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetrans-test-config-{}.toml", std::process::id()));
        std::fs::write(&path, "threshold = 0.7\nlearn_seconds = 45\n").unwrap();

        let args = Args {
            replay_file: None,
            config: Some(path.clone()),
            uplink: None,
            threshold: None,
            learn_seconds: None,
            log_path: None,
            verbose: false,
        };
        let cfg = resolve(&args).unwrap();
        assert_eq!(cfg.threshold, 0.7);
        assert_eq!(cfg.learn_seconds, 45);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn cli_overrides_file_value() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetrans-test-config-override-{}.toml", std::process::id()));
        std::fs::write(&path, "threshold = 0.7\n").unwrap();

        let args = Args {
            replay_file: None,
            config: Some(path.clone()),
            uplink: None,
            threshold: Some(0.99),
            learn_seconds: None,
            log_path: None,
            verbose: false,
        };
        let cfg = resolve(&args).unwrap();
        assert_eq!(cfg.threshold, 0.99);

        let _ = std::fs::remove_file(&path);
    }
}
