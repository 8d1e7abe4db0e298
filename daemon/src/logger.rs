//! The `statetrans.log` persisted-state sink: append-only,
//! newline-delimited `YYYY-MM-DD HH:MM:SS [LEVEL]: message` lines. This is a
//! wire/data contract (§6), kept separate from the ambient `log`/`env_logger`
//! facade used for operational console output.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

pub struct StateLog {
    path: PathBuf,
}

impl StateLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, level: Level, message: &str) -> Result<()> {
        let line = format!(
            "{} [{}]: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level.as_str(),
            message
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open statetrans.log at {:?}", self.path))?;

        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to statetrans.log at {:?}", self.path))
    }

    pub fn info(&self, message: &str) -> Result<()> {
        self.write(Level::Info, message)
    }

    pub fn warn(&self, message: &str) -> Result<()> {
        self.write(Level::Warn, message)
    }

    pub fn error(&self, message: &str) -> Result<()> {
        self.write(Level::Error, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_newline_delimited_lines_with_level_tag() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetrans-test-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let log = StateLog::new(&path);
        log.info("learning started").unwrap();
        log.warn("unsupported mode transition").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO]: learning started"));
        assert!(lines[1].contains("[WARN]: unsupported mode transition"));

        let _ = std::fs::remove_file(&path);
    }
}
