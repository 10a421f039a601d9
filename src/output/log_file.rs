//! Daily run log: `app-YYYYMMDD.log`, one line per event.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{BOM, TIMESTAMP_FORMAT};
use crate::error::OutputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: NaiveDateTime, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }

    /// `yyyy-MM-dd HH:mm:ss [LEVEL] message`
    pub fn line(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level.as_str(),
            self.message
        )
    }
}

/// Path of the log file that holds entries stamped `timestamp`.
pub fn log_path(log_dir: &Path, timestamp: NaiveDateTime) -> PathBuf {
    log_dir.join(format!("app-{}.log", timestamp.format("%Y%m%d")))
}

/// Append `entry` to its daily file, creating the directory and the file
/// (with a UTF-8 BOM) as needed. Returns the file written.
pub fn append(log_dir: &Path, entry: &LogEntry) -> Result<PathBuf, OutputError> {
    if log_dir.as_os_str().is_empty() {
        return Err(OutputError::EmptyDirectory);
    }
    std::fs::create_dir_all(log_dir)?;

    let path = log_path(log_dir, entry.timestamp);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(BOM.as_bytes())?;
    }
    writeln!(file, "{}", entry.line())?;
    Ok(path)
}
