#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! JSON-lines logging shared by the mission-ops crates.
//!
//! Every record is a single JSON object on its own line so log files can be
//! tailed, grepped, or replayed into analysis tooling without a custom parser.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity level, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Per-tick chatter.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures surfaced to a caller.
    Error,
}

impl LogLevel {
    /// Parses a level name, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the record.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Dotted event name or short message.
    pub message: String,
    /// Extra structured fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches a single metadata field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Thread-safe append-only JSON logger.
///
/// Records below the configured minimum level are dropped before any I/O.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    min_level: LogLevel,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at `path`, accepting every level.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_min_level(path, LogLevel::Debug)
    }

    /// Creates or opens a logger that drops records below `min_level`.
    pub fn with_min_level(path: impl AsRef<Path>, min_level: LogLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            min_level,
            writer: Mutex::new(file),
        })
    }

    /// Whether a record at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Writes a record as one JSON line. Filtered records return `Ok(false)`.
    pub fn log(&self, record: &LogRecord) -> Result<bool> {
        if !self.enabled(record.level) {
            return Ok(false);
        }
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(true)
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines_with_fields() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("ops/engine.log")).unwrap();
        let record = LogRecord::new("alerts", LogLevel::Info, "alerts.raised")
            .with_field("entity_id", "crew-chen");
        assert!(logger.log(&record).unwrap());
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"alerts.raised\""));
        assert!(content.contains("\"entity_id\":\"crew-chen\""));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn drops_records_below_min_level() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::with_min_level(dir.path().join("ops.log"), LogLevel::Warn).unwrap();
        assert!(!logger
            .log(&LogRecord::new("simulator", LogLevel::Debug, "tick"))
            .unwrap());
        assert!(logger
            .log(&LogRecord::new("simulator", LogLevel::Error, "export failed"))
            .unwrap());
        let content = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn parses_level_names() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error > LogLevel::Info);
    }
}
