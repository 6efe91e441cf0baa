use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, ensure, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::scenario::{ALERT_FEED, CREW_VITALS, DEBRIS, SPACECRAFT, SPACE_WEATHER};

/// Engine configuration, usually read from `engine.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Random-walk seed; absent means a fresh random seed per run.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Tick groups by name.
    #[serde(default = "default_groups")]
    pub groups: IndexMap<String, GroupConfig>,
    /// Alert manager settings.
    #[serde(default)]
    pub alerts: AlertSettings,
    /// Maneuver desk settings.
    #[serde(default)]
    pub maneuver: ManeuverSettings,
    /// Logging and event settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Buffered snapshots per subscriber before it starts lagging.
    #[serde(default = "default_snapshot_capacity")]
    pub snapshot_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            groups: default_groups(),
            alerts: AlertSettings::default(),
            maneuver: ManeuverSettings::default(),
            telemetry: TelemetrySettings::default(),
            snapshot_channel_capacity: default_snapshot_capacity(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a TOML file.
    ///
    /// Groups missing from the file keep their default interval, and a
    /// relative log path is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let mut config = Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if let Some(log_path) = config.telemetry.log_path.as_mut() {
            if log_path.is_relative() {
                let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
                *log_path = base.join(&*log_path);
            }
        }
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        for (name, defaults) in default_groups() {
            config.groups.entry(name).or_insert(defaults);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        for (name, group) in &self.groups {
            if group.interval_ms == 0 {
                bail!("tick group `{name}` has a zero interval");
            }
        }
        ensure!(self.alerts.feed_capacity >= 1, "alerts.feed_capacity must be at least 1");
        ensure!(
            self.snapshot_channel_capacity >= 1,
            "snapshot_channel_capacity must be at least 1"
        );
        ensure!(
            self.telemetry.event_backlog >= 1,
            "telemetry.event_backlog must be at least 1"
        );
        Ok(())
    }

    /// Enabled groups with their periods, in declaration order.
    #[must_use]
    pub fn enabled_groups(&self) -> Vec<(String, Duration)> {
        self.groups
            .iter()
            .filter(|(_, group)| group.enabled)
            .map(|(name, group)| (name.clone(), group.interval()))
            .collect()
    }
}

/// One tick group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Tick period in milliseconds.
    pub interval_ms: u64,
    /// Whether the scheduler starts this group.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl GroupConfig {
    /// Enabled group ticking every `interval_ms`.
    #[must_use]
    pub const fn every(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            enabled: true,
        }
    }

    /// Period as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// `[alerts]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Newest feed entries kept.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// Whether the alert-feed group produces synthetic alerts.
    #[serde(default = "default_true")]
    pub feed_enabled: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            feed_capacity: default_feed_capacity(),
            feed_enabled: true,
        }
    }
}

/// `[maneuver]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManeuverSettings {
    /// Artificial calculation delay in milliseconds.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl Default for ManeuverSettings {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
        }
    }
}

impl ManeuverSettings {
    /// Latency as a [`Duration`].
    #[must_use]
    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// `[telemetry]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// JSON-lines log file; absent disables file logging.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Records below this level are dropped.
    #[serde(default)]
    pub min_level: LogLevel,
    /// Events retained by the in-memory bus.
    #[serde(default = "default_event_backlog")]
    pub event_backlog: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_path: None,
            min_level: LogLevel::default(),
            event_backlog: default_event_backlog(),
        }
    }
}

fn default_groups() -> IndexMap<String, GroupConfig> {
    [
        (CREW_VITALS, 6_000),
        (DEBRIS, 7_000),
        (SPACECRAFT, 8_000),
        (SPACE_WEATHER, 9_000),
        (ALERT_FEED, 30_000),
    ]
    .into_iter()
    .map(|(name, ms)| (name.to_string(), GroupConfig::every(ms)))
    .collect()
}

const fn default_true() -> bool {
    true
}

const fn default_feed_capacity() -> usize {
    10
}

const fn default_latency_ms() -> u64 {
    1_500
}

const fn default_event_backlog() -> usize {
    256
}

const fn default_snapshot_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_dashboard_intervals() {
        let config = EngineConfig::default();
        let groups = config.enabled_groups();
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[0], (CREW_VITALS.to_string(), Duration::from_secs(6)));
        assert_eq!(config.groups[ALERT_FEED].interval_ms, 30_000);
        assert_eq!(config.alerts.feed_capacity, 10);
        assert_eq!(config.maneuver.latency(), Duration::from_millis(1_500));
        assert_eq!(config.telemetry.min_level, LogLevel::Info);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            seed = 7

            [groups.debris]
            interval_ms = 1000

            [groups.space-weather]
            interval_ms = 9000
            enabled = false

            [alerts]
            feed_capacity = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.groups[DEBRIS].interval_ms, 1_000);
        assert_eq!(config.groups[CREW_VITALS].interval_ms, 6_000);
        assert!(!config.groups[SPACE_WEATHER].enabled);
        assert_eq!(config.enabled_groups().len(), 4);
        assert_eq!(config.alerts.feed_capacity, 3);
        assert!(config.alerts.feed_enabled);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(EngineConfig::from_toml("[groups.debris]\ninterval_ms = 0").is_err());
        assert!(EngineConfig::from_toml("[alerts]\nfeed_capacity = 0").is_err());
        assert!(EngineConfig::from_toml("seed = \"many\"").is_err());
    }

    #[test]
    fn load_resolves_log_path_next_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(
            &path,
            "[telemetry]\nlog_path = \"logs/ops.jsonl\"\nmin_level = \"WARN\"\n",
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(
            config.telemetry.log_path,
            Some(dir.path().join("logs/ops.jsonl"))
        );
        assert_eq!(config.telemetry.min_level, LogLevel::Warn);
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn bundled_sample_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/engine.toml");
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.seed, Some(20_250_115));
        assert_eq!(config.enabled_groups().len(), 5);
        assert!(config
            .telemetry
            .log_path
            .as_deref()
            .is_some_and(|log| log.ends_with("logs/orbitx.jsonl")));
    }
}
