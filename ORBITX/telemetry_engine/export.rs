//! CSV and JSON exports.
//!
//! Every function here reads a snapshot and returns text; nothing touches
//! engine state. Header text and column order are fixed.

use std::{fmt, fs, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    advanced::anomaly::Anomaly,
    alerts::Alert,
    registry::{EntityKind, EntitySnapshot, RegistrySnapshot},
};

/// Crew table header.
pub const CREW_HEADER: &str = "Name,Role,Status,Risk Score,Heart Rate (bpm),Blood Pressure,Temperature (°C),O2 Saturation (%),Radiation (mSv)";

/// Conjunction table header.
pub const CONJUNCTION_HEADER: &str =
    "ID,PrimaryObject,SecondaryObject,RiskLevel,TimeToCA,MissDistance(m),Probability";

const ROW_END: &str = "\r\n";

/// Export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Writing the output failed.
    #[error("export i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding failed.
    #[error("export serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The requested entity is absent or has the wrong kind.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// Unsupported format or table name.
    #[error("unsupported export: {0}")]
    Format(String),
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values.
    Csv,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(ExportError::Format(format!("format `{other}`"))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Json => "json",
        })
    }
}

/// CSV tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTable {
    /// Crew vitals.
    Crew,
    /// Conjunction events.
    Conjunctions,
}

impl ExportTable {
    /// Download file name the dashboard used.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Crew => "crew_health_data.csv",
            Self::Conjunctions => "conjunction_events.csv",
        }
    }
}

impl FromStr for ExportTable {
    type Err = ExportError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "crew" => Ok(Self::Crew),
            "conjunctions" | "conjunction" | "debris" => Ok(Self::Conjunctions),
            other => Err(ExportError::Format(format!("table `{other}`"))),
        }
    }
}

/// Renders one CSV table.
#[must_use]
pub fn table_csv(snapshot: &RegistrySnapshot, table: ExportTable) -> String {
    match table {
        ExportTable::Crew => crew_csv(snapshot),
        ExportTable::Conjunctions => conjunctions_csv(snapshot),
    }
}

/// Crew vitals table. The header ends in `\n`, rows in `\r\n`.
#[must_use]
pub fn crew_csv(snapshot: &RegistrySnapshot) -> String {
    let mut out = format!("{CREW_HEADER}\n");
    for crew in snapshot.of_kind(EntityKind::Crew) {
        let row = [
            crew.name.clone(),
            crew.label("role").to_string(),
            crew.status.label().to_string(),
            crew.risk_score.map(|score| score.to_string()).unwrap_or_default(),
            crew.value("heart_rate").to_string(),
            format!("\"{}\"", crew.label("blood_pressure")),
            crew.value("temperature").to_string(),
            crew.value("oxygen_saturation").to_string(),
            crew.value("radiation_dose").to_string(),
        ];
        out.push_str(&row.join(","));
        out.push_str(ROW_END);
    }
    out
}

/// Conjunction events table.
#[must_use]
pub fn conjunctions_csv(snapshot: &RegistrySnapshot) -> String {
    let mut out = format!("{CONJUNCTION_HEADER}\n");
    for event in snapshot.of_kind(EntityKind::ConjunctionEvent) {
        let row = [
            event.id.clone(),
            event.label("primary").to_string(),
            event.label("secondary").to_string(),
            event.status.risk_level().to_string(),
            event.label("time_to_ca").to_string(),
            format!("{:.0}", event.value("miss_distance")),
            event.value("probability").to_string(),
        ];
        out.push_str(&row.join(","));
        out.push_str(ROW_END);
    }
    out
}

#[derive(Serialize)]
struct TelemetryExport<'a> {
    spacecraft: &'a str,
    telemetry: IndexMap<String, Map<String, Value>>,
    anomalies: &'a [Anomaly],
}

/// Per-spacecraft telemetry export.
///
/// Metrics and labels named `<subsystem>.<field>` are grouped under their
/// subsystem; unprefixed ones are left out.
pub fn telemetry_json(
    snapshot: &RegistrySnapshot,
    spacecraft_id: &str,
    anomalies: &[Anomaly],
) -> Result<String, ExportError> {
    let craft = snapshot
        .entity(spacecraft_id)
        .filter(|entity| entity.kind == EntityKind::Spacecraft)
        .ok_or_else(|| ExportError::UnknownEntity(spacecraft_id.to_string()))?;
    let export = TelemetryExport {
        spacecraft: &craft.name,
        telemetry: subsystems(craft),
        anomalies,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

fn subsystems(craft: &EntitySnapshot) -> IndexMap<String, Map<String, Value>> {
    let mut groups: IndexMap<String, Map<String, Value>> = IndexMap::new();
    for (name, metric) in &craft.metrics {
        if let Some((subsystem, field)) = name.split_once('.') {
            groups
                .entry(subsystem.to_string())
                .or_default()
                .insert(field.to_string(), Value::from(metric.value()));
        }
    }
    for (name, text) in &craft.labels {
        if let Some((subsystem, field)) = name.split_once('.') {
            groups
                .entry(subsystem.to_string())
                .or_default()
                .insert(field.to_string(), Value::from(text.as_str()));
        }
    }
    groups
}

#[derive(Serialize)]
struct SnapshotExport<'a> {
    taken_at: DateTime<Utc>,
    tick: u64,
    entities: &'a [EntitySnapshot],
    alerts: &'a [Alert],
}

/// Full snapshot: every entity plus the active alerts.
pub fn snapshot_json(snapshot: &RegistrySnapshot, alerts: &[Alert]) -> Result<String, ExportError> {
    let export = SnapshotExport {
        taken_at: snapshot.taken_at,
        tick: snapshot.tick,
        entities: &snapshot.entities,
        alerts,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

/// Writes rendered export text to `path`.
pub fn write_export(path: impl AsRef<Path>, contents: &str) -> Result<(), ExportError> {
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        advanced::anomaly::{AnomalySeverity, AnomalyStatus},
        classifier::{RiskClassifier, Threshold, ThresholdBook, ThresholdTable},
        metric::Metric,
        registry::{Entity, EntityRegistry},
    };
    use tempfile::tempdir;

    fn snapshot() -> RegistrySnapshot {
        let book = ThresholdBook::new()
            .with_kind(
                EntityKind::Crew,
                ThresholdTable::new()
                    .with("heart_rate", Threshold::band(75.0, 15.0, 25.0))
                    .with("temperature", Threshold::higher_is_worse(37.2, 37.8)),
            )
            .with_kind(
                EntityKind::ConjunctionEvent,
                ThresholdTable::new().with("miss_distance", Threshold::lower_is_worse(150.0, 100.0)),
            );
        let registry = EntityRegistry::new(RiskClassifier::new(book));
        registry
            .register(
                Entity::new("crew-chen", "Commander Sarah Chen", EntityKind::Crew, "crew-vitals")
                    .with_label("role", "Mission Commander")
                    .with_label("blood_pressure", "118/76")
                    .with_metric("heart_rate", Metric::new(72.0, 60.0, 100.0, 2.0, "bpm"))
                    .with_metric("temperature", Metric::new(36.8, 35.5, 39.0, 0.1, "°C"))
                    .with_metric("oxygen_saturation", Metric::new(98.0, 90.0, 100.0, 0.5, "%"))
                    .with_metric("radiation_dose", Metric::new(0.45, 0.1, 1.0, 0.01, "mSv")),
            )
            .unwrap();
        registry
            .register(
                Entity::new("CONJ-2025-001", "NOAA-20 conjunction", EntityKind::ConjunctionEvent, "debris")
                    .with_label("primary", "NOAA-20")
                    .with_label("secondary", "Debris Fragment 47291")
                    .with_label("time_to_ca", "14h 23m")
                    .with_metric("miss_distance", Metric::new(127.4, 50.0, 500.0, 5.0, "m"))
                    .with_metric("probability", Metric::new(0.00012, 1e-6, 1e-3, 5e-6, "")),
            )
            .unwrap();
        registry
            .register(
                Entity::new("sc-sentinel-2a", "Sentinel-2A", EntityKind::Spacecraft, "spacecraft")
                    .with_label("type", "Earth Observation")
                    .with_label("power.charging_status", "Charging")
                    .with_metric("health", Metric::new(98.0, 85.0, 99.0, 1.0, "%"))
                    .with_metric("power.battery_level", Metric::new(93.0, 85.0, 100.0, 1.5, "%"))
                    .with_metric("thermal.cpu_temperature", Metric::new(42.0, 35.0, 50.0, 1.0, "°C")),
            )
            .unwrap();
        registry.snapshot()
    }

    #[test]
    fn crew_csv_matches_dashboard_layout() {
        let csv = crew_csv(&snapshot());
        assert_eq!(
            csv,
            "Name,Role,Status,Risk Score,Heart Rate (bpm),Blood Pressure,Temperature (°C),O2 Saturation (%),Radiation (mSv)\n\
             Commander Sarah Chen,Mission Commander,Nominal,10,72,\"118/76\",36.8,98,0.45\r\n"
        );
    }

    #[test]
    fn conjunction_csv_rounds_miss_distance() {
        let csv = conjunctions_csv(&snapshot());
        let mut lines = csv.split('\n');
        assert_eq!(lines.next(), Some(CONJUNCTION_HEADER));
        assert_eq!(
            lines.next(),
            Some("CONJ-2025-001,NOAA-20,Debris Fragment 47291,Medium,14h 23m,127,0.00012\r")
        );
    }

    #[test]
    fn telemetry_json_groups_by_subsystem() {
        let anomalies = vec![Anomaly {
            id: "ANOM-2025-001".into(),
            spacecraft: "Sentinel-2A".into(),
            subsystem: "Power".into(),
            kind: "Battery Temp Rise".into(),
            severity: AnomalySeverity::Medium,
            recommendation: "Reduce power consumption, activate thermal management.".into(),
            auto_action: "Thermal control activated".into(),
            status: AnomalyStatus::Mitigated,
        }];
        let text = telemetry_json(&snapshot(), "sc-sentinel-2a", &anomalies).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["spacecraft"], "Sentinel-2A");
        assert_eq!(value["telemetry"]["power"]["battery_level"], 93.0);
        assert_eq!(value["telemetry"]["power"]["charging_status"], "Charging");
        assert_eq!(value["telemetry"]["thermal"]["cpu_temperature"], 42.0);
        assert!(value["telemetry"].get("health").is_none());
        assert_eq!(value["anomalies"][0]["type"], "Battery Temp Rise");
        assert_eq!(value["anomalies"][0]["status"], "Mitigated");
        assert!(text.contains("\n  \"spacecraft\""));

        assert!(matches!(
            telemetry_json(&snapshot(), "crew-chen", &anomalies),
            Err(ExportError::UnknownEntity(_))
        ));
    }

    #[test]
    fn snapshot_json_carries_entities_and_alerts() {
        let text = snapshot_json(&snapshot(), &[]).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["entities"].as_array().map(Vec::len), Some(3));
        assert_eq!(value["entities"][1]["metric_status"]["miss_distance"], "Caution");
        assert!(value["alerts"].as_array().is_some_and(Vec::is_empty));
    }

    #[test]
    fn write_failures_surface_as_io_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crew.csv");
        write_export(&path, "x").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x");

        let missing = dir.path().join("no-such-dir").join("crew.csv");
        assert!(matches!(write_export(&missing, "x"), Err(ExportError::Io(_))));
    }

    #[test]
    fn parses_format_and_table_names() {
        assert!(matches!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv)));
        assert!(matches!("conjunctions".parse::<ExportTable>(), Ok(ExportTable::Conjunctions)));
        assert!(matches!("xml".parse::<ExportFormat>(), Err(ExportError::Format(_))));
    }
}
