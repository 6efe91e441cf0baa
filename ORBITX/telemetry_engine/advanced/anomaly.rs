use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    alerts::AlertError,
    helper::{emit, OpsTelemetry},
};

/// Auto action recorded when an operator executes the recommendation.
pub const MANUAL_OVERRIDE_ACTION: &str = "Manual override: Action executed.";

/// Anomaly severity as shown on the spacecraft page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalySeverity {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
}

/// Handling state of an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyStatus {
    /// Needs attention.
    Active,
    /// Contained by an automatic action.
    Mitigated,
    /// Closed.
    Resolved,
}

impl fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "Active",
            Self::Mitigated => "Mitigated",
            Self::Resolved => "Resolved",
        })
    }
}

/// A detected spacecraft anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    /// Identifier, e.g. `ANOM-2025-001`.
    pub id: String,
    /// Spacecraft display name.
    pub spacecraft: String,
    /// Affected subsystem.
    pub subsystem: String,
    /// Anomaly type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Severity.
    pub severity: AnomalySeverity,
    /// Recommended operator action.
    pub recommendation: String,
    /// What the autonomous system did.
    pub auto_action: String,
    /// Handling state.
    pub status: AnomalyStatus,
}

/// Spacecraft anomaly log.
#[derive(Debug, Default)]
pub struct AnomalyLog {
    entries: RwLock<Vec<Anomaly>>,
    telemetry: Option<OpsTelemetry>,
}

impl AnomalyLog {
    /// Creates a log seeded with `entries`.
    #[must_use]
    pub fn new(entries: Vec<Anomaly>, telemetry: Option<OpsTelemetry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            telemetry,
        }
    }

    /// Every anomaly, in recording order.
    #[must_use]
    pub fn all(&self) -> Vec<Anomaly> {
        self.entries.read().clone()
    }

    /// Anomalies for one spacecraft.
    #[must_use]
    pub fn for_spacecraft(&self, spacecraft: &str) -> Vec<Anomaly> {
        self.entries
            .read()
            .iter()
            .filter(|anomaly| anomaly.spacecraft == spacecraft)
            .cloned()
            .collect()
    }

    /// Number of anomalies not yet resolved for `spacecraft`.
    #[must_use]
    pub fn open_count(&self, spacecraft: &str) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|a| a.spacecraft == spacecraft && a.status != AnomalyStatus::Resolved)
            .count()
    }

    /// Operator executes the recommendation: the anomaly becomes Resolved.
    pub fn execute_recommended_action(&self, id: &str) -> Result<Anomaly, AlertError> {
        let updated = {
            let mut entries = self.entries.write();
            let anomaly = entries
                .iter_mut()
                .find(|anomaly| anomaly.id == id)
                .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
            anomaly.status = AnomalyStatus::Resolved;
            anomaly.auto_action = MANUAL_OVERRIDE_ACTION.to_string();
            anomaly.clone()
        };
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "anomaly.action.executed",
            json!({ "anomaly_id": updated.id, "spacecraft": updated.spacecraft }),
        );
        Ok(updated)
    }
}
