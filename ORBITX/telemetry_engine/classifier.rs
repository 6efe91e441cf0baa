//! Threshold-based risk classification.
//!
//! Everything here is a pure function of the metric values passed in; nothing
//! is cached between calls.

use std::{collections::HashMap, fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::registry::{Entity, EntityKind};

/// Ordered severity label. `Nominal < Caution < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Status {
    /// Within the safe band.
    #[default]
    Nominal,
    /// Past the caution threshold.
    Caution,
    /// Past the critical threshold.
    Critical,
}

impl Status {
    /// Dashboard label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Nominal => "Nominal",
            Self::Caution => "Caution",
            Self::Critical => "Critical",
        }
    }

    /// Conjunction risk wording (`Low`, `Medium`, `High`).
    #[must_use]
    pub fn risk_level(self) -> &'static str {
        match self {
            Self::Nominal => "Low",
            Self::Caution => "Medium",
            Self::Critical => "High",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nominal" | "info" | "low" => Ok(Self::Nominal),
            "caution" | "warning" | "medium" => Ok(Self::Caution),
            "critical" | "high" => Ok(Self::Critical),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

/// Which side of a threshold is unsafe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Larger values are worse.
    HigherIsWorse,
    /// Smaller values are worse.
    LowerIsWorse,
    /// Distance from `center` is worse; thresholds are deviations.
    BandIsBest {
        /// Ideal value.
        center: f64,
    },
}

/// Caution/critical limits for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Caution limit (a deviation for band thresholds).
    pub caution_at: f64,
    /// Critical limit (a deviation for band thresholds).
    pub critical_at: f64,
    /// Unsafe side.
    pub direction: Direction,
}

impl Threshold {
    /// Caution at `caution_at` or above, critical at `critical_at` or above.
    #[must_use]
    pub fn higher_is_worse(caution_at: f64, critical_at: f64) -> Self {
        Self {
            caution_at,
            critical_at: critical_at.max(caution_at),
            direction: Direction::HigherIsWorse,
        }
    }

    /// Caution at `caution_at` or below, critical at `critical_at` or below.
    #[must_use]
    pub fn lower_is_worse(caution_at: f64, critical_at: f64) -> Self {
        Self {
            caution_at,
            critical_at: critical_at.min(caution_at),
            direction: Direction::LowerIsWorse,
        }
    }

    /// Caution once `|value - center|` reaches `caution_dev`, critical at `critical_dev`.
    #[must_use]
    pub fn band(center: f64, caution_dev: f64, critical_dev: f64) -> Self {
        let caution_at = caution_dev.abs();
        Self {
            caution_at,
            critical_at: critical_dev.abs().max(caution_at),
            direction: Direction::BandIsBest { center },
        }
    }

    /// Severity of `value` against this threshold.
    #[must_use]
    pub fn severity(&self, value: f64) -> Status {
        let (value, caution, critical) = self.oriented(value);
        if value >= critical {
            Status::Critical
        } else if value >= caution {
            Status::Caution
        } else {
            Status::Nominal
        }
    }

    /// How far `value` has travelled from the caution limit towards the critical
    /// limit, in `[0, 1]`. Zero on the safe side of caution.
    #[must_use]
    pub fn excursion(&self, value: f64) -> f64 {
        let (value, caution, critical) = self.oriented(value);
        if value < caution {
            0.0
        } else if critical <= caution {
            1.0
        } else {
            ((value - caution) / (critical - caution)).clamp(0.0, 1.0)
        }
    }

    /// Maps the comparison onto a "bigger is worse" axis.
    fn oriented(&self, value: f64) -> (f64, f64, f64) {
        match self.direction {
            Direction::HigherIsWorse => (value, self.caution_at, self.critical_at),
            Direction::LowerIsWorse => (-value, -self.caution_at, -self.critical_at),
            Direction::BandIsBest { center } => {
                ((value - center).abs(), self.caution_at, self.critical_at)
            }
        }
    }
}

/// Thresholds for one domain, keyed by metric name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdTable {
    metrics: IndexMap<String, Threshold>,
}

impl ThresholdTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a metric threshold.
    #[must_use]
    pub fn with(mut self, metric: impl Into<String>, threshold: Threshold) -> Self {
        self.metrics.insert(metric.into(), threshold);
        self
    }

    /// Threshold for `metric`.
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<&Threshold> {
        self.metrics.get(metric)
    }

    /// Per-metric severity for every metric of `entity`. Unlisted metrics are nominal.
    #[must_use]
    pub fn metric_severities(&self, entity: &Entity) -> IndexMap<String, Status> {
        entity
            .metrics()
            .iter()
            .map(|(name, metric)| {
                let status = self
                    .get(name)
                    .map_or(Status::Nominal, |t| t.severity(metric.value()));
                (name.clone(), status)
            })
            .collect()
    }
}

/// Threshold tables by entity kind, with optional per-entity overrides.
#[derive(Debug, Clone, Default)]
pub struct ThresholdBook {
    by_kind: HashMap<EntityKind, ThresholdTable>,
    by_entity: HashMap<String, ThresholdTable>,
}

impl ThresholdBook {
    /// Empty book; every entity classifies as nominal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table for an entity kind.
    #[must_use]
    pub fn with_kind(mut self, kind: EntityKind, table: ThresholdTable) -> Self {
        self.by_kind.insert(kind, table);
        self
    }

    /// Sets a table that replaces the kind table for one entity.
    #[must_use]
    pub fn with_entity(mut self, entity_id: impl Into<String>, table: ThresholdTable) -> Self {
        self.by_entity.insert(entity_id.into(), table);
        self
    }

    /// Table applying to `entity`.
    #[must_use]
    pub fn table_for(&self, entity: &Entity) -> Option<&ThresholdTable> {
        self.by_entity
            .get(entity.id())
            .or_else(|| self.by_kind.get(&entity.kind()))
    }
}

/// Result of classifying one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Worst metric severity.
    pub status: Status,
    /// Severity per metric, in the entity's metric order.
    pub metrics: IndexMap<String, Status>,
    /// Display-only composite in `[0, 100]`; crew members only.
    pub risk_score: Option<u8>,
}

impl Assessment {
    /// Metrics at or above `floor`, in metric order.
    pub fn breaches(&self, floor: Status) -> impl Iterator<Item = (&str, Status)> + '_ {
        self.metrics
            .iter()
            .filter(move |(_, status)| **status >= floor)
            .map(|(name, status)| (name.as_str(), *status))
    }
}

/// Pure classifier over a [`ThresholdBook`].
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    book: ThresholdBook,
}

/// Crew vitals and their weight in the risk score.
const CREW_RISK_WEIGHTS: [(&str, f64); 5] = [
    ("heart_rate", 0.2),
    ("temperature", 0.25),
    ("oxygen_saturation", 0.25),
    ("radiation_dose", 0.2),
    ("respiration_rate", 0.1),
];

impl RiskClassifier {
    /// Creates a classifier.
    #[must_use]
    pub fn new(book: ThresholdBook) -> Self {
        Self { book }
    }

    /// Worst severity across the entity's metrics.
    #[must_use]
    pub fn classify(&self, entity: &Entity) -> Status {
        self.book.table_for(entity).map_or(Status::Nominal, |table| {
            entity
                .metrics()
                .iter()
                .filter_map(|(name, metric)| table.get(name).map(|t| t.severity(metric.value())))
                .max()
                .unwrap_or_default()
        })
    }

    /// Full assessment including per-metric severities and the crew risk score.
    #[must_use]
    pub fn assess(&self, entity: &Entity) -> Assessment {
        let table = self.book.table_for(entity);
        let metrics = table.map_or_else(
            || {
                entity
                    .metrics()
                    .keys()
                    .map(|name| (name.clone(), Status::Nominal))
                    .collect()
            },
            |table| table.metric_severities(entity),
        );
        let status = metrics.values().copied().max().unwrap_or_default();
        let risk_score = match (entity.kind(), table) {
            (EntityKind::Crew, Some(table)) => Some(crew_risk_score(entity, table)),
            (EntityKind::Crew, None) => Some(10),
            _ => None,
        };
        Assessment {
            status,
            metrics,
            risk_score,
        }
    }
}

/// Weighted crew risk score: `round(10 + 90 * weighted excursion)`.
#[must_use]
pub fn crew_risk_score(entity: &Entity, table: &ThresholdTable) -> u8 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (name, weight) in CREW_RISK_WEIGHTS {
        if let (Some(metric), Some(threshold)) = (entity.metric(name), table.get(name)) {
            weighted += weight * threshold.excursion(metric.value());
            total_weight += weight;
        }
    }
    let score = if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = (10.0 + 90.0 * score).round().clamp(0.0, 100.0) as u8;
    rounded
}
