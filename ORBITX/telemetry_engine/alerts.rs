//! Alert lifecycle: derived threshold alerts plus a capped manual feed.
//!
//! Alerts are Open until acknowledged and disappear when dismissed. Derived
//! alerts are keyed by `(entity, condition)` so repeated ticks never duplicate
//! them; they escalate in place and are never cleared automatically.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    classifier::Status,
    helper::{emit, OpsTelemetry},
    registry::{EntitySnapshot, RegistrySnapshot},
};

/// Entity id used for alerts not tied to a tracked entity.
pub const MISSION_CONTROL: &str = "mission-control";

/// Alert manager failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// The id is unknown or the alert was already dismissed.
    #[error("alert not found: {0}")]
    NotFound(String),
}

/// Where an alert came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrigin {
    /// Raised by threshold reconciliation.
    Derived,
    /// Raised manually or by the synthetic feed.
    Feed,
}

/// Lifecycle state, derived from the timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertState {
    /// Not yet acknowledged.
    Open,
    /// Acknowledged by an operator.
    Acknowledged,
    /// Dismissed; terminal.
    Dismissed,
}

/// One alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id.
    pub id: String,
    /// Entity the alert concerns.
    pub entity_id: String,
    /// Condition key, e.g. `threshold:heart_rate`.
    pub condition_kind: String,
    /// Current severity.
    pub severity: Status,
    /// Short headline.
    pub title: String,
    /// Operator-facing text.
    pub message: String,
    /// Free-text origin label.
    pub source: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// When dismissed. Only ever set on the copy returned by a dismissal.
    pub dismissed_at: Option<DateTime<Utc>>,
    /// Which store holds the alert.
    pub origin: AlertOrigin,
    #[serde(skip)]
    sequence: u64,
}

impl Alert {
    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> AlertState {
        if self.dismissed_at.is_some() {
            AlertState::Dismissed
        } else if self.acknowledged_at.is_some() {
            AlertState::Acknowledged
        } else {
            AlertState::Open
        }
    }

    /// Whether the alert passes `filter`.
    #[must_use]
    pub fn matches(&self, filter: AlertFilter) -> bool {
        match filter {
            AlertFilter::All => true,
            AlertFilter::Unacknowledged => self.acknowledged_at.is_none(),
            AlertFilter::Critical => self.severity == Status::Critical,
        }
    }

    fn summary_json(&self) -> Value {
        json!({
            "id": self.id,
            "entity_id": self.entity_id,
            "condition_kind": self.condition_kind,
            "severity": self.severity,
        })
    }
}

/// List filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFilter {
    /// Every active alert.
    #[default]
    All,
    /// Alerts without an acknowledgement.
    Unacknowledged,
    /// Critical alerts.
    Critical,
}

impl FromStr for AlertFilter {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "unacknowledged" | "unack" | "open" => Ok(Self::Unacknowledged),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown alert filter `{other}`")),
        }
    }
}

impl fmt::Display for AlertFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Unacknowledged => "unacknowledged",
            Self::Critical => "critical",
        })
    }
}

/// Counts behind the filter buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    /// Active alerts.
    pub all: usize,
    /// Active alerts without an acknowledgement.
    pub unacknowledged: usize,
    /// Active critical alerts.
    pub critical: usize,
}

/// Parameters for a manually raised alert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    entity_id: String,
    condition_kind: String,
    severity: Status,
    title: String,
    message: String,
    source: String,
    created_at: Option<DateTime<Utc>>,
}

impl NewAlert {
    /// Alert with the message doubling as title and `Mission Control` as source.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        condition_kind: impl Into<String>,
        severity: Status,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            entity_id: entity_id.into(),
            condition_kind: condition_kind.into(),
            severity,
            title: message.clone(),
            message,
            source: "Mission Control".into(),
            created_at: None,
        }
    }

    /// Sets the headline.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the source label.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Backdates the alert (used when seeding history).
    #[must_use]
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

#[derive(Debug, Default)]
struct AlertBook {
    derived: IndexMap<String, Alert>,
    derived_keys: HashMap<(String, String), String>,
    feed: VecDeque<Alert>,
    sequence: u64,
}

impl AlertBook {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Alert> {
        if let Some(alert) = self.derived.get_mut(id) {
            return Some(alert);
        }
        self.feed.iter_mut().find(|alert| alert.id == id)
    }

    fn active(&self) -> impl Iterator<Item = &Alert> + '_ {
        self.derived.values().chain(self.feed.iter())
    }
}

/// Owns every active alert.
#[derive(Debug)]
pub struct AlertManager {
    book: RwLock<AlertBook>,
    feed_capacity: usize,
    telemetry: Option<OpsTelemetry>,
}

impl AlertManager {
    /// Creates an empty manager keeping at most `feed_capacity` feed entries.
    #[must_use]
    pub fn new(feed_capacity: usize, telemetry: Option<OpsTelemetry>) -> Self {
        Self {
            book: RwLock::new(AlertBook::default()),
            feed_capacity: feed_capacity.max(1),
            telemetry,
        }
    }

    /// Feed retention cap.
    #[must_use]
    pub fn feed_capacity(&self) -> usize {
        self.feed_capacity
    }

    /// Brings derived alerts in line with a snapshot.
    ///
    /// Every metric at Caution or worse gets exactly one active alert. Existing
    /// alerts only ever escalate. Returns the number of alerts created.
    pub fn reconcile(&self, snapshot: &RegistrySnapshot) -> usize {
        let mut raised = Vec::new();
        let mut escalated = Vec::new();
        {
            let mut book = self.book.write();
            for entity in &snapshot.entities {
                for (metric, &severity) in &entity.metric_status {
                    if severity < Status::Caution {
                        continue;
                    }
                    let condition = format!("threshold:{metric}");
                    let key = (entity.id.clone(), condition.clone());
                    let message = describe(entity, metric, severity);
                    if let Some(id) = book.derived_keys.get(&key).cloned() {
                        if let Some(alert) = book.derived.get_mut(&id) {
                            if severity > alert.severity {
                                alert.severity = severity;
                                alert.message = message;
                                escalated.push(alert.summary_json());
                            }
                            continue;
                        }
                    }
                    let sequence = book.next_sequence();
                    let alert = Alert {
                        id: format!("alert-{}", Uuid::new_v4()),
                        entity_id: entity.id.clone(),
                        condition_kind: condition,
                        severity,
                        title: format!("{} {}", entity.name, metric.replace('_', " ")),
                        message,
                        source: entity.group.clone(),
                        created_at: Utc::now(),
                        acknowledged_at: None,
                        dismissed_at: None,
                        origin: AlertOrigin::Derived,
                        sequence,
                    };
                    raised.push(alert.summary_json());
                    book.derived_keys.insert(key, alert.id.clone());
                    book.derived.insert(alert.id.clone(), alert);
                }
            }
        }
        let count = raised.len();
        for payload in raised {
            emit(self.telemetry.as_ref(), LogLevel::Warn, "alerts.raised", payload);
        }
        for payload in escalated {
            emit(self.telemetry.as_ref(), LogLevel::Warn, "alerts.escalated", payload);
        }
        count
    }

    /// Adds a feed alert, dropping the oldest entries past the cap.
    pub fn raise(&self, request: NewAlert) -> Alert {
        let alert = {
            let mut book = self.book.write();
            let sequence = book.next_sequence();
            let alert = Alert {
                id: format!("alert-{}", Uuid::new_v4()),
                entity_id: request.entity_id,
                condition_kind: request.condition_kind,
                severity: request.severity,
                title: request.title,
                message: request.message,
                source: request.source,
                created_at: request.created_at.unwrap_or_else(Utc::now),
                acknowledged_at: None,
                dismissed_at: None,
                origin: AlertOrigin::Feed,
                sequence,
            };
            book.feed.push_front(alert.clone());
            book.feed.truncate(self.feed_capacity);
            alert
        };
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "alerts.raised",
            alert.summary_json(),
        );
        alert
    }

    /// Raises one synthetic feed alert.
    ///
    /// `r1 > 0.7` gives Critical, otherwise `r2 > 0.5` gives Caution, otherwise Nominal.
    pub fn synthesize_feed_alert<R: Rng>(&self, rng: &mut R) -> Alert {
        let severity = if rng.gen::<f64>() > 0.7 {
            Status::Critical
        } else if rng.gen::<f64>() > 0.5 {
            Status::Caution
        } else {
            Status::Nominal
        };
        self.raise(
            NewAlert::new(
                MISSION_CONTROL,
                "feed:system-update",
                severity,
                "New telemetry data received from orbital sensors.",
            )
            .title("System Update"),
        )
    }

    /// Marks an alert acknowledged. Acknowledging twice keeps the first timestamp.
    pub fn acknowledge(&self, id: &str) -> Result<Alert, AlertError> {
        let (alert, changed) = {
            let mut book = self.book.write();
            let alert = book
                .find_mut(id)
                .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
            let changed = alert.acknowledged_at.is_none();
            if changed {
                alert.acknowledged_at = Some(Utc::now());
            }
            (alert.clone(), changed)
        };
        if changed {
            emit(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "alerts.acknowledged",
                alert.summary_json(),
            );
        }
        Ok(alert)
    }

    /// Removes an alert, returning it with `dismissed_at` set.
    pub fn dismiss(&self, id: &str) -> Result<Alert, AlertError> {
        let mut alert = {
            let mut book = self.book.write();
            if let Some(alert) = book.derived.shift_remove(id) {
                book.derived_keys
                    .remove(&(alert.entity_id.clone(), alert.condition_kind.clone()));
                alert
            } else {
                let index = book
                    .feed
                    .iter()
                    .position(|alert| alert.id == id)
                    .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
                book.feed
                    .remove(index)
                    .ok_or_else(|| AlertError::NotFound(id.to_string()))?
            }
        };
        alert.dismissed_at = Some(Utc::now());
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "alerts.dismissed",
            alert.summary_json(),
        );
        Ok(alert)
    }

    /// Looks up an active alert.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Alert> {
        self.book.read().active().find(|alert| alert.id == id).cloned()
    }

    /// Active alerts passing `filter`, newest first.
    #[must_use]
    pub fn list(&self, filter: AlertFilter) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .book
            .read()
            .active()
            .filter(|alert| alert.matches(filter))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        alerts
    }

    /// Filter counters.
    #[must_use]
    pub fn summary(&self) -> AlertSummary {
        self.book
            .read()
            .active()
            .fold(AlertSummary::default(), |mut summary, alert| {
                summary.all += 1;
                if alert.matches(AlertFilter::Unacknowledged) {
                    summary.unacknowledged += 1;
                }
                if alert.matches(AlertFilter::Critical) {
                    summary.critical += 1;
                }
                summary
            })
    }
}

fn describe(entity: &EntitySnapshot, metric: &str, severity: Status) -> String {
    let reading = entity.metrics.get(metric).map_or_else(String::new, |m| {
        format!(" at {:.2} {}", m.value(), m.unit).trim_end().to_string()
    });
    format!(
        "{}: {}{} is {}",
        entity.name,
        metric.replace('_', " "),
        reading,
        severity.label()
    )
}
