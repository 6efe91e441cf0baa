use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    classifier::{RiskClassifier, Status},
    metric::Metric,
};

/// Errors raised by registry lookups and registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No entity with this id.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// An entity with this id is already registered.
    #[error("entity already registered: {0}")]
    DuplicateEntity(String),
    /// No entity belongs to this tick group.
    #[error("unknown tick group: {0}")]
    UnknownGroup(String),
}

/// What an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Crew member vitals.
    Crew,
    /// Spacecraft subsystems (including station life support).
    Spacecraft,
    /// Asset protected during space-weather events.
    Asset,
    /// Predicted close approach between two tracked objects.
    ConjunctionEvent,
    /// Space-weather sensor or index feed.
    SensorNode,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Crew => "crew",
            Self::Spacecraft => "spacecraft",
            Self::Asset => "asset",
            Self::ConjunctionEvent => "conjunction_event",
            Self::SensorNode => "sensor_node",
        };
        f.write_str(label)
    }
}

/// A named thing owning a set of drifting metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    id: String,
    name: String,
    kind: EntityKind,
    group: String,
    labels: IndexMap<String, String>,
    metrics: IndexMap<String, Metric>,
    derived_status: Status,
}

impl Entity {
    /// Creates an entity owned by tick group `group`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: EntityKind,
        group: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            group: group.into(),
            labels: IndexMap::new(),
            metrics: IndexMap::new(),
            derived_status: Status::Nominal,
        }
    }

    /// Adds a static descriptive label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds a metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, metric: Metric) -> Self {
        self.metrics.insert(name.into(), metric);
        self
    }

    /// Identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Owning tick group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Static labels.
    #[must_use]
    pub fn labels(&self) -> &IndexMap<String, String> {
        &self.labels
    }

    /// Label value, or `""`.
    #[must_use]
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map_or("", String::as_str)
    }

    /// Metrics in registration order.
    #[must_use]
    pub fn metrics(&self) -> &IndexMap<String, Metric> {
        &self.metrics
    }

    /// Single metric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Current value of a metric.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).map(Metric::value)
    }

    /// Status cached after the last tick.
    #[must_use]
    pub fn derived_status(&self) -> Status {
        self.derived_status
    }
}

/// Immutable per-entity view inside a [`RegistrySnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Kind.
    pub kind: EntityKind,
    /// Owning tick group.
    pub group: String,
    /// Static labels.
    pub labels: IndexMap<String, String>,
    /// Metric values at snapshot time.
    pub metrics: IndexMap<String, Metric>,
    /// Worst metric severity.
    pub status: Status,
    /// Severity per metric.
    pub metric_status: IndexMap<String, Status>,
    /// Crew risk score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
}

impl EntitySnapshot {
    fn capture(entity: &Entity, classifier: &RiskClassifier) -> Self {
        let assessment = classifier.assess(entity);
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            kind: entity.kind,
            group: entity.group.clone(),
            labels: entity.labels.clone(),
            metrics: entity.metrics.clone(),
            status: assessment.status,
            metric_status: assessment.metrics,
            risk_score: assessment.risk_score,
        }
    }

    /// Current value of a metric, or `0.0` when absent.
    #[must_use]
    pub fn value(&self, name: &str) -> f64 {
        self.metrics.get(name).map_or(0.0, Metric::value)
    }

    /// Label value, or `""`.
    #[must_use]
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map_or("", String::as_str)
    }
}

/// Point-in-time read of every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Global tick sequence number at snapshot time.
    pub tick: u64,
    /// Group whose tick produced this snapshot, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Entities in registration order.
    pub entities: Vec<EntitySnapshot>,
}

impl RegistrySnapshot {
    /// Looks up an entity.
    #[must_use]
    pub fn entity(&self, id: &str) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    /// Entities of one kind, in registration order.
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntitySnapshot> + '_ {
        self.entities.iter().filter(move |entity| entity.kind == kind)
    }

    /// Copy containing only `id` (empty when absent).
    #[must_use]
    pub fn only(&self, id: &str) -> Self {
        Self {
            taken_at: self.taken_at,
            tick: self.tick,
            group: self.group.clone(),
            entities: self.entity(id).cloned().into_iter().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entities: IndexMap<String, Entity>,
    group_ticks: IndexMap<String, u64>,
    tick: u64,
}

/// Owner of all entity state.
///
/// Only the simulator writes metric values (through [`EntityRegistry::apply_group`])
/// and only the classifier writes the cached status.
#[derive(Debug)]
pub struct EntityRegistry {
    state: RwLock<RegistryState>,
    classifier: RiskClassifier,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(classifier: RiskClassifier) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            classifier,
        }
    }

    /// Registers an entity and classifies it.
    pub fn register(&self, mut entity: Entity) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if state.entities.contains_key(&entity.id) {
            return Err(RegistryError::DuplicateEntity(entity.id));
        }
        entity.derived_status = self.classifier.classify(&entity);
        state.group_ticks.entry(entity.group.clone()).or_insert(0);
        state.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Classifier used for snapshots.
    #[must_use]
    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().entities.contains_key(id)
    }

    /// Clone of one entity.
    #[must_use]
    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.state.read().entities.get(id).cloned()
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Groups that own at least one entity, in first-registration order.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.state.read().group_ticks.keys().cloned().collect()
    }

    /// Ticks applied to `group` so far.
    #[must_use]
    pub fn group_ticks(&self, group: &str) -> Option<u64> {
        self.state.read().group_ticks.get(group).copied()
    }

    /// Applies one tick to every entity in `group`.
    ///
    /// `next` sees the pre-tick entity and returns its new metric values. All
    /// values are computed before any is written, and the write lock is held
    /// throughout, so readers observe either the whole tick or none of it.
    /// Returns the new global tick number.
    pub fn apply_group<F>(&self, group: &str, mut next: F) -> Result<u64, RegistryError>
    where
        F: FnMut(&Entity) -> IndexMap<String, f64>,
    {
        let mut state = self.state.write();
        if !state.group_ticks.contains_key(group) {
            return Err(RegistryError::UnknownGroup(group.to_string()));
        }
        let updates: Vec<(String, IndexMap<String, f64>)> = state
            .entities
            .values()
            .filter(|entity| entity.group == group)
            .map(|entity| (entity.id.clone(), next(entity)))
            .collect();
        for (id, values) in updates {
            if let Some(entity) = state.entities.get_mut(&id) {
                for (name, value) in values {
                    if let Some(metric) = entity.metrics.get_mut(&name) {
                        metric.set(value);
                    }
                }
                entity.derived_status = self.classifier.classify(entity);
            }
        }
        if let Some(count) = state.group_ticks.get_mut(group) {
            *count += 1;
        }
        state.tick += 1;
        Ok(state.tick)
    }

    /// Consistent snapshot of every entity, classified from current values.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot_for(None)
    }

    /// Snapshot tagged with the group that triggered it.
    #[must_use]
    pub fn snapshot_for(&self, group: Option<&str>) -> RegistrySnapshot {
        let state = self.state.read();
        RegistrySnapshot {
            taken_at: Utc::now(),
            tick: state.tick,
            group: group.map(str::to_string),
            entities: state
                .entities
                .values()
                .map(|entity| EntitySnapshot::capture(entity, &self.classifier))
                .collect(),
        }
    }

    /// Shared-pointer snapshot for fan-out.
    #[must_use]
    pub fn shared_snapshot(&self, group: Option<&str>) -> Arc<RegistrySnapshot> {
        Arc::new(self.snapshot_for(group))
    }
}
