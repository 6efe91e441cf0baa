use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    helper::{emit, random_seed, seeded_rng, OpsTelemetry},
    metric::Metric,
    registry::{Entity, EntityRegistry, RegistryError},
};

/// Produces the next raw value for a metric.
///
/// The simulator clamps whatever comes back, so a real data-feed adapter can
/// implement this without knowing the bounds.
pub trait ValueSource: Send {
    /// Next value for `metric`.
    fn next(&mut self, metric: &Metric) -> f64;
}

/// Bounded random walk: `value + uniform(-step, +step)`.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    rng: SmallRng,
}

impl RandomWalk {
    /// Reproducible walk.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: seeded_rng(seed),
        }
    }
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self::seeded(random_seed())
    }
}

impl ValueSource for RandomWalk {
    fn next(&mut self, metric: &Metric) -> f64 {
        if metric.is_static() {
            return metric.value();
        }
        // Metrics built by hand or deserialized may carry any step.
        let step = metric.max_step_per_tick.abs();
        let step = if step.is_finite() { step } else { f64::MAX };
        metric.value() + step * self.rng.gen_range(-1.0_f64..=1.0)
    }
}

/// Source that repeats the current value; a frozen feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldSource;

impl ValueSource for HoldSource {
    fn next(&mut self, metric: &Metric) -> f64 {
        metric.value()
    }
}

/// Computes clamped next values for every metric of `entity`.
pub fn advance(entity: &Entity, source: &mut dyn ValueSource) -> IndexMap<String, f64> {
    entity
        .metrics()
        .iter()
        .map(|(name, metric)| {
            let raw = source.next(metric);
            let next = if raw.is_nan() {
                metric.value()
            } else {
                metric.clamp(raw)
            };
            (name.clone(), next)
        })
        .collect()
}

/// Summary of one group tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Group that ticked.
    pub group: String,
    /// Global tick number after the tick.
    pub tick: u64,
}

/// Advances metric values group by group.
pub struct TelemetrySimulator {
    registry: Arc<EntityRegistry>,
    source: Mutex<Box<dyn ValueSource>>,
    telemetry: Option<OpsTelemetry>,
}

impl TelemetrySimulator {
    /// Creates a simulator drawing values from `source`.
    #[must_use]
    pub fn new(
        registry: Arc<EntityRegistry>,
        source: Box<dyn ValueSource>,
        telemetry: Option<OpsTelemetry>,
    ) -> Self {
        Self {
            registry,
            source: Mutex::new(source),
            telemetry,
        }
    }

    /// Replaces the value source (e.g. swapping the random walk for a live feed).
    pub fn set_source(&self, source: Box<dyn ValueSource>) {
        *self.source.lock() = source;
    }

    /// Applies one tick to every entity in `group`.
    pub fn tick(&self, group: &str) -> Result<TickReport, RegistryError> {
        let mut source = self.source.lock();
        let tick = self
            .registry
            .apply_group(group, |entity| advance(entity, &mut **source))?;
        drop(source);
        emit(
            self.telemetry.as_ref(),
            LogLevel::Debug,
            "telemetry.tick.completed",
            json!({ "group": group, "tick": tick }),
        );
        Ok(TickReport {
            group: group.to_string(),
            tick,
        })
    }
}
