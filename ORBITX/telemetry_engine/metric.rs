use serde::{Deserialize, Serialize};

/// A bounded scalar that drifts once per tick.
///
/// `min <= value <= max` always holds; out-of-range writes are clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    value: f64,
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (inclusive).
    pub max: f64,
    /// Largest absolute change a single tick may apply. Zero means static.
    pub max_step_per_tick: f64,
    /// Display unit.
    pub unit: String,
}

impl Metric {
    /// Creates a metric, clamping `value` into `[min, max]`.
    ///
    /// Swapped bounds are reordered and a negative step is taken as its magnitude.
    /// Non-finite bounds become the widest finite bounds, and the step is capped
    /// at the width of the range (a non-finite step takes the cap).
    #[must_use]
    pub fn new(value: f64, min: f64, max: f64, max_step_per_tick: f64, unit: impl Into<String>) -> Self {
        let min = finite_or(min, f64::MIN);
        let max = finite_or(max, f64::MAX);
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let span = finite_or(max - min, f64::MAX);
        let step = max_step_per_tick.abs();
        let max_step_per_tick = if step.is_finite() { step.min(span) } else { span };
        let mut metric = Self {
            value: min,
            min,
            max,
            max_step_per_tick,
            unit: unit.into(),
        };
        metric.set(value);
        metric
    }

    /// A metric that never drifts.
    #[must_use]
    pub fn fixed(value: f64, unit: impl Into<String>) -> Self {
        Self::new(value, value, value, 0.0, unit)
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether ticks leave this metric untouched.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.max_step_per_tick == 0.0
    }

    /// Writes `candidate` clamped into bounds. NaN keeps the current value.
    pub fn set(&mut self, candidate: f64) {
        if candidate.is_nan() {
            return;
        }
        self.value = self.clamp(candidate);
    }

    /// Clamps `candidate` into `[min, max]`.
    ///
    /// Never panics, even if the public bounds were edited into NaN or swapped.
    #[must_use]
    pub fn clamp(&self, candidate: f64) -> f64 {
        candidate.max(self.min).min(self.max)
    }
}

fn finite_or(raw: f64, fallback: f64) -> f64 {
    if raw.is_finite() {
        raw
    } else {
        fallback
    }
}
