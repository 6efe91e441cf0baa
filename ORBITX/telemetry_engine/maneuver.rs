//! Collision-avoidance maneuver calculator.
//!
//! The numbers are a pure function of delta-V. Requests go through a
//! [`ManeuverDesk`] that models the "calculating" delay and keeps at most one
//! pending computation per entity: a newer request supersedes the older one,
//! and a superseded request never yields a result.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;
use tokio::{runtime::Handle, sync::oneshot};

use crate::helper::{emit, OpsTelemetry};

/// Maneuver request failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManeuverError {
    /// Negative or non-finite delta-V, or an unparsable maneuver type.
    #[error("invalid maneuver argument: {0}")]
    InvalidArgument(String),
    /// The target entity is not registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// A newer request for the same entity replaced this one.
    #[error("maneuver request superseded by a newer request")]
    Superseded,
    /// Called outside a tokio runtime, so nothing could be scheduled.
    #[error("maneuver desk needs a running tokio runtime")]
    NoRuntime,
}

/// Burn direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManeuverType {
    /// Radial boost.
    RadialBoost,
    /// Along-track adjustment.
    InTrackAdjustment,
    /// Cross-track correction.
    CrossTrackCorrection,
}

impl ManeuverType {
    /// Dashboard name.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::RadialBoost => "Radial Boost",
            Self::InTrackAdjustment => "In-Track Adjustment",
            Self::CrossTrackCorrection => "Cross-Track Correction",
        }
    }
}

impl fmt::Display for ManeuverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ManeuverType {
    type Err = ManeuverError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        match key.as_str() {
            "radialboost" | "radial" => Ok(Self::RadialBoost),
            "intrack" | "intrackadjustment" => Ok(Self::InTrackAdjustment),
            "crosstrack" | "crosstrackcorrection" => Ok(Self::CrossTrackCorrection),
            _ => Err(ManeuverError::InvalidArgument(format!(
                "unknown maneuver type `{raw}`"
            ))),
        }
    }
}

/// Requested burn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManeuverRequest {
    /// Burn direction. Does not influence the computed numbers.
    pub kind: ManeuverType,
    /// Velocity change in m/s.
    pub delta_v: f64,
}

impl ManeuverRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(kind: ManeuverType, delta_v: f64) -> Self {
        Self { kind, delta_v }
    }

    fn validate(&self) -> Result<(), ManeuverError> {
        if !self.delta_v.is_finite() || self.delta_v < 0.0 {
            return Err(ManeuverError::InvalidArgument(format!(
                "delta-v must be a finite, non-negative number (got {})",
                self.delta_v
            )));
        }
        Ok(())
    }
}

/// Predicted effect of a burn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManeuverResult {
    /// Collision risk reduction in percent.
    pub risk_reduction_pct: f64,
    /// Change in mission duration in days.
    pub duration_impact_days: f64,
    /// Propellant cost in kg.
    pub fuel_cost_kg: f64,
    /// Ground-track deviation in km.
    pub ground_track_deviation_km: f64,
}

/// [`ManeuverResult`] rounded the way the dashboard shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManeuverDisplay {
    /// One decimal.
    pub risk_reduction: String,
    /// Two decimals.
    pub duration_impact: String,
    /// One decimal.
    pub fuel_cost: String,
    /// Whole kilometres.
    pub ground_track_deviation: String,
}

impl ManeuverResult {
    /// Display strings.
    #[must_use]
    pub fn display(&self) -> ManeuverDisplay {
        ManeuverDisplay {
            risk_reduction: format!("{:.1}", self.risk_reduction_pct),
            duration_impact: format!("{:.2}", self.duration_impact_days),
            fuel_cost: format!("{:.1}", self.fuel_cost_kg),
            ground_track_deviation: format!("{:.0}", self.ground_track_deviation_km),
        }
    }
}

/// Computes the result for a request.
pub fn evaluate(request: &ManeuverRequest) -> Result<ManeuverResult, ManeuverError> {
    request.validate()?;
    let dv = request.delta_v;
    Ok(ManeuverResult {
        risk_reduction_pct: (100.0 - 15.0 / (dv + 0.1)).min(99.9),
        duration_impact_days: -dv * 0.25,
        fuel_cost_kg: dv * 2.0,
        ground_track_deviation_km: dv * 12.5,
    })
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

/// Handle returned to await a maneuver computation.
#[derive(Debug)]
pub struct ManeuverHandle {
    entity_id: String,
    generation: u64,
    rx: oneshot::Receiver<Result<ManeuverResult, ManeuverError>>,
}

impl ManeuverHandle {
    /// Entity the maneuver targets.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Request generation; later requests have larger numbers.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the computation. A superseded request resolves to
    /// [`ManeuverError::Superseded`].
    pub async fn outcome(self) -> Result<ManeuverResult, ManeuverError> {
        self.rx.await.map_err(|_| ManeuverError::Superseded)?
    }
}

/// Runs maneuver computations with an artificial latency.
#[derive(Debug)]
pub struct ManeuverDesk {
    latency: Duration,
    inflight: InFlightMap,
    next_generation: AtomicU64,
    telemetry: Option<OpsTelemetry>,
}

impl ManeuverDesk {
    /// Creates a desk whose computations take `latency`.
    #[must_use]
    pub fn new(latency: Duration, telemetry: Option<OpsTelemetry>) -> Self {
        Self {
            latency,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            telemetry,
        }
    }

    /// Configured latency.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Number of entities with a pending computation.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Starts a computation for `entity_id`, superseding any pending one.
    ///
    /// Invalid input is rejected before anything is scheduled. Outside a tokio
    /// runtime the call fails with [`ManeuverError::NoRuntime`] and any pending
    /// computation is left alone.
    pub fn request(
        &self,
        entity_id: &str,
        request: ManeuverRequest,
    ) -> Result<ManeuverHandle, ManeuverError> {
        let result = evaluate(&request)?;
        let runtime = Handle::try_current().map_err(|_| ManeuverError::NoRuntime)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let previous = self.inflight.lock().insert(
            entity_id.to_string(),
            InFlight {
                generation,
                cancel: cancel_tx,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.cancel.send(());
            emit(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "maneuver.superseded",
                json!({ "entity_id": entity_id, "generation": previous.generation }),
            );
        }
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "maneuver.requested",
            json!({
                "entity_id": entity_id,
                "generation": generation,
                "type": request.kind,
                "delta_v": request.delta_v,
            }),
        );

        let (tx, rx) = oneshot::channel();
        let inflight = Arc::clone(&self.inflight);
        let telemetry = self.telemetry.clone();
        let latency = self.latency;
        let entity = entity_id.to_string();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    let _ = tx.send(Err(ManeuverError::Superseded));
                }
                () = tokio::time::sleep(latency) => {
                    let current = {
                        let mut map = inflight.lock();
                        let current = map
                            .get(&entity)
                            .is_some_and(|entry| entry.generation == generation);
                        if current {
                            map.remove(&entity);
                        }
                        current
                    };
                    if current {
                        emit(
                            telemetry.as_ref(),
                            LogLevel::Info,
                            "maneuver.completed",
                            json!({
                                "entity_id": entity,
                                "generation": generation,
                                "risk_reduction_pct": result.risk_reduction_pct,
                            }),
                        );
                        let _ = tx.send(Ok(result));
                    } else {
                        let _ = tx.send(Err(ManeuverError::Superseded));
                    }
                }
            }
        });

        Ok(ManeuverHandle {
            entity_id: entity_id.to_string(),
            generation,
            rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reference_numbers_for_1_2_mps() {
        let result = evaluate(&ManeuverRequest::new(ManeuverType::RadialBoost, 1.2)).unwrap();
        assert!(close(result.risk_reduction_pct, 100.0 - 15.0 / 1.3));
        assert!(close(result.fuel_cost_kg, 2.4));
        assert!(close(result.duration_impact_days, -0.3));
        assert!(close(result.ground_track_deviation_km, 15.0));
        let shown = result.display();
        assert_eq!(shown.risk_reduction, "88.5");
        assert_eq!(shown.duration_impact, "-0.30");
        assert_eq!(shown.fuel_cost, "2.4");
        assert_eq!(shown.ground_track_deviation, "15");
    }

    #[test]
    fn risk_reduction_is_capped_and_type_is_ignored() {
        let big = evaluate(&ManeuverRequest::new(ManeuverType::InTrackAdjustment, 1_000.0)).unwrap();
        assert!(close(big.risk_reduction_pct, 99.9));
        let a = evaluate(&ManeuverRequest::new(ManeuverType::RadialBoost, 0.8)).unwrap();
        let b = evaluate(&ManeuverRequest::new(ManeuverType::CrossTrackCorrection, 0.8)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_delta_v() {
        for dv in [-0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                evaluate(&ManeuverRequest::new(ManeuverType::RadialBoost, dv)),
                Err(ManeuverError::InvalidArgument(_))
            ));
        }
        assert!(evaluate(&ManeuverRequest::new(ManeuverType::RadialBoost, 0.0)).is_ok());
    }

    #[test]
    fn request_outside_runtime_is_an_error() {
        let desk = ManeuverDesk::new(Duration::from_millis(10), None);
        let err = desk
            .request("CONJ-2025-002", ManeuverRequest::new(ManeuverType::RadialBoost, 1.2))
            .unwrap_err();
        assert_eq!(err, ManeuverError::NoRuntime);
        assert_eq!(desk.pending(), 0);
        assert!(matches!(
            desk.request("CONJ-2025-002", ManeuverRequest::new(ManeuverType::RadialBoost, -1.0)),
            Err(ManeuverError::InvalidArgument(_))
        ));
    }

    #[test]
    fn parses_cli_and_display_names() {
        assert_eq!("radial-boost".parse(), Ok(ManeuverType::RadialBoost));
        assert_eq!("In-Track Adjustment".parse(), Ok(ManeuverType::InTrackAdjustment));
        assert_eq!("cross-track".parse(), Ok(ManeuverType::CrossTrackCorrection));
        assert!("retrograde".parse::<ManeuverType>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_request_supersedes_pending_one() {
        let desk = ManeuverDesk::new(Duration::from_millis(1500), None);
        let first = desk
            .request("CONJ-2025-001", ManeuverRequest::new(ManeuverType::RadialBoost, 0.5))
            .unwrap();
        tokio::time::advance(Duration::from_millis(700)).await;
        let second = desk
            .request("CONJ-2025-001", ManeuverRequest::new(ManeuverType::RadialBoost, 1.2))
            .unwrap();
        assert!(second.generation() > first.generation());

        assert_eq!(first.outcome().await, Err(ManeuverError::Superseded));
        let result = second.outcome().await.unwrap();
        assert!(close(result.fuel_cost_kg, 2.4));
        assert_eq!(desk.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_entities_do_not_interfere() {
        let desk = ManeuverDesk::new(Duration::from_millis(1500), None);
        let a = desk
            .request("CONJ-2025-001", ManeuverRequest::new(ManeuverType::RadialBoost, 1.0))
            .unwrap();
        let b = desk
            .request("CONJ-2025-002", ManeuverRequest::new(ManeuverType::CrossTrackCorrection, 2.0))
            .unwrap();
        assert_eq!(desk.pending(), 2);
        assert!(a.outcome().await.is_ok());
        assert!(close(b.outcome().await.unwrap().fuel_cost_kg, 4.0));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_does_not_cancel_pending_one() {
        let desk = ManeuverDesk::new(Duration::from_millis(1500), None);
        let pending = desk
            .request("CONJ-2025-003", ManeuverRequest::new(ManeuverType::RadialBoost, 1.0))
            .unwrap();
        let rejected =
            desk.request("CONJ-2025-003", ManeuverRequest::new(ManeuverType::RadialBoost, -1.0));
        assert!(matches!(rejected, Err(ManeuverError::InvalidArgument(_))));
        assert!(pending.outcome().await.is_ok());
    }
}
