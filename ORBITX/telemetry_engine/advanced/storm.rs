use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    helper::{emit, OpsTelemetry},
    registry::{EntityKind, RegistrySnapshot},
};

/// Entity holding the solar and geomagnetic indices.
pub const SOLAR_INDICES_ID: &str = "solar-indices";
/// Kp index metric on [`SOLAR_INDICES_ID`].
pub const KP_METRIC: &str = "kp_index";
/// Static risk-reduction metric on protected assets.
pub const RISK_REDUCTION_METRIC: &str = "risk_reduction_pct";

/// NOAA geomagnetic storm scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeomagneticLevel {
    /// Below storm level.
    G0,
    /// Minor.
    G1,
    /// Moderate.
    G2,
    /// Strong.
    G3,
    /// Severe.
    G4,
    /// Extreme.
    G5,
}

impl GeomagneticLevel {
    /// Level for a Kp reading.
    #[must_use]
    pub fn from_kp(kp: f64) -> Self {
        match kp {
            k if k >= 9.0 => Self::G5,
            k if k >= 8.0 => Self::G4,
            k if k >= 7.0 => Self::G3,
            k if k >= 6.0 => Self::G2,
            k if k >= 5.0 => Self::G1,
            _ => Self::G0,
        }
    }

    /// One step milder, saturating at G0.
    #[must_use]
    pub fn lowered(self) -> Self {
        match self {
            Self::G0 | Self::G1 => Self::G0,
            Self::G2 => Self::G1,
            Self::G3 => Self::G2,
            Self::G4 => Self::G3,
            Self::G5 => Self::G4,
        }
    }

    /// Scale descriptor.
    #[must_use]
    pub fn descriptor(self) -> &'static str {
        match self {
            Self::G0 => "Quiet",
            Self::G1 => "Minor",
            Self::G2 => "Moderate",
            Self::G3 => "Strong",
            Self::G4 => "Severe",
            Self::G5 => "Extreme",
        }
    }
}

impl fmt::Display for GeomagneticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} - {}", self, self.descriptor())
    }
}

/// How one protected asset responds to the current protection mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProtection {
    /// Entity id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Posture label (`Protected`, `Safe Mode`, ... or the standby label).
    pub posture: String,
    /// Action taken, or `Standby`.
    pub action: String,
    /// Risk reduction in percent; zero while protection is off.
    pub risk_reduction_pct: f64,
}

/// Space-weather summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormStatus {
    /// Current Kp index.
    pub kp_index: f64,
    /// Level implied by Kp.
    pub level: GeomagneticLevel,
    /// Level after protection is applied.
    pub effective_level: GeomagneticLevel,
    /// Whether protection mode is on.
    pub protection_active: bool,
    /// Per-asset posture.
    pub assets: Vec<AssetProtection>,
}

impl StormStatus {
    /// Effective level as displayed, e.g. `G1 - Minor`.
    #[must_use]
    pub fn alert_level(&self) -> String {
        self.effective_level.to_string()
    }
}

/// Holds the protection toggle and derives storm status from snapshots.
#[derive(Debug, Default)]
pub struct SpaceWeatherDesk {
    protection: AtomicBool,
    telemetry: Option<OpsTelemetry>,
}

impl SpaceWeatherDesk {
    /// Creates a desk with protection off.
    #[must_use]
    pub fn new(telemetry: Option<OpsTelemetry>) -> Self {
        Self {
            protection: AtomicBool::new(false),
            telemetry,
        }
    }

    /// Whether protection mode is on.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.protection.load(Ordering::SeqCst)
    }

    /// Switches protection mode; returns the previous setting.
    pub fn set_protection(&self, active: bool) -> bool {
        let previous = self.protection.swap(active, Ordering::SeqCst);
        if previous != active {
            emit(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "storm.protection.changed",
                json!({ "active": active }),
            );
        }
        previous
    }

    /// Storm status for `snapshot`. A missing Kp feed reads as zero.
    #[must_use]
    pub fn status(&self, snapshot: &RegistrySnapshot) -> StormStatus {
        let active = self.is_protected();
        let kp_index = snapshot
            .entity(SOLAR_INDICES_ID)
            .map_or(0.0, |entity| entity.value(KP_METRIC));
        let level = GeomagneticLevel::from_kp(kp_index);
        let assets = snapshot
            .of_kind(EntityKind::Asset)
            .map(|asset| AssetProtection {
                id: asset.id.clone(),
                name: asset.name.clone(),
                posture: asset
                    .label(if active { "active" } else { "standby" })
                    .to_string(),
                action: if active {
                    asset.label("action").to_string()
                } else {
                    "Standby".to_string()
                },
                risk_reduction_pct: if active {
                    asset.value(RISK_REDUCTION_METRIC)
                } else {
                    0.0
                },
            })
            .collect();
        StormStatus {
            kp_index,
            level,
            effective_level: if active { level.lowered() } else { level },
            protection_active: active,
            assets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::{RiskClassifier, ThresholdBook},
        metric::Metric,
        registry::{Entity, EntityRegistry},
    };

    fn snapshot(kp: f64) -> RegistrySnapshot {
        let registry = EntityRegistry::new(RiskClassifier::new(ThresholdBook::new()));
        registry
            .register(
                Entity::new(SOLAR_INDICES_ID, "Solar Indices", EntityKind::SensorNode, "space-weather")
                    .with_metric(KP_METRIC, Metric::new(kp, 0.0, 9.0, 0.15, "")),
            )
            .unwrap();
        registry
            .register(
                Entity::new("asset-iss", "ISS", EntityKind::Asset, "space-weather")
                    .with_label("standby", "Monitoring")
                    .with_label("active", "Protected")
                    .with_label("action", "Crew in shielded area")
                    .with_metric(RISK_REDUCTION_METRIC, Metric::fixed(85.0, "%")),
            )
            .unwrap();
        registry.snapshot()
    }

    #[test]
    fn kp_maps_to_g_scale() {
        assert_eq!(GeomagneticLevel::from_kp(4.2), GeomagneticLevel::G0);
        assert_eq!(GeomagneticLevel::from_kp(5.0), GeomagneticLevel::G1);
        assert_eq!(GeomagneticLevel::from_kp(6.4), GeomagneticLevel::G2);
        assert_eq!(GeomagneticLevel::from_kp(7.0), GeomagneticLevel::G3);
        assert_eq!(GeomagneticLevel::from_kp(8.9), GeomagneticLevel::G4);
        assert_eq!(GeomagneticLevel::from_kp(9.0), GeomagneticLevel::G5);
        assert_eq!(GeomagneticLevel::G2.to_string(), "G2 - Moderate");
        assert_eq!(GeomagneticLevel::G0.lowered(), GeomagneticLevel::G0);
    }

    #[test]
    fn protection_lowers_level_and_reports_reduction() {
        let desk = SpaceWeatherDesk::new(None);
        let idle = desk.status(&snapshot(6.3));
        assert_eq!(idle.alert_level(), "G2 - Moderate");
        assert_eq!(idle.assets[0].risk_reduction_pct, 0.0);
        assert_eq!(idle.assets[0].posture, "Monitoring");
        assert_eq!(idle.assets[0].action, "Standby");

        assert!(!desk.set_protection(true));
        let protected = desk.status(&snapshot(6.3));
        assert_eq!(protected.level, GeomagneticLevel::G2);
        assert_eq!(protected.alert_level(), "G1 - Minor");
        assert_eq!(protected.assets[0].risk_reduction_pct, 85.0);
        assert_eq!(protected.assets[0].posture, "Protected");

        assert!(desk.set_protection(false));
        assert_eq!(desk.status(&snapshot(6.3)).effective_level, GeomagneticLevel::G2);
    }
}
