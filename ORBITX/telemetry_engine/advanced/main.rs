//! Dashboard features layered on top of the core engine: space-weather
//! protection mode and the spacecraft anomaly log.

/// Spacecraft anomaly log.
pub mod anomaly;
/// Geomagnetic storm level and asset protection.
pub mod storm;

pub use anomaly::{Anomaly, AnomalyLog, AnomalySeverity, AnomalyStatus};
pub use storm::{AssetProtection, GeomagneticLevel, SpaceWeatherDesk, StormStatus};
