#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! OrbitX telemetry engine – simulates crew, spacecraft, debris and space-weather
//! telemetry, classifies risk, and manages alerts, maneuvers and exports.

/// Telemetry for the mission-ops engine.
#[path = "../helper.rs"]
pub mod helper;

/// Bounded drifting metrics.
#[path = "../metric.rs"]
pub mod metric;

/// Threshold tables and risk classification.
#[path = "../classifier.rs"]
pub mod classifier;

/// Entity registry and snapshots.
#[path = "../registry.rs"]
pub mod registry;

/// Random-walk telemetry simulator.
#[path = "../simulator.rs"]
pub mod simulator;

/// Per-group tick scheduling.
#[path = "../scheduler.rs"]
pub mod scheduler;

/// Alert lifecycle.
#[path = "../alerts.rs"]
pub mod alerts;

/// Maneuver calculator.
#[path = "../maneuver.rs"]
pub mod maneuver;

/// CSV and JSON exports.
#[path = "../export.rs"]
pub mod export;

/// Engine configuration.
#[path = "../config.rs"]
pub mod config;

/// Default mission scenario.
#[path = "../scenario.rs"]
pub mod scenario;

/// Space weather and anomaly log.
#[path = "../advanced/main.rs"]
pub mod advanced;

/// Runtime facade.
#[path = "../main.rs"]
pub mod runtime;

pub use alerts::{Alert, AlertError, AlertFilter, AlertSummary, NewAlert};
pub use classifier::Status;
pub use config::EngineConfig;
pub use export::{ExportError, ExportFormat, ExportTable};
pub use helper::{OpsTelemetry, OpsTelemetryBuilder};
pub use maneuver::{ManeuverError, ManeuverRequest, ManeuverResult, ManeuverType};
pub use registry::{EntityKind, RegistryError, RegistrySnapshot};
pub use runtime::{MissionControl, MissionControlBuilder, SubscriptionTarget};
