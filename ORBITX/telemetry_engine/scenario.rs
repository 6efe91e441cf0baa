//! The default mission: the crew, life support, conjunctions, spacecraft and
//! space-weather feeds shown on the operations dashboard, with their
//! threshold tables.

use chrono::{Duration, Utc};

use crate::{
    advanced::{
        anomaly::{Anomaly, AnomalySeverity, AnomalyStatus},
        storm::{KP_METRIC, RISK_REDUCTION_METRIC, SOLAR_INDICES_ID},
    },
    alerts::{NewAlert, MISSION_CONTROL},
    classifier::{Status, Threshold, ThresholdBook, ThresholdTable},
    metric::Metric,
    registry::{Entity, EntityKind},
};

/// Crew vitals and life support.
pub const CREW_VITALS: &str = "crew-vitals";
/// Conjunction events.
pub const DEBRIS: &str = "debris";
/// Spacecraft subsystems.
pub const SPACECRAFT: &str = "spacecraft";
/// Solar indices, sensors and protected assets.
pub const SPACE_WEATHER: &str = "space-weather";
/// Synthetic alert generator; owns no entities.
pub const ALERT_FEED: &str = "alert-feed";

/// Station life-support entity id.
pub const LIFE_SUPPORT_ID: &str = "life-support";

/// Alert present before the engine starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedAlert {
    /// Alert to raise.
    pub alert: NewAlert,
    /// Whether it starts acknowledged.
    pub acknowledged: bool,
}

/// Everything needed to populate an engine.
#[derive(Debug, Clone)]
pub struct MissionScenario {
    /// Entities in registration order.
    pub entities: Vec<Entity>,
    /// Threshold tables.
    pub thresholds: ThresholdBook,
    /// Initial alert feed, oldest first.
    pub seed_alerts: Vec<SeedAlert>,
    /// Initial anomaly log.
    pub anomalies: Vec<Anomaly>,
}

/// The default mission.
#[must_use]
pub fn default_mission() -> MissionScenario {
    let mut entities = crew();
    entities.push(life_support());
    entities.extend(conjunctions());
    entities.extend(spacecraft());
    entities.extend(space_weather());
    MissionScenario {
        entities,
        thresholds: thresholds(),
        seed_alerts: seed_alerts(),
        anomalies: anomalies(),
    }
}

fn crew() -> Vec<Entity> {
    [
        ("crew-chen", "Commander Sarah Chen", "Mission Commander", "118/76", [72.0, 36.8, 98.0, 0.45, 16.0]),
        ("crew-rodriguez", "Dr. Marcus Rodriguez", "Flight Engineer", "125/82", [85.0, 37.2, 97.0, 0.52, 18.0]),
        ("crew-tanaka", "Specialist Yuki Tanaka", "Mission Specialist", "115/72", [68.0, 36.6, 99.0, 0.38, 15.0]),
    ]
    .into_iter()
    .map(|(id, name, role, blood_pressure, [hr, temp, o2, rad, resp])| {
        Entity::new(id, name, EntityKind::Crew, CREW_VITALS)
            .with_label("role", role)
            .with_label("blood_pressure", blood_pressure)
            .with_metric("heart_rate", Metric::new(hr, 60.0, 100.0, 2.0, "bpm"))
            .with_metric("temperature", Metric::new(temp, 36.0, 38.0, 0.1, "°C"))
            .with_metric("oxygen_saturation", Metric::new(o2, 95.0, 100.0, 1.0, "%"))
            .with_metric("radiation_dose", Metric::new(rad, 0.1, 1.0, 0.01, "mSv"))
            .with_metric("respiration_rate", Metric::new(resp, 12.0, 25.0, 1.0, "/min"))
    })
    .collect()
}

fn life_support() -> Entity {
    Entity::new(LIFE_SUPPORT_ID, "Station Life Support", EntityKind::Spacecraft, CREW_VITALS)
        .with_label("air_quality", "Excellent")
        .with_metric("oxygen_level", Metric::new(21.2, 20.5, 21.5, 0.05, "%"))
        .with_metric("co2_level", Metric::new(0.3, 0.1, 0.5, 0.025, "%"))
        .with_metric("pressure", Metric::new(101.3, 100.0, 102.0, 0.1, "kPa"))
        .with_metric("humidity", Metric::new(45.0, 40.0, 50.0, 1.0, "%"))
        .with_metric("temperature", Metric::new(22.5, 21.0, 24.0, 0.15, "°C"))
        .with_metric("water_reserves", Metric::new(85.0, 80.0, 90.0, 0.5, "%"))
        .with_metric("water_recycling_rate", Metric::new(93.0, 90.0, 95.0, 0.25, "%"))
        .with_metric("power_bus_a_voltage", Metric::new(120.5, 119.0, 122.0, 0.15, "V"))
        .with_metric("power_bus_b_voltage", Metric::new(120.3, 119.0, 122.0, 0.15, "V"))
}

fn conjunctions() -> Vec<Entity> {
    [
        ("CONJ-2025-001", "NOAA-20", "Debris Fragment 47291", "14h 23m", 127.0, 1.2e-4, "Monitor", "0.8 m/s"),
        ("CONJ-2025-002", "Sentinel-3B", "Cosmos 1408 Fragment", "2d 8h", 89.0, 2.7e-4, "Avoidance Maneuver", "1.2 m/s"),
        ("CONJ-2025-003", "ISS", "Unknown Object 99847", "6h 45m", 234.0, 5.1e-5, "Continue Monitoring", "N/A"),
    ]
    .into_iter()
    .map(|(id, primary, secondary, tca, miss, probability, action, delta_v)| {
        Entity::new(id, format!("{primary} / {secondary}"), EntityKind::ConjunctionEvent, DEBRIS)
            .with_label("primary", primary)
            .with_label("secondary", secondary)
            .with_label("time_to_ca", tca)
            .with_label("recommended_action", action)
            .with_label("suggested_delta_v", delta_v)
            .with_metric("miss_distance", Metric::new(miss, 50.0, 500.0, 5.0, "m"))
            .with_metric("probability", Metric::new(probability, 1e-6, 1e-3, 5e-6, ""))
    })
    .collect()
}

struct CraftSeed {
    id: &'static str,
    name: &'static str,
    kind: &'static str,
    health: f64,
    battery: f64,
    cpu: f64,
    pointing: f64,
    signal: f64,
    data_rate: f64,
}

fn spacecraft() -> Vec<Entity> {
    [
        CraftSeed {
            id: "sc-sentinel-2a",
            name: "Sentinel-2A",
            kind: "Earth Observation",
            health: 98.0,
            battery: 95.0,
            cpu: 42.0,
            pointing: 99.6,
            signal: -83.0,
            data_rate: 152.0,
        },
        CraftSeed {
            id: "sc-noaa-21",
            name: "NOAA-21",
            kind: "Weather Satellite",
            health: 87.0,
            battery: 87.0,
            cpu: 44.8,
            pointing: 98.8,
            signal: -78.0,
            data_rate: 160.0,
        },
        CraftSeed {
            id: "sc-hubble",
            name: "Hubble Telescope",
            kind: "Observatory",
            health: 94.0,
            battery: 95.0,
            cpu: 41.6,
            pointing: 99.6,
            signal: -83.0,
            data_rate: 152.0,
        },
    ]
    .into_iter()
    .map(|seed| {
        Entity::new(seed.id, seed.name, EntityKind::Spacecraft, SPACECRAFT)
            .with_label("type", seed.kind)
            .with_label("power.charging_status", "Charging")
            .with_label("thermal.thermal_status", "Nominal")
            .with_label("communication.uplink_status", "Active")
            .with_metric("health", Metric::new(seed.health, 85.0, 99.0, 1.0, "%"))
            .with_metric("power.battery_level", Metric::new(seed.battery, 85.0, 100.0, 1.5, "%"))
            .with_metric("power.solar_panel_output", Metric::new(2.4, 2.0, 2.8, 0.1, "kW"))
            .with_metric("power.power_consumption", Metric::new(1.8, 1.5, 2.2, 0.05, "kW"))
            .with_metric("thermal.cpu_temperature", Metric::new(seed.cpu, 35.0, 50.0, 1.0, "°C"))
            .with_metric("thermal.instrument_temperature", Metric::new(22.1, 20.0, 25.0, 0.25, "°C"))
            .with_metric("attitude.roll", Metric::new(0.2, -5.0, 5.0, 0.05, "deg"))
            .with_metric("attitude.pitch", Metric::new(-0.1, -5.0, 5.0, 0.05, "deg"))
            .with_metric("attitude.yaw", Metric::new(0.1, -5.0, 5.0, 0.05, "deg"))
            .with_metric("attitude.pointing_accuracy", Metric::new(seed.pointing, 98.0, 99.9, 0.1, "%"))
            .with_metric("communication.signal_strength", Metric::new(seed.signal, -95.0, -75.0, 1.5, "dBm"))
            .with_metric("communication.data_rate", Metric::new(seed.data_rate, 120.0, 180.0, 5.0, "Mbps"))
    })
    .collect()
}

fn space_weather() -> Vec<Entity> {
    let mut entities = vec![Entity::new(
        SOLAR_INDICES_ID,
        "Solar & Geomagnetic Indices",
        EntityKind::SensorNode,
        SPACE_WEATHER,
    )
    .with_metric("solar_flux_index", Metric::new(142.3, 130.0, 160.0, 2.5, "sfu"))
    .with_metric("sunspot_number", Metric::new(87.0, 70.0, 110.0, 4.0, ""))
    .with_metric("solar_wind_speed", Metric::new(425.0, 350.0, 500.0, 10.0, "km/s"))
    .with_metric("solar_wind_density", Metric::new(8.2, 5.0, 12.0, 0.5, "p/cm³"))
    .with_metric("interplanetary_magnetic_field", Metric::new(6.8, 3.0, 10.0, 0.25, "nT"))
    .with_metric(KP_METRIC, Metric::new(4.2, 2.0, 7.0, 0.15, ""))
    .with_metric("ap_index", Metric::new(18.0, 10.0, 30.0, 1.5, ""))
    .with_metric("dst_index", Metric::new(-45.0, -80.0, -20.0, 4.0, "nT"))];

    entities.extend(
        [
            ("sensor-soho", "SOHO", "Solar Observatory", 98.0),
            ("sensor-ace", "ACE", "Solar Wind Monitor", 95.0),
            ("sensor-dscovr", "DSCOVR", "Space Weather Monitor", 97.0),
            ("sensor-magnetometers", "Magnetometers", "Geomagnetic Network", 94.0),
        ]
        .into_iter()
        .map(|(id, name, kind, quality)| {
            Entity::new(id, name, EntityKind::SensorNode, SPACE_WEATHER)
                .with_label("type", kind)
                .with_metric("data_quality", Metric::new(quality, 90.0, 99.0, 1.0, "%"))
        }),
    );

    entities.extend(
        [
            ("asset-iss", "ISS", "Space Station", "Monitoring", "Protected", "Crew in shielded area", 85.0),
            ("asset-hubble", "Hubble Telescope", "Observatory", "Operational", "Safe Mode", "Instruments powered down", 92.0),
            ("asset-gps", "GPS Constellation", "Navigation", "Operational", "Monitoring", "Enhanced error correction", 65.0),
            ("asset-starlink", "Starlink Fleet", "Communication", "Operational", "Degraded Mode", "Reduced power operations", 78.0),
        ]
        .into_iter()
        .map(|(id, name, kind, standby, active, action, reduction)| {
            Entity::new(id, name, EntityKind::Asset, SPACE_WEATHER)
                .with_label("type", kind)
                .with_label("standby", standby)
                .with_label("active", active)
                .with_label("action", action)
                .with_metric(RISK_REDUCTION_METRIC, Metric::fixed(reduction, "%"))
        }),
    );
    entities
}

fn thresholds() -> ThresholdBook {
    ThresholdBook::new()
        .with_kind(
            EntityKind::Crew,
            ThresholdTable::new()
                .with("heart_rate", Threshold::band(75.0, 15.0, 25.0))
                .with("temperature", Threshold::higher_is_worse(37.2, 37.8))
                .with("oxygen_saturation", Threshold::lower_is_worse(96.0, 95.0))
                .with("radiation_dose", Threshold::higher_is_worse(0.5, 0.8))
                .with("respiration_rate", Threshold::band(16.0, 6.0, 8.0)),
        )
        .with_entity(
            LIFE_SUPPORT_ID,
            ThresholdTable::new()
                .with("co2_level", Threshold::higher_is_worse(0.4, 0.48))
                .with("oxygen_level", Threshold::lower_is_worse(20.7, 20.55))
                .with("pressure", Threshold::band(101.3, 0.6, 0.9))
                .with("power_bus_a_voltage", Threshold::band(120.5, 1.0, 1.4))
                .with("power_bus_b_voltage", Threshold::band(120.5, 1.0, 1.4)),
        )
        .with_kind(
            EntityKind::ConjunctionEvent,
            ThresholdTable::new()
                .with("miss_distance", Threshold::lower_is_worse(150.0, 100.0))
                .with("probability", Threshold::higher_is_worse(1e-4, 2.5e-4)),
        )
        .with_kind(
            EntityKind::Spacecraft,
            ThresholdTable::new()
                .with("health", Threshold::lower_is_worse(90.0, 86.0))
                .with("power.battery_level", Threshold::lower_is_worse(88.0, 86.0))
                .with("thermal.cpu_temperature", Threshold::higher_is_worse(46.0, 49.0))
                .with("communication.signal_strength", Threshold::lower_is_worse(-90.0, -93.0))
                .with("attitude.pointing_accuracy", Threshold::lower_is_worse(98.5, 98.1)),
        )
        .with_kind(
            EntityKind::SensorNode,
            ThresholdTable::new().with("data_quality", Threshold::lower_is_worse(92.0, 90.5)),
        )
        .with_entity(
            SOLAR_INDICES_ID,
            ThresholdTable::new()
                .with(KP_METRIC, Threshold::higher_is_worse(5.0, 6.0))
                .with("dst_index", Threshold::lower_is_worse(-50.0, -70.0))
                .with("solar_wind_speed", Threshold::higher_is_worse(450.0, 490.0)),
        )
}

fn seed_alerts() -> Vec<SeedAlert> {
    let now = Utc::now();
    [
        (
            45,
            Status::Caution,
            "Crew Health Alert",
            "Astronaut vitals showing elevated stress indicators. Recommend rest period.",
            "Health Monitoring",
            "seed:crew-health",
            false,
        ),
        (
            30,
            Status::Nominal,
            "Telemetry Update",
            "Spacecraft systems nominal. All parameters within acceptable ranges.",
            "Spacecraft Telemetry",
            "seed:telemetry-update",
            true,
        ),
        (
            15,
            Status::Caution,
            "Solar Storm Activity",
            "Moderate geomagnetic storm conditions detected. Monitor crew radiation exposure.",
            "Space Weather",
            "seed:solar-storm",
            false,
        ),
        (
            5,
            Status::Critical,
            "Debris Collision Risk",
            "High probability collision detected with object 2023-001A. Immediate evasive maneuver required.",
            "Debris Monitoring",
            "seed:debris-collision",
            false,
        ),
    ]
    .into_iter()
    .map(|(minutes_ago, severity, title, message, source, condition, acknowledged)| SeedAlert {
        alert: NewAlert::new(MISSION_CONTROL, condition, severity, message)
            .title(title)
            .source(source)
            .at(now - Duration::minutes(minutes_ago)),
        acknowledged,
    })
    .collect()
}

fn anomalies() -> Vec<Anomaly> {
    vec![
        Anomaly {
            id: "ANOM-2025-001".into(),
            spacecraft: "Sentinel-2A".into(),
            subsystem: "Power".into(),
            kind: "Battery Temp Rise".into(),
            severity: AnomalySeverity::Medium,
            recommendation: "Reduce power consumption, activate thermal management.".into(),
            auto_action: "Thermal control activated".into(),
            status: AnomalyStatus::Mitigated,
        },
        Anomaly {
            id: "ANOM-2025-002".into(),
            spacecraft: "NOAA-21".into(),
            subsystem: "Attitude".into(),
            kind: "Gyroscope Drift".into(),
            severity: AnomalySeverity::Low,
            recommendation: "Switch to backup gyroscope.".into(),
            auto_action: "Backup gyro activated".into(),
            status: AnomalyStatus::Resolved,
        },
        Anomaly {
            id: "ANOM-2025-003".into(),
            spacecraft: "NOAA-21".into(),
            subsystem: "Comms".into(),
            kind: "Signal Degradation".into(),
            severity: AnomalySeverity::High,
            recommendation: "Antenna pointing adjustment required.".into(),
            auto_action: "Pending operator approval".into(),
            status: AnomalyStatus::Active,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::RiskClassifier,
        registry::EntityRegistry,
    };

    fn registry() -> EntityRegistry {
        let scenario = default_mission();
        let registry = EntityRegistry::new(RiskClassifier::new(scenario.thresholds));
        for entity in scenario.entities {
            registry.register(entity).unwrap();
        }
        registry
    }

    #[test]
    fn initial_statuses_match_the_dashboard() {
        let snapshot = registry().snapshot();
        let status = |id: &str| snapshot.entity(id).unwrap().status;
        assert_eq!(status("crew-chen"), Status::Nominal);
        assert_eq!(status("crew-rodriguez"), Status::Caution);
        assert_eq!(status("crew-tanaka"), Status::Nominal);
        assert_eq!(status(LIFE_SUPPORT_ID), Status::Nominal);
        assert_eq!(status("sc-sentinel-2a"), Status::Nominal);
        assert_eq!(status("sc-noaa-21"), Status::Caution);
        assert_eq!(status(SOLAR_INDICES_ID), Status::Nominal);
        assert_eq!(status("sensor-ace"), Status::Nominal);

        let risk: Vec<&str> = snapshot
            .of_kind(EntityKind::ConjunctionEvent)
            .map(|event| event.status.risk_level())
            .collect();
        assert_eq!(risk, vec!["Medium", "High", "Low"]);
    }

    #[test]
    fn every_entity_group_is_populated() {
        let registry = registry();
        let groups = registry.groups();
        for group in [CREW_VITALS, DEBRIS, SPACECRAFT, SPACE_WEATHER] {
            assert!(groups.iter().any(|g| g == group), "missing group {group}");
        }
        assert!(!groups.iter().any(|g| g == ALERT_FEED));
    }

    #[test]
    fn crew_scores_rank_rodriguez_highest() {
        let snapshot = registry().snapshot();
        let score = |id: &str| snapshot.entity(id).unwrap().risk_score.unwrap();
        assert_eq!(score("crew-chen"), 10);
        assert!(score("crew-rodriguez") > score("crew-tanaka"));
    }

    #[test]
    fn seeds_are_oldest_first() {
        let scenario = default_mission();
        assert_eq!(scenario.seed_alerts.len(), 4);
        assert_eq!(scenario.seed_alerts.iter().filter(|seed| seed.acknowledged).count(), 1);
        assert_eq!(scenario.anomalies.len(), 3);
    }
}
