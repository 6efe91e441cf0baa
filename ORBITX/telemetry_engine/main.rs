use std::{path::Path, str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use futures::{stream, Stream};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use serde_json::json;
use shared_event_bus::{EventRecord, EventSubscriber, MemoryEventBus};
use shared_logging::LogLevel;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    advanced::{
        anomaly::{Anomaly, AnomalyLog},
        storm::{SpaceWeatherDesk, StormStatus},
    },
    alerts::{Alert, AlertError, AlertFilter, AlertManager, AlertSummary, NewAlert},
    classifier::RiskClassifier,
    config::EngineConfig,
    export::{self, ExportError, ExportFormat, ExportTable},
    helper::{emit, random_seed, seeded_rng, OpsTelemetry},
    maneuver::{self, ManeuverDesk, ManeuverError, ManeuverHandle, ManeuverRequest, ManeuverResult, ManeuverType},
    registry::{EntityRegistry, RegistryError, RegistrySnapshot},
    scenario::{default_mission, MissionScenario, ALERT_FEED},
    scheduler::{Scheduler, TickGroup},
    simulator::{RandomWalk, TelemetrySimulator, TickReport, ValueSource},
};

/// Which snapshots a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// Full snapshots.
    All,
    /// Snapshots narrowed to one entity.
    Entity(String),
}

impl FromStr for SubscriptionTarget {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(if raw.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Entity(raw.to_string())
        })
    }
}

/// State shared between the facade and the scheduler tasks.
struct EngineCore {
    registry: Arc<EntityRegistry>,
    simulator: TelemetrySimulator,
    alerts: AlertManager,
    snapshots: broadcast::Sender<Arc<RegistrySnapshot>>,
    feed_rng: Mutex<SmallRng>,
    feed_enabled: bool,
}

impl EngineCore {
    /// One tick of `group`. The alert feed produces an alert instead of a report.
    fn tick_group(&self, group: &str) -> Result<Option<TickReport>, RegistryError> {
        if group == ALERT_FEED {
            if self.feed_enabled {
                let mut rng = self.feed_rng.lock();
                self.alerts.synthesize_feed_alert(&mut *rng);
            }
            return Ok(None);
        }
        let report = self.simulator.tick(group)?;
        let snapshot = self.registry.shared_snapshot(Some(group));
        self.alerts.reconcile(&snapshot);
        // No subscribers is fine.
        let _ = self.snapshots.send(snapshot);
        Ok(Some(report))
    }
}

/// The mission-operations engine: registry, simulator, alerts, maneuvers,
/// exports and the dashboard extras behind one handle.
pub struct MissionControl {
    core: Arc<EngineCore>,
    scheduler: Scheduler,
    maneuvers: ManeuverDesk,
    weather: SpaceWeatherDesk,
    anomalies: AnomalyLog,
    config: EngineConfig,
    seed: u64,
    event_bus: Option<Arc<MemoryEventBus>>,
    telemetry: Option<OpsTelemetry>,
}

impl MissionControl {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> MissionControlBuilder {
        MissionControlBuilder::default()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seed driving the random walk and the synthetic feed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Entity registry.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.core.registry
    }

    /// In-memory event bus, when the builder created one.
    #[must_use]
    pub fn event_bus(&self) -> Option<&MemoryEventBus> {
        self.event_bus.as_deref()
    }

    /// Receiver for every event published on the in-memory bus from now on.
    ///
    /// Fails when the engine was built with an external telemetry handle.
    pub async fn subscribe_events(&self) -> Result<broadcast::Receiver<EventRecord>> {
        let bus = self
            .event_bus
            .as_deref()
            .context("engine has no in-memory event bus")?;
        bus.subscribe().await
    }

    /// Events retained by the in-memory bus, oldest first.
    #[must_use]
    pub fn recorded_events(&self) -> Vec<EventRecord> {
        self.event_bus
            .as_deref()
            .map(MemoryEventBus::snapshot)
            .unwrap_or_default()
    }

    /// Telemetry handle.
    #[must_use]
    pub fn telemetry(&self) -> Option<&OpsTelemetry> {
        self.telemetry.as_ref()
    }

    /// Runs one tick of `group` immediately, outside the scheduler.
    pub fn tick_group(&self, group: &str) -> Result<Option<TickReport>, RegistryError> {
        self.core.tick_group(group)
    }

    /// Ticks every enabled group once, in configuration order.
    pub fn tick_all(&self) -> Result<Vec<TickReport>, RegistryError> {
        let mut reports = Vec::new();
        for (group, _) in self.config.enabled_groups() {
            if group != ALERT_FEED && self.core.registry.group_ticks(&group).is_none() {
                continue;
            }
            if let Some(report) = self.core.tick_group(&group)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Starts a timer for every enabled group. Must be called inside a tokio runtime.
    pub fn start(&self) {
        for (group, interval) in self.config.enabled_groups() {
            if group != ALERT_FEED && self.core.registry.group_ticks(&group).is_none() {
                tracing::warn!("tick group {group} has no entities; not scheduling it");
                continue;
            }
            let core = Arc::clone(&self.core);
            let name = group.clone();
            self.scheduler.start(TickGroup::new(group, interval), move || {
                if let Err(err) = core.tick_group(&name) {
                    tracing::warn!("tick of {name} failed: {err}");
                }
            });
        }
    }

    /// Groups with a running timer.
    #[must_use]
    pub fn running_groups(&self) -> Vec<String> {
        self.scheduler.running()
    }

    /// Stops one group's timer.
    pub async fn stop_group(&self, group: &str) -> bool {
        self.scheduler.stop(group).await
    }

    /// Stops every timer.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Stream of snapshots, one per entity-group tick.
    ///
    /// A subscriber that falls more than `snapshot_channel_capacity` snapshots
    /// behind skips the missed ones.
    pub fn subscribe(
        &self,
        target: SubscriptionTarget,
    ) -> impl Stream<Item = Arc<RegistrySnapshot>> + Send + 'static {
        let rx = self.core.snapshots.subscribe();
        stream::unfold((rx, target), |(mut rx, target)| async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => {
                        let item = match &target {
                            SubscriptionTarget::All => snapshot,
                            SubscriptionTarget::Entity(id) => Arc::new(snapshot.only(id)),
                        };
                        return Some((item, (rx, target)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("snapshot subscriber lagged; skipped {skipped} snapshots");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.core.registry.shared_snapshot(None)
    }

    /// Active alerts passing `filter`, newest first.
    #[must_use]
    pub fn list_alerts(&self, filter: AlertFilter) -> Vec<Alert> {
        self.core.alerts.list(filter)
    }

    /// Filter counters.
    #[must_use]
    pub fn alert_summary(&self) -> AlertSummary {
        self.core.alerts.summary()
    }

    /// Acknowledges an alert.
    pub fn acknowledge_alert(&self, id: &str) -> Result<Alert, AlertError> {
        self.core.alerts.acknowledge(id)
    }

    /// Dismisses an alert.
    pub fn dismiss_alert(&self, id: &str) -> Result<Alert, AlertError> {
        self.core.alerts.dismiss(id)
    }

    /// Raises a manual alert on the feed.
    pub fn raise_alert(&self, alert: NewAlert) -> Alert {
        self.core.alerts.raise(alert)
    }

    /// Starts a maneuver computation without waiting for it.
    ///
    /// Fails with [`ManeuverError::NoRuntime`] when called outside a tokio runtime.
    pub fn submit_maneuver(
        &self,
        entity_id: &str,
        request: ManeuverRequest,
    ) -> Result<ManeuverHandle, ManeuverError> {
        maneuver::evaluate(&request)?;
        if !self.core.registry.contains(entity_id) {
            return Err(ManeuverError::UnknownEntity(entity_id.to_string()));
        }
        self.maneuvers.request(entity_id, request)
    }

    /// Computes a maneuver, resolving after the configured latency.
    ///
    /// Resolves to [`ManeuverError::Superseded`] if another request for the
    /// same entity arrives first.
    pub async fn request_maneuver(
        &self,
        entity_id: &str,
        kind: ManeuverType,
        delta_v: f64,
    ) -> Result<ManeuverResult, ManeuverError> {
        self.submit_maneuver(entity_id, ManeuverRequest::new(kind, delta_v))?
            .outcome()
            .await
    }

    /// CSV gives the crew table; JSON gives every entity plus the active alerts.
    pub fn export_snapshot(&self, format: ExportFormat) -> Result<String, ExportError> {
        let snapshot = self.snapshot();
        match format {
            ExportFormat::Csv => Ok(export::crew_csv(&snapshot)),
            ExportFormat::Json => {
                export::snapshot_json(&snapshot, &self.core.alerts.list(AlertFilter::All))
            }
        }
    }

    /// One CSV table.
    #[must_use]
    pub fn export_table(&self, table: ExportTable) -> String {
        export::table_csv(&self.snapshot(), table)
    }

    /// Telemetry-analysis JSON for one spacecraft, with its anomalies.
    pub fn export_telemetry(&self, spacecraft_id: &str) -> Result<String, ExportError> {
        let snapshot = self.snapshot();
        let anomalies = snapshot
            .entity(spacecraft_id)
            .map(|craft| self.anomalies.for_spacecraft(&craft.name))
            .unwrap_or_default();
        export::telemetry_json(&snapshot, spacecraft_id, &anomalies)
    }

    /// Writes export text to disk.
    pub fn write_export(&self, path: impl AsRef<Path>, contents: &str) -> Result<(), ExportError> {
        let path = path.as_ref();
        export::write_export(path, contents)?;
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "export.written",
            json!({ "path": path.display().to_string(), "bytes": contents.len() }),
        );
        Ok(())
    }

    /// Space-weather status for the current snapshot.
    #[must_use]
    pub fn storm_status(&self) -> StormStatus {
        self.weather.status(&self.snapshot())
    }

    /// Switches protection mode; returns the previous setting.
    pub fn set_protection(&self, active: bool) -> bool {
        self.weather.set_protection(active)
    }

    /// Spacecraft anomalies.
    #[must_use]
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.all()
    }

    /// Executes the recommended action for an anomaly.
    pub fn execute_anomaly_action(&self, id: &str) -> Result<Anomaly, AlertError> {
        self.anomalies.execute_recommended_action(id)
    }
}

/// Builder for [`MissionControl`].
#[derive(Default)]
pub struct MissionControlBuilder {
    config: EngineConfig,
    scenario: Option<MissionScenario>,
    telemetry: Option<OpsTelemetry>,
    source: Option<Box<dyn ValueSource>>,
}

impl MissionControlBuilder {
    /// Uses `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the seed from the configuration.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Populates the engine from `scenario` instead of the default mission.
    #[must_use]
    pub fn scenario(mut self, scenario: MissionScenario) -> Self {
        self.scenario = Some(scenario);
        self
    }

    /// Uses an existing telemetry handle instead of building one from the configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: OpsTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Replaces the seeded random walk.
    #[must_use]
    pub fn value_source(mut self, source: Box<dyn ValueSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Builds the engine, registers the scenario and reconciles the initial alerts.
    pub fn build(self) -> Result<MissionControl> {
        let config = self.config;
        config.validate()?;
        let (telemetry, event_bus) = match self.telemetry {
            Some(telemetry) => (Some(telemetry), None),
            None => {
                let bus = Arc::new(MemoryEventBus::new(config.telemetry.event_backlog));
                let mut builder = OpsTelemetry::builder("mission-control")
                    .min_level(config.telemetry.min_level)
                    .event_publisher(bus.clone());
                if let Some(path) = &config.telemetry.log_path {
                    builder = builder.log_path(path.clone());
                }
                let telemetry = builder.build().context("building mission telemetry")?;
                (Some(telemetry), Some(bus))
            }
        };

        let scenario = self.scenario.unwrap_or_else(default_mission);
        let registry = Arc::new(EntityRegistry::new(RiskClassifier::new(scenario.thresholds)));
        for entity in scenario.entities {
            let id = entity.id().to_string();
            registry
                .register(entity)
                .with_context(|| format!("registering entity {id}"))?;
        }

        let seed = config.seed.unwrap_or_else(random_seed);
        let source = self
            .source
            .unwrap_or_else(|| Box::new(RandomWalk::seeded(seed)));
        let simulator = TelemetrySimulator::new(registry.clone(), source, telemetry.clone());

        let alerts = AlertManager::new(config.alerts.feed_capacity, telemetry.clone());
        for seeded in scenario.seed_alerts {
            let alert = alerts.raise(seeded.alert);
            if seeded.acknowledged {
                alerts.acknowledge(&alert.id)?;
            }
        }
        alerts.reconcile(&registry.snapshot());

        let (snapshots, _) = broadcast::channel(config.snapshot_channel_capacity);
        let core = Arc::new(EngineCore {
            registry,
            simulator,
            alerts,
            snapshots,
            feed_rng: Mutex::new(seeded_rng(seed.wrapping_add(1))),
            feed_enabled: config.alerts.feed_enabled,
        });

        Ok(MissionControl {
            core,
            scheduler: Scheduler::new(telemetry.clone()),
            maneuvers: ManeuverDesk::new(config.maneuver.latency(), telemetry.clone()),
            weather: SpaceWeatherDesk::new(telemetry.clone()),
            anomalies: AnomalyLog::new(scenario.anomalies, telemetry.clone()),
            config,
            seed,
            event_bus,
            telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::Status,
        export::CREW_HEADER,
        simulator::HoldSource,
    };
    use futures::StreamExt;
    use serde_json::Value;
    use tempfile::tempdir;

    fn frozen() -> MissionControl {
        MissionControl::builder()
            .seed(11)
            .value_source(Box::new(HoldSource))
            .build()
            .unwrap()
    }

    #[test]
    fn initial_alerts_combine_seeds_and_thresholds() {
        let mission = frozen();
        // 4 seeded feed alerts plus 8 threshold alerts from the starting values.
        assert_eq!(
            mission.alert_summary(),
            AlertSummary {
                all: 12,
                unacknowledged: 11,
                critical: 3
            }
        );
        let critical = mission.list_alerts(AlertFilter::Critical);
        assert!(critical
            .iter()
            .any(|alert| alert.entity_id == "CONJ-2025-002"
                && alert.condition_kind == "threshold:miss_distance"));
    }

    #[test]
    fn frozen_ticks_do_not_duplicate_alerts() {
        let mission = frozen();
        let before = mission.alert_summary();
        for _ in 0..5 {
            mission.tick_all().unwrap();
        }
        let after = mission.alert_summary();
        // Each alert-feed tick adds one feed alert; threshold alerts stay put.
        assert_eq!(after.all, before.all + 5);
        assert_eq!(mission.registry().group_ticks("debris"), Some(5));
        assert!(matches!(
            mission.tick_group("no-such-group"),
            Err(RegistryError::UnknownGroup(_))
        ));
    }

    #[test]
    fn same_seed_same_run() {
        let run = || {
            let mission = MissionControl::builder().seed(2025).build().unwrap();
            for _ in 0..20 {
                mission.tick_all().unwrap();
            }
            mission.snapshot().entities.clone()
        };
        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn subscribers_receive_tick_snapshots() {
        let mission = frozen();
        let mut all = Box::pin(mission.subscribe(SubscriptionTarget::All));
        let mut chen = Box::pin(mission.subscribe("crew-chen".parse().unwrap()));
        mission.tick_group("crew-vitals").unwrap();

        let full = all.next().await.unwrap();
        assert_eq!(full.group.as_deref(), Some("crew-vitals"));
        assert_eq!(full.entities.len(), mission.registry().len());

        let narrowed = chen.next().await.unwrap();
        assert_eq!(narrowed.entities.len(), 1);
        assert_eq!(narrowed.entities[0].id, "crew-chen");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_drives_groups_until_shutdown() {
        let mission = frozen();
        let mut stream = Box::pin(mission.subscribe(SubscriptionTarget::All));
        mission.start();
        assert_eq!(mission.running_groups().len(), 5);

        let first = stream.next().await.unwrap();
        assert_eq!(first.group.as_deref(), Some("crew-vitals"));
        let second = stream.next().await.unwrap();
        assert_eq!(second.group.as_deref(), Some("debris"));

        assert!(mission.stop_group("debris").await);
        mission.shutdown().await;
        assert!(mission.running_groups().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn maneuvers_validate_before_scheduling() {
        let mission = frozen();
        assert_eq!(
            mission
                .request_maneuver("CONJ-9999", ManeuverType::RadialBoost, 1.0)
                .await,
            Err(ManeuverError::UnknownEntity("CONJ-9999".into()))
        );
        assert!(matches!(
            mission
                .request_maneuver("CONJ-2025-002", ManeuverType::RadialBoost, -2.0)
                .await,
            Err(ManeuverError::InvalidArgument(_))
        ));
        let result = mission
            .request_maneuver("CONJ-2025-002", ManeuverType::RadialBoost, 1.2)
            .await
            .unwrap();
        assert_eq!(result.display().risk_reduction, "88.5");
    }

    #[test]
    fn submit_without_runtime_fails_cleanly() {
        let mission = frozen();
        assert_eq!(
            mission
                .submit_maneuver("CONJ-2025-002", ManeuverRequest::new(ManeuverType::RadialBoost, 1.2))
                .unwrap_err(),
            ManeuverError::NoRuntime
        );
    }

    #[tokio::test]
    async fn bus_events_reach_subscribers_and_backlog() {
        let mission = frozen();
        let mut events = mission.subscribe_events().await.unwrap();
        mission.set_protection(true);
        let toggled = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.event_type == "storm.protection.changed" {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(toggled.payload["active"], true);
        assert!(mission
            .recorded_events()
            .iter()
            .any(|event| event.event_type == "storm.protection.changed"));
        assert!(mission
            .recorded_events()
            .iter()
            .any(|event| event.is_under("alerts")));
    }

    #[tokio::test]
    async fn external_telemetry_has_no_bus() {
        let telemetry = OpsTelemetry::builder("ops-test").build().unwrap();
        let mission = MissionControl::builder()
            .seed(3)
            .telemetry(telemetry)
            .build()
            .unwrap();
        assert!(mission.subscribe_events().await.is_err());
        assert!(mission.recorded_events().is_empty());
    }

    #[test]
    fn exports_read_current_state() {
        let mission = frozen();
        let csv = mission.export_snapshot(ExportFormat::Csv).unwrap();
        assert!(csv.starts_with(&format!("{CREW_HEADER}\n")));
        assert_eq!(csv.matches("\r\n").count(), 3);
        assert!(csv.contains("\r\nDr. Marcus Rodriguez,Flight Engineer,Caution,"));
        assert!(csv.contains(",85,\"125/82\",37.2,97,0.52\r\n"));

        let json: Value = serde_json::from_str(&mission.export_snapshot(ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["alerts"].as_array().map(Vec::len), Some(12));

        let telemetry: Value =
            serde_json::from_str(&mission.export_telemetry("sc-noaa-21").unwrap()).unwrap();
        assert_eq!(telemetry["spacecraft"], "NOAA-21");
        assert_eq!(telemetry["anomalies"].as_array().map(Vec::len), Some(2));

        let conjunctions = mission.export_table(ExportTable::Conjunctions);
        assert!(conjunctions.contains("CONJ-2025-002,Sentinel-3B,Cosmos 1408 Fragment,High,2d 8h,89,"));

        let dir = tempdir().unwrap();
        let path = dir.path().join(ExportTable::Crew.file_name());
        mission.write_export(&path, &csv).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), csv);
    }

    #[test]
    fn protection_and_anomaly_actions() {
        let mission = frozen();
        let idle = mission.storm_status();
        assert_eq!(idle.alert_level(), "G0 - Quiet");
        assert!(idle.assets.iter().all(|asset| asset.risk_reduction_pct == 0.0));

        mission.set_protection(true);
        let active = mission.storm_status();
        assert!(active.protection_active);
        assert_eq!(active.assets[0].risk_reduction_pct, 85.0);

        let resolved = mission.execute_anomaly_action("ANOM-2025-003").unwrap();
        assert_eq!(resolved.auto_action, "Manual override: Action executed.");
        assert!(mission.execute_anomaly_action("ANOM-0").is_err());
    }

    #[test]
    fn acknowledge_and_dismiss_through_facade() {
        let mission = frozen();
        let alert = mission.raise_alert(NewAlert::new("crew-chen", "manual", Status::Critical, "check in"));
        mission.acknowledge_alert(&alert.id).unwrap();
        assert!(mission
            .list_alerts(AlertFilter::Unacknowledged)
            .iter()
            .all(|a| a.id != alert.id));
        mission.dismiss_alert(&alert.id).unwrap();
        assert_eq!(
            mission.dismiss_alert(&alert.id),
            Err(AlertError::NotFound(alert.id.clone()))
        );
    }
}
