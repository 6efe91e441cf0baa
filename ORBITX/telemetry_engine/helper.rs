use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use uuid::Uuid;

/// Builder for [`OpsTelemetry`].
pub struct OpsTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl OpsTelemetryBuilder {
    /// Creates a builder scoped to a component label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<OpsTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        Ok(OpsTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by every engine component.
#[derive(Clone)]
pub struct OpsTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for OpsTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpsTelemetry")
            .field("module", &self.inner.module)
            .field("logging", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl OpsTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> OpsTelemetryBuilder {
        OpsTelemetryBuilder::new(module)
    }

    /// Component label.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Writes a structured log record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let mut record = LogRecord::new(&self.inner.module, level, message);
            if let Value::Object(map) = metadata {
                record.metadata = map;
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes an event.
    ///
    /// Inside a tokio runtime the publish is spawned so callers holding locks
    /// never await. Outside a runtime the event is dropped.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let record = EventRecord {
            id: format!("evt-{}", Uuid::new_v4()),
            source: self.inner.module.clone(),
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let publisher = Arc::clone(publisher);
                handle.spawn(async move {
                    if let Err(err) = publisher.publish(record).await {
                        tracing::debug!("event publish failed: {err}");
                    }
                });
            }
            Err(_) => tracing::debug!("no runtime; dropping event {event_type}"),
        }
        Ok(())
    }

    /// Logs and publishes under the same name.
    pub fn record(&self, level: LogLevel, name: &str, payload: Value) {
        let _ = self.log(level, name, payload.clone());
        let _ = self.event(name, payload);
    }
}

/// Forwards to [`OpsTelemetry::record`] when telemetry is configured.
pub(crate) fn emit(telemetry: Option<&OpsTelemetry>, level: LogLevel, name: &str, payload: Value) {
    if let Some(tel) = telemetry {
        tel.record(level, name, payload);
    }
}

/// Generates a random seed.
#[must_use]
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}

/// Returns a reproducible RNG.
#[must_use]
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(4));
        let log_path = tmp.path().join("engine.log");
        let telemetry = OpsTelemetry::builder("alerts")
            .log_path(&log_path)
            .min_level(LogLevel::Info)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry.record(LogLevel::Info, "alerts.raised", json!({ "entity_id": "crew-rodriguez" }));
        telemetry
            .log(LogLevel::Debug, "alerts.debug", json!({}))
            .unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("alerts.raised"));
        assert!(!content.contains("alerts.debug"));
        assert_eq!(bus.recent("alerts").len(), 1);
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let a: u64 = seeded_rng(7).gen();
        let b: u64 = seeded_rng(7).gen();
        assert_eq!(a, b);
    }
}
