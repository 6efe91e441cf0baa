#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event bus abstractions used to fan engine events (ticks, alert transitions,
//! maneuver outcomes) out to observers.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};

/// Event record encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier.
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Dotted event type (e.g. `alerts.raised`).
    pub event_type: String,
    /// RFC3339 timestamp.
    pub timestamp: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Whether the event type equals `prefix` or sits under it (`alerts` matches `alerts.raised`).
    #[must_use]
    pub fn is_under(&self, prefix: &str) -> bool {
        self.event_type == prefix
            || self
                .event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    async fn publish(&self, event: EventRecord) -> Result<()>;
}

/// Event subscriber interface.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver observing every event published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>>;
}

/// In-memory broadcast bus that also keeps the most recent events.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<EventRecord>,
    capacity: usize,
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events under the given type prefix, oldest first.
    #[must_use]
    pub fn recent(&self, prefix: &str) -> Vec<EventRecord> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.is_under(prefix))
            .cloned()
            .collect()
    }
}

/// Publisher appending JSON lines to a file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher writing to `path`, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // No live subscribers is not an error; the backlog still has the event.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn event(event_type: &str) -> EventRecord {
        EventRecord {
            id: format!("evt-{event_type}"),
            source: "alerts".into(),
            event_type: event_type.into(),
            timestamp: "2025-09-14T02:20:15Z".into(),
            payload: serde_json::json!({ "entity_id": "conj-2025-002" }),
        }
    }

    #[tokio::test]
    async fn publishes_and_receives() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe().await.unwrap();
        bus.publish(event("alerts.raised")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "alerts.raised");
    }

    #[tokio::test]
    async fn backlog_is_bounded_and_filterable() {
        let bus = MemoryEventBus::new(2);
        bus.publish(event("alerts.raised")).await.unwrap();
        bus.publish(event("telemetry.tick.completed")).await.unwrap();
        bus.publish(event("alerts.dismissed")).await.unwrap();
        let retained = bus.snapshot();
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[0].event_type, "telemetry.tick.completed");
        assert_eq!(bus.recent("alerts").len(), 1);
        assert!(bus.recent("alert").is_empty());
    }

    #[tokio::test]
    async fn file_publisher_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events/ops.jsonl");
        let publisher = FileEventPublisher::new(&path).unwrap();
        publisher.publish(event("maneuver.completed")).await.unwrap();
        publisher.publish(event("maneuver.superseded")).await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("maneuver.superseded"));
    }
}
