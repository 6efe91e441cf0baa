//! Per-group periodic timers.
//!
//! Each group runs on its own tokio task, so tests can drive them with paused
//! virtual time (`tokio::time::advance`) instead of waiting on the wall clock.

use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::helper::{emit, OpsTelemetry};

/// Name and period of one tick group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickGroup {
    /// Group name.
    pub name: String,
    /// Tick period.
    pub interval: Duration,
}

impl TickGroup {
    /// Creates a group.
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }
}

/// Handle to one running group timer.
///
/// Dropping the handle stops the timer at its next wake-up.
#[derive(Debug)]
pub struct GroupHandle {
    name: String,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl GroupHandle {
    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the timer task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the timer and waits for an in-progress tick to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.task).await {
            if !err.is_cancelled() {
                tracing::warn!("tick group {} ended abnormally: {err}", self.name);
            }
        }
    }

    /// Cancels the timer immediately.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawns a timer task calling `job` every `group.interval`.
///
/// The first call happens one full interval after spawning. Must be called
/// inside a tokio runtime.
pub fn spawn_group<F>(group: TickGroup, mut job: F) -> GroupHandle
where
    F: FnMut() + Send + 'static,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let period = group.interval.max(Duration::from_millis(1));
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => job(),
            }
        }
    });
    GroupHandle {
        name: group.name,
        stop: Some(stop_tx),
        task,
    }
}

/// Registry of running group timers.
#[derive(Debug, Default)]
pub struct Scheduler {
    handles: Mutex<IndexMap<String, GroupHandle>>,
    telemetry: Option<OpsTelemetry>,
}

impl Scheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new(telemetry: Option<OpsTelemetry>) -> Self {
        Self {
            handles: Mutex::new(IndexMap::new()),
            telemetry,
        }
    }

    /// Starts `group`, replacing (and aborting) any timer already running under that name.
    pub fn start<F>(&self, group: TickGroup, job: F)
    where
        F: FnMut() + Send + 'static,
    {
        let name = group.name.clone();
        let interval_ms = u64::try_from(group.interval.as_millis()).unwrap_or(u64::MAX);
        let handle = spawn_group(group, job);
        if let Some(previous) = self.handles.lock().insert(name.clone(), handle) {
            previous.abort();
        }
        emit(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "scheduler.group.started",
            json!({ "group": name, "interval_ms": interval_ms }),
        );
    }

    /// Names of running groups.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.handles
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Stops one group. Returns `false` when it was not running.
    pub async fn stop(&self, name: &str) -> bool {
        let handle = self.handles.lock().shift_remove(name);
        match handle {
            Some(handle) => {
                handle.stop().await;
                emit(
                    self.telemetry.as_ref(),
                    LogLevel::Info,
                    "scheduler.group.stopped",
                    json!({ "group": name }),
                );
                true
            }
            None => false,
        }
    }

    /// Stops every group.
    pub async fn shutdown(&self) {
        let handles: Vec<GroupHandle> = self.handles.lock().drain(..).map(|(_, h)| h).collect();
        for handle in handles {
            let name = handle.name().to_string();
            handle.stop().await;
            emit(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "scheduler.group.stopped",
                json!({ "group": name }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };
    use tokio::time::advance;

    fn counter() -> (Arc<AtomicU64>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    /// Moves virtual time forward one second at a time so no deadline is skipped.
    async fn step(secs: u64) {
        for _ in 0..secs {
            advance(Duration::from_secs(1)).await;
            settle().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn groups_tick_on_their_own_intervals() {
        let scheduler = Scheduler::new(None);
        let (crew, crew_job) = counter();
        let (weather, weather_job) = counter();
        scheduler.start(TickGroup::new("crew-vitals", Duration::from_secs(6)), crew_job);
        scheduler.start(TickGroup::new("space-weather", Duration::from_secs(9)), weather_job);
        settle().await;

        step(5).await;
        assert_eq!(crew.load(Ordering::SeqCst), 0);

        step(13).await;
        // t = 18s: crew at 6, 12, 18; weather at 9, 18.
        assert_eq!(crew.load(Ordering::SeqCst), 3);
        assert_eq!(weather.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.running().len(), 2);
        scheduler.shutdown().await;
        assert!(scheduler.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_group_no_longer_ticks() {
        let scheduler = Scheduler::new(None);
        let (debris, debris_job) = counter();
        let (craft, craft_job) = counter();
        scheduler.start(TickGroup::new("debris", Duration::from_secs(7)), debris_job);
        scheduler.start(TickGroup::new("spacecraft", Duration::from_secs(8)), craft_job);
        settle().await;

        step(7).await;
        assert_eq!(debris.load(Ordering::SeqCst), 1);
        assert!(scheduler.stop("debris").await);
        assert!(!scheduler.stop("debris").await);

        step(21).await;
        assert_eq!(debris.load(Ordering::SeqCst), 1);
        assert_eq!(craft.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.running(), vec!["spacecraft".to_string()]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_handle_stops_its_timer() {
        let (count, job) = counter();
        let handle = spawn_group(TickGroup::new("alert-feed", Duration::from_secs(30)), job);
        settle().await;
        drop(handle);
        step(90).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
