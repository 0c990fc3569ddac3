//! Coalescing real-time broadcaster.
//!
//! Producers overwrite the pending entry for a device; a single flush task
//! drains every pending entry on a fixed tick and hands each one to all
//! subscribers. Under a burst, subscribers see at most one event per device
//! per tick, carrying the newest value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::LocationPoint;

pub mod subscriber;

pub use subscriber::{ChannelSubscriber, KafkaSubscriber, Subscriber};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_PENDING: usize = 10_000;
/// Flushed batches a subscriber may fall behind by before batches are dropped.
const SUBSCRIBER_BACKLOG: usize = 8;

/// The event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdated {
    pub external_id: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f32>,
    pub heading: Option<f32>,
    pub accuracy: Option<f32>,
}

impl DeviceUpdated {
    pub fn new(external_id: &str, point: LocationPoint) -> Self {
        Self {
            external_id: external_id.to_string(),
            timestamp: point.timestamp,
            lat: point.lat,
            lon: point.lon,
            speed: point.speed,
            heading: point.heading,
            accuracy: point.accuracy,
        }
    }
}

pub struct Broadcaster {
    pending: DashMap<String, DeviceUpdated>,
    max_pending: usize,
    subscribers: Vec<Arc<dyn Subscriber>>,
    dropped: AtomicU64,
    running: AtomicBool,
}

impl Broadcaster {
    pub fn new(max_pending: usize, subscribers: Vec<Arc<dyn Subscriber>>) -> Self {
        Self {
            pending: DashMap::new(),
            max_pending: max_pending.max(1),
            subscribers,
            dropped: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Records the latest point for a device. Never blocks on delivery.
    ///
    /// A pending entry is replaced unless it already holds a strictly newer
    /// timestamp. When the pending map is full, updates for devices that are
    /// not already pending are dropped.
    pub fn publish(&self, external_id: &str, point: LocationPoint) {
        if self.pending.len() >= self.max_pending && !self.pending.contains_key(external_id) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                external_id,
                pending = self.pending.len(),
                dropped_total = dropped,
                "Dropping telemetry update, pending queue full"
            );
            return;
        }

        let update = DeviceUpdated::new(external_id, point);
        match self.pending.entry(external_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().timestamp <= update.timestamp {
                    entry.insert(update);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(update);
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, external_id: &str) -> Option<DeviceUpdated> {
        self.pending.get(external_id).map(|entry| entry.value().clone())
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flush loop. Runs until `shutdown` fires; only one loop may run per
    /// broadcaster.
    ///
    /// Each subscriber is fed by its own worker through a bounded queue of
    /// flushed batches, so a slow subscriber only delays itself. A batch that
    /// finds a subscriber's queue full is dropped for that subscriber.
    pub async fn run(self: Arc<Self>, flush_interval: Duration, shutdown: CancellationToken) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Broadcaster flush loop already running, ignoring second start");
            return;
        }
        info!(
            "Telemetry broadcaster started (interval: {}ms, subscribers: {})",
            flush_interval.as_millis(),
            self.subscribers.len()
        );

        let mut outlets = Vec::with_capacity(self.subscribers.len());
        let mut workers = Vec::with_capacity(self.subscribers.len());
        for subscriber in &self.subscribers {
            let (tx, rx) = mpsc::channel(SUBSCRIBER_BACKLOG);
            outlets.push(Outlet {
                name: subscriber.name().to_string(),
                batches: tx,
            });
            workers.push(tokio::spawn(forward_batches(subscriber.clone(), rx)));
        }

        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.dispatch(&outlets);
                }
            }
        }

        self.dispatch(&outlets);
        drop(outlets);
        join_all(workers).await;
        self.running.store(false, Ordering::SeqCst);
        info!("Telemetry broadcaster stopped");
    }

    /// Snapshots and clears every pending entry.
    fn drain(&self) -> Vec<DeviceUpdated> {
        let keys: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        keys.iter()
            .filter_map(|key| self.pending.remove(key).map(|(_, update)| update))
            .collect()
    }

    fn dispatch(&self, outlets: &[Outlet]) {
        let batch = self.drain();
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        let batch: Arc<[DeviceUpdated]> = batch.into();

        for outlet in outlets {
            match outlet.batches.try_send(batch.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(count as u64, Ordering::Relaxed) + count as u64;
                    warn!(
                        subscriber = %outlet.name,
                        devices = count,
                        dropped_total = dropped,
                        "Subscriber backlog full, dropping flushed updates"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    error!(subscriber = %outlet.name, "Subscriber worker stopped");
                }
            }
        }

        debug!(devices = count, "Flushed pending device updates");
    }
}

struct Outlet {
    name: String,
    batches: mpsc::Sender<Arc<[DeviceUpdated]>>,
}

async fn forward_batches(
    subscriber: Arc<dyn Subscriber>,
    mut batches: mpsc::Receiver<Arc<[DeviceUpdated]>>,
) {
    while let Some(batch) = batches.recv().await {
        let subscriber = &subscriber;
        let deliveries = batch.iter().map(|update| async move {
            if let Err(e) = subscriber.deliver(update).await {
                error!(
                    subscriber = subscriber.name(),
                    external_id = %update.external_id,
                    "Error broadcasting telemetry: {}",
                    e
                );
            }
        });
        join_all(deliveries).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSubscriber {
        events: Mutex<Vec<DeviceUpdated>>,
    }

    #[async_trait]
    impl Subscriber for RecordingSubscriber {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, event: &DeviceUpdated) -> Result<(), DeliveryError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSubscriber;

    #[async_trait]
    impl Subscriber for FailingSubscriber {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _event: &DeviceUpdated) -> Result<(), DeliveryError> {
            let err = serde_json::from_str::<u8>("x").unwrap_err();
            Err(DeliveryError::Encode(err))
        }
    }

    /// Stands in for a broker that is slow to acknowledge.
    struct SlowSubscriber {
        delay: Duration,
    }

    #[async_trait]
    impl Subscriber for SlowSubscriber {
        fn name(&self) -> &str {
            "slow"
        }

        async fn deliver(&self, _event: &DeviceUpdated) -> Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn point(secs: i64, lat: f64) -> LocationPoint {
        LocationPoint {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            lat,
            lon: -lat,
            speed: Some(lat as f32),
            heading: None,
            accuracy: None,
        }
    }

    #[tokio::test]
    async fn test_burst_coalesces_to_last_update() {
        let broadcaster = Broadcaster::new(DEFAULT_MAX_PENDING, Vec::new());

        for i in 1..=10 {
            broadcaster.publish("dev-1", point(i, i as f64));
        }
        let batch = broadcaster.drain();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].external_id, "dev-1");
        assert_eq!(batch[0].lat, 10.0);
        assert_eq!(batch[0].speed, Some(10.0));
    }

    #[tokio::test]
    async fn test_older_point_does_not_replace_pending_newer_one() {
        let broadcaster = Broadcaster::new(DEFAULT_MAX_PENDING, Vec::new());

        broadcaster.publish("dev-1", point(20, 2.0));
        broadcaster.publish("dev-1", point(10, 1.0));

        assert_eq!(broadcaster.pending("dev-1").unwrap().lat, 2.0);
    }

    #[tokio::test]
    async fn test_drain_clears_pending_map() {
        let broadcaster = Broadcaster::new(DEFAULT_MAX_PENDING, Vec::new());

        broadcaster.publish("a", point(1, 1.0));
        broadcaster.publish("b", point(1, 2.0));
        assert_eq!(broadcaster.drain().len(), 2);
        assert_eq!(broadcaster.pending_len(), 0);
        assert!(broadcaster.drain().is_empty());
    }

    #[tokio::test]
    async fn test_full_pending_map_drops_new_devices_only() {
        let broadcaster = Broadcaster::new(2, Vec::new());

        broadcaster.publish("a", point(1, 1.0));
        broadcaster.publish("b", point(1, 1.0));
        broadcaster.publish("c", point(1, 1.0));
        assert_eq!(broadcaster.pending_len(), 2);
        assert!(broadcaster.pending("c").is_none());
        assert_eq!(broadcaster.dropped(), 1);

        broadcaster.publish("a", point(2, 5.0));
        assert_eq!(broadcaster.pending("a").unwrap().lat, 5.0);
        assert_eq!(broadcaster.dropped(), 1);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let recorder = Arc::new(RecordingSubscriber::default());
        let subscribers: Vec<Arc<dyn Subscriber>> = vec![Arc::new(FailingSubscriber), recorder.clone()];
        let broadcaster = Arc::new(Broadcaster::new(DEFAULT_MAX_PENDING, subscribers));
        let shutdown = CancellationToken::new();

        broadcaster.publish("a", point(1, 1.0));
        broadcaster.publish("b", point(1, 2.0));
        // Cancelled up front: the final flush still delivers before run returns
        shutdown.cancel();
        broadcaster
            .clone()
            .run(Duration::from_millis(10), shutdown)
            .await;

        assert_eq!(recorder.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_delay_channel_viewers() {
        let channel = Arc::new(ChannelSubscriber::new(64));
        let mut rx = channel.subscribe();
        let subscribers: Vec<Arc<dyn Subscriber>> = vec![
            Arc::new(SlowSubscriber { delay: Duration::from_millis(300) }),
            channel.clone(),
        ];
        let broadcaster = Arc::new(Broadcaster::new(DEFAULT_MAX_PENDING, subscribers));
        let shutdown = CancellationToken::new();

        for i in 0..20 {
            broadcaster.publish(&format!("dev-{i}"), point(1, i as f64));
        }
        let handle = tokio::spawn(
            broadcaster
                .clone()
                .run(Duration::from_millis(50), shutdown.clone()),
        );

        // One slow acknowledgement per device would take six seconds
        let received = tokio::time::timeout(Duration::from_millis(200), async {
            let mut seen = 0;
            while seen < 20 {
                rx.recv().await.unwrap();
                seen += 1;
            }
            seen
        })
        .await
        .expect("all devices within one interval");
        assert_eq!(received, 20);

        // The next tick is not held back by the slow subscriber either
        broadcaster.publish("late", point(2, 1.0));
        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("next flush while slow subscriber is busy")
            .unwrap();
        assert_eq!(event.external_id, "late");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_delivers_to_channel_until_shutdown() {
        let channel = Arc::new(ChannelSubscriber::new(16));
        let mut rx = channel.subscribe();
        let subscribers: Vec<Arc<dyn Subscriber>> = vec![channel.clone()];
        let broadcaster = Arc::new(Broadcaster::new(DEFAULT_MAX_PENDING, subscribers));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(
            broadcaster
                .clone()
                .run(Duration::from_millis(10), shutdown.clone()),
        );

        broadcaster.publish("dev-9", point(3, 3.0));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert_eq!(event.external_id, "dev-9");
        assert_eq!(event.lat, 3.0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = DeviceUpdated::new("dev-1", point(0, 1.5));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["externalId"], "dev-1");
        assert_eq!(json["lat"], 1.5);
        assert!(json.get("accuracy").is_some());
    }
}
