use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::validator::{validate, ValidPoint};
use crate::broadcaster::Broadcaster;
use crate::db::TelemetryStore;
use crate::error::StoreError;
use crate::models::location::truncate_to_storage_resolution;
use crate::models::{Device, Location, LocationKey, LocationPoint, TelemetryPoint};

/// Outcome counts for one batch. `duplicates` covers both repeats inside
/// the payload and points already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

pub struct IngestionPipeline {
    store: Arc<dyn TelemetryStore>,
    broadcaster: Arc<Broadcaster>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn TelemetryStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Validates, deduplicates and persists a batch, then hands every newly
    /// stored point to the broadcaster.
    ///
    /// Rejected and duplicate points are folded into the returned counts.
    /// Only storage failures are returned as errors; device rows created
    /// before such a failure stay, and re-sending the batch is safe.
    #[instrument(skip_all, fields(points = points.len()))]
    pub async fn ingest(&self, points: Vec<TelemetryPoint>) -> Result<IngestResult, StoreError> {
        let now = Utc::now();
        let mut result = IngestResult::default();

        let mut valid = Vec::with_capacity(points.len());
        for mut point in points {
            point.timestamp = point.timestamp.map(truncate_to_storage_resolution);
            match validate(&point) {
                Ok(p) => valid.push(p),
                Err(reason) => {
                    result.rejected += 1;
                    debug!(device_id = %point.device_id, %reason, "Rejected telemetry point");
                }
            }
        }

        let received = valid.len();
        let unique = dedup_payload(valid);
        result.duplicates += received - unique.len();

        if unique.is_empty() {
            info!(
                "Ingested batch: accepted=0, duplicates={}, rejected={}",
                result.duplicates, result.rejected
            );
            return Ok(result);
        }

        let newest = newest_per_device(&unique);
        let mut devices = self.resolve_devices(&newest, now).await?;

        // Bounded superset read, filtered exactly in memory
        let device_ids: Vec<Uuid> = devices.values().map(|d| d.id).collect();
        let (min_ts, max_ts) = timestamp_span(&unique);
        let existing: HashSet<LocationKey> = self
            .store
            .existing_location_keys(&device_ids, min_ts, max_ts)
            .await?
            .into_iter()
            .collect();

        let mut staged = Vec::with_capacity(unique.len());
        let mut origin: HashMap<LocationKey, &ValidPoint> = HashMap::with_capacity(unique.len());
        for point in &unique {
            let device = devices.get(point.device_id.as_str()).ok_or_else(|| {
                StoreError::Unavailable(format!("device {} missing after upsert", point.device_id))
            })?;
            let location = to_location(device.id, point, now);
            let key = location.key();
            if existing.contains(&key) {
                result.duplicates += 1;
                continue;
            }
            origin.insert(key, point);
            staged.push(location);
        }

        // Conflicts with concurrent writers are skipped by the store and
        // surface here as rows missing from the returned keys.
        let inserted = if staged.is_empty() {
            Vec::new()
        } else {
            self.store.insert_locations(&staged).await?
        };
        result.accepted = inserted.len();
        result.duplicates += staged.len() - inserted.len();

        // Every unique point is stored by now, whether this call wrote it or
        // an earlier attempt did, so the cache follows the batch's newest.
        let mut moved = Vec::new();
        for point in newest.values() {
            if let Some(device) = devices.get_mut(point.device_id.as_str()) {
                if device.observe(point.timestamp, point.lat, point.lon) {
                    moved.push(device.clone());
                }
            }
        }
        if !moved.is_empty() {
            self.store.update_device_positions(&moved).await?;
        }

        for point in inserted.iter().filter_map(|key| origin.get(key)) {
            self.broadcaster
                .publish(&point.device_id, location_point(point));
        }

        info!(
            "Ingested batch: accepted={}, duplicates={}, rejected={}",
            result.accepted, result.duplicates, result.rejected
        );
        Ok(result)
    }

    /// Loads every device in the batch, creating the ones seen for the first
    /// time. Concurrent batches may race to create the same device; the
    /// store keeps one and the loser reloads it.
    async fn resolve_devices(
        &self,
        newest: &HashMap<&str, &ValidPoint>,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Device>, StoreError> {
        let external_ids: Vec<String> = newest.keys().map(|id| id.to_string()).collect();
        let mut devices: HashMap<String, Device> = self
            .store
            .find_devices_by_external_ids(&external_ids)
            .await?
            .into_iter()
            .map(|d| (d.external_id.clone(), d))
            .collect();

        let fresh: Vec<Device> = newest
            .iter()
            .filter(|(id, _)| !devices.contains_key(**id))
            .map(|(id, point)| {
                let mut device = Device::first_sighting(id, now);
                device.last_lat = Some(point.lat);
                device.last_lon = Some(point.lon);
                device
            })
            .collect();

        if fresh.is_empty() {
            return Ok(devices);
        }

        let written = self.store.insert_devices(&fresh).await?;
        info!("Registered {} new device(s)", written);

        if written < fresh.len() as u64 {
            let ids: Vec<String> = fresh.iter().map(|d| d.external_id.clone()).collect();
            for device in self.store.find_devices_by_external_ids(&ids).await? {
                devices.insert(device.external_id.clone(), device);
            }
        } else {
            for device in fresh {
                devices.insert(device.external_id.clone(), device);
            }
        }
        Ok(devices)
    }
}

/// Keeps the first point for each `(device_id, timestamp)` pair.
fn dedup_payload(points: Vec<ValidPoint>) -> Vec<ValidPoint> {
    let mut seen = HashSet::with_capacity(points.len());
    points
        .into_iter()
        .filter(|p| seen.insert((p.device_id.clone(), p.timestamp)))
        .collect()
}

fn newest_per_device(points: &[ValidPoint]) -> HashMap<&str, &ValidPoint> {
    let mut newest: HashMap<&str, &ValidPoint> = HashMap::new();
    for point in points {
        newest
            .entry(point.device_id.as_str())
            .and_modify(|current| {
                if point.timestamp > current.timestamp {
                    *current = point;
                }
            })
            .or_insert(point);
    }
    newest
}

fn timestamp_span(points: &[ValidPoint]) -> (DateTime<Utc>, DateTime<Utc>) {
    let min = points.iter().map(|p| p.timestamp).min().unwrap_or(DateTime::<Utc>::MIN_UTC);
    let max = points.iter().map(|p| p.timestamp).max().unwrap_or(DateTime::<Utc>::MAX_UTC);
    (min, max)
}

fn to_location(device_id: Uuid, point: &ValidPoint, now: DateTime<Utc>) -> Location {
    Location {
        id: Uuid::new_v4(),
        device_id,
        timestamp: point.timestamp,
        lat: point.lat,
        lon: point.lon,
        speed: point.speed,
        heading: point.heading,
        accuracy: point.accuracy,
        ingested_at: now,
    }
}

fn location_point(point: &ValidPoint) -> LocationPoint {
    LocationPoint {
        timestamp: point.timestamp,
        lat: point.lat,
        lon: point.lon,
        speed: point.speed,
        heading: point.heading,
        accuracy: point.accuracy,
    }
}
