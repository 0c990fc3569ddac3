use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PageBounds, TelemetryStore};
use crate::error::StoreError;
use crate::models::{Device, Location, LocationKey};

#[derive(Default)]
struct Tables {
    // keyed by external_id, which is unique
    devices: HashMap<String, Device>,
    // keyed by the idempotency key, ordered for range scans
    locations: BTreeMap<(Uuid, DateTime<Utc>), Location>,
}

/// In-process store with the same uniqueness rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_location_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `insert_locations` call fail until reset.
    pub fn fail_location_inserts(&self, fail: bool) {
        self.fail_location_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn location_count(&self) -> usize {
        self.tables.lock().await.locations.len()
    }

    pub async fn device_count(&self) -> usize {
        self.tables.lock().await.devices.len()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn find_devices_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<Device>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(external_ids
            .iter()
            .filter_map(|id| tables.devices.get(id).cloned())
            .collect())
    }

    async fn insert_devices(&self, devices: &[Device]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut written = 0;
        for device in devices {
            if !tables.devices.contains_key(&device.external_id) {
                tables
                    .devices
                    .insert(device.external_id.clone(), device.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn update_device_positions(&self, devices: &[Device]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        for update in devices {
            let Some(seen) = update.last_seen_at else {
                continue;
            };
            if let Some(stored) = tables.devices.get_mut(&update.external_id) {
                if stored.id != update.id {
                    continue;
                }
                if stored.last_seen_at.map_or(true, |current| current < seen) {
                    stored.last_seen_at = Some(seen);
                    stored.last_lat = update.last_lat;
                    stored.last_lon = update.last_lon;
                }
            }
        }
        Ok(())
    }

    async fn existing_location_keys(
        &self,
        device_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationKey>, StoreError> {
        let tables = self.tables.lock().await;
        let mut keys = Vec::new();
        for device_id in device_ids {
            keys.extend(
                tables
                    .locations
                    .range((*device_id, from)..=(*device_id, to))
                    .map(|(_, location)| location.key()),
            );
        }
        Ok(keys)
    }

    async fn insert_locations(&self, locations: &[Location]) -> Result<Vec<LocationKey>, StoreError> {
        if self.fail_location_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("location insert failed".to_string()));
        }
        let mut tables = self.tables.lock().await;
        let mut inserted = Vec::new();
        for location in locations {
            let key = (location.device_id, location.timestamp);
            if tables.locations.contains_key(&key) {
                continue;
            }
            tables.locations.insert(key, location.clone());
            inserted.push(location.key());
        }
        Ok(inserted)
    }

    async fn find_device(&self, external_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.tables.lock().await.devices.get(external_id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let tables = self.tables.lock().await;
        let mut devices: Vec<Device> = tables.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(devices)
    }

    async fn latest_locations(&self, device_ids: &[Uuid]) -> Result<Vec<Location>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(device_ids
            .iter()
            .filter_map(|device_id| {
                tables
                    .locations
                    .range((*device_id, DateTime::<Utc>::MIN_UTC)..=(*device_id, DateTime::<Utc>::MAX_UTC))
                    .next_back()
                    .map(|(_, location)| location.clone())
            })
            .collect())
    }

    async fn location_page(
        &self,
        device_id: Uuid,
        bounds: PageBounds,
    ) -> Result<Vec<Location>, StoreError> {
        let tables = self.tables.lock().await;
        let limit = usize::try_from(bounds.limit).unwrap_or(0);
        Ok(tables
            .locations
            .range((device_id, DateTime::<Utc>::MIN_UTC)..=(device_id, DateTime::<Utc>::MAX_UTC))
            .map(|(_, location)| location)
            .filter(|l| bounds.from.map_or(true, |from| l.timestamp >= from))
            .filter(|l| bounds.to.map_or(true, |to| l.timestamp <= to))
            .filter(|l| bounds.after.map_or(true, |after| l.timestamp > after))
            .take(limit)
            .cloned()
            .collect())
    }
}
