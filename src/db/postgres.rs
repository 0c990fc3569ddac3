use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{queries, DbPool, PageBounds, TelemetryStore};
use crate::error::StoreError;
use crate::models::{Device, Location, LocationKey};

/// Postgres-backed store. Bulk writes bind one array per column and expand
/// them with `UNNEST`, so each call is a single round-trip.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn find_devices_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<Device>, StoreError> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let devices = sqlx::query_as::<_, Device>(queries::SELECT_DEVICES_BY_EXTERNAL_IDS)
            .bind(external_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn insert_devices(&self, devices: &[Device]) -> Result<u64, StoreError> {
        if devices.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = devices.iter().map(|d| d.id).collect();
        let external_ids: Vec<String> = devices.iter().map(|d| d.external_id.clone()).collect();
        let names: Vec<Option<String>> = devices.iter().map(|d| d.name.clone()).collect();
        let created: Vec<DateTime<Utc>> = devices.iter().map(|d| d.created_at).collect();
        let last_seen: Vec<Option<DateTime<Utc>>> = devices.iter().map(|d| d.last_seen_at).collect();
        let last_lat: Vec<Option<f64>> = devices.iter().map(|d| d.last_lat).collect();
        let last_lon: Vec<Option<f64>> = devices.iter().map(|d| d.last_lon).collect();

        let result = sqlx::query(queries::INSERT_DEVICES)
            .bind(ids)
            .bind(external_ids)
            .bind(names)
            .bind(created)
            .bind(last_seen)
            .bind(last_lat)
            .bind(last_lon)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_device_positions(&self, devices: &[Device]) -> Result<(), StoreError> {
        let updates: Vec<&Device> = devices.iter().filter(|d| d.last_seen_at.is_some()).collect();
        if updates.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = updates.iter().map(|d| d.id).collect();
        let last_seen: Vec<Option<DateTime<Utc>>> = updates.iter().map(|d| d.last_seen_at).collect();
        let last_lat: Vec<Option<f64>> = updates.iter().map(|d| d.last_lat).collect();
        let last_lon: Vec<Option<f64>> = updates.iter().map(|d| d.last_lon).collect();

        sqlx::query(queries::UPDATE_DEVICE_POSITIONS)
            .bind(ids)
            .bind(last_seen)
            .bind(last_lat)
            .bind(last_lon)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn existing_location_keys(
        &self,
        device_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationKey>, StoreError> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys = sqlx::query_as::<_, LocationKey>(queries::SELECT_LOCATION_KEYS_IN_RANGE)
            .bind(device_ids)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    async fn insert_locations(&self, locations: &[Location]) -> Result<Vec<LocationKey>, StoreError> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = locations.iter().map(|l| l.id).collect();
        let device_ids: Vec<Uuid> = locations.iter().map(|l| l.device_id).collect();
        let timestamps: Vec<DateTime<Utc>> = locations.iter().map(|l| l.timestamp).collect();
        let lats: Vec<f64> = locations.iter().map(|l| l.lat).collect();
        let lons: Vec<f64> = locations.iter().map(|l| l.lon).collect();
        let speeds: Vec<Option<f32>> = locations.iter().map(|l| l.speed).collect();
        let headings: Vec<Option<f32>> = locations.iter().map(|l| l.heading).collect();
        let accuracies: Vec<Option<f32>> = locations.iter().map(|l| l.accuracy).collect();
        let ingested: Vec<DateTime<Utc>> = locations.iter().map(|l| l.ingested_at).collect();

        let inserted = sqlx::query_as::<_, LocationKey>(queries::INSERT_LOCATIONS)
            .bind(ids)
            .bind(device_ids)
            .bind(timestamps)
            .bind(lats)
            .bind(lons)
            .bind(speeds)
            .bind(headings)
            .bind(accuracies)
            .bind(ingested)
            .fetch_all(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn find_device(&self, external_id: &str) -> Result<Option<Device>, StoreError> {
        let device = sqlx::query_as::<_, Device>(queries::SELECT_DEVICE_BY_EXTERNAL_ID)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let devices = sqlx::query_as::<_, Device>(queries::SELECT_ALL_DEVICES)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn latest_locations(&self, device_ids: &[Uuid]) -> Result<Vec<Location>, StoreError> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }
        let locations = sqlx::query_as::<_, Location>(queries::SELECT_LATEST_LOCATIONS)
            .bind(device_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(locations)
    }

    async fn location_page(
        &self,
        device_id: Uuid,
        bounds: PageBounds,
    ) -> Result<Vec<Location>, StoreError> {
        let locations = sqlx::query_as::<_, Location>(queries::SELECT_LOCATION_PAGE)
            .bind(device_id)
            .bind(bounds.from)
            .bind(bounds.to)
            .bind(bounds.after)
            .bind(bounds.limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(locations)
    }
}
