use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Device, Location, LocationKey};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Bounds for a keyset page over one device's locations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBounds {
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// Exclusive lower bound, the last timestamp of the previous page
    pub after: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// Everything the ingestion and query paths need from persistence.
///
/// Implementations must enforce uniqueness of `devices.external_id` and of
/// `(locations.device_id, locations.timestamp)`; the core relies on that
/// constraint as the final arbiter for concurrent writers.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn find_devices_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<Device>, StoreError>;

    /// Insert-or-ignore on `external_id`. Returns how many rows were written.
    async fn insert_devices(&self, devices: &[Device]) -> Result<u64, StoreError>;

    /// Writes the last-seen cache (`last_seen_at`, `last_lat`, `last_lon`),
    /// never moving `last_seen_at` backwards.
    async fn update_device_positions(&self, devices: &[Device]) -> Result<(), StoreError>;

    /// Keys of stored locations for `device_ids` with `from <= timestamp <= to`.
    async fn existing_location_keys(
        &self,
        device_ids: &[Uuid],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationKey>, StoreError>;

    /// Insert-or-ignore on `(device_id, timestamp)`. Returns the keys of the
    /// rows actually written.
    async fn insert_locations(&self, locations: &[Location]) -> Result<Vec<LocationKey>, StoreError>;

    async fn find_device(&self, external_id: &str) -> Result<Option<Device>, StoreError>;

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Newest stored location for each of `device_ids` that has any.
    async fn latest_locations(&self, device_ids: &[Uuid]) -> Result<Vec<Location>, StoreError>;

    /// Up to `bounds.limit` locations for a device, ascending by timestamp.
    async fn location_page(
        &self,
        device_id: Uuid,
        bounds: PageBounds,
    ) -> Result<Vec<Location>, StoreError>;
}
