use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::location::LocationPoint;

/// Default window within which a device counts as active.
pub const DEFAULT_ACTIVE_THRESHOLD_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub external_id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    // Cache of the newest accepted point
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
}

impl Device {
    /// A device seen for the first time. `name` defaults to the external id.
    pub fn first_sighting(external_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: Some(external_id.to_string()),
            created_at: now,
            last_seen_at: Some(now),
            last_lat: None,
            last_lon: None,
        }
    }

    /// Moves the cached position forward if `timestamp` is strictly newer.
    /// Returns whether the cache changed.
    pub fn observe(&mut self, timestamp: DateTime<Utc>, lat: f64, lon: f64) -> bool {
        if self.last_seen_at.is_some_and(|seen| timestamp <= seen) {
            return false;
        }
        self.last_seen_at = Some(timestamp);
        self.last_lat = Some(lat);
        self.last_lon = Some(lon);
        true
    }

    pub fn is_active(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        is_active(self.last_seen_at, now, threshold)
    }
}

/// A device is active when it was seen within `threshold` of `now`,
/// boundary included.
pub fn is_active(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match last_seen {
        Some(seen) => seen >= now - threshold,
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    /// External id
    pub id: String,
    pub name: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_location_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetail {
    /// External id
    pub id: String,
    pub name: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub latest_location: Option<LocationPoint>,
}
