use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Sub-second digits kept on stored timestamps (Postgres stores microseconds).
pub const TIMESTAMP_PRECISION_DIGITS: u16 = 6;

/// Truncates a timestamp to the storage resolution so that points differing
/// only by sub-resolution jitter share an idempotency key.
pub fn truncate_to_storage_resolution(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(TIMESTAMP_PRECISION_DIGITS)
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Location {
    pub id: Uuid,
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f32>,
    pub heading: Option<f32>,
    pub accuracy: Option<f32>,
    pub ingested_at: DateTime<Utc>,
}

impl Location {
    pub fn key(&self) -> LocationKey {
        LocationKey {
            device_id: self.device_id,
            timestamp: self.timestamp,
        }
    }
}

/// Idempotency key of a location row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRow)]
pub struct LocationKey {
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Client-facing view of a location row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPoint {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f32>,
    pub heading: Option<f32>,
    pub accuracy: Option<f32>,
}

impl From<&Location> for LocationPoint {
    fn from(location: &Location) -> Self {
        Self {
            timestamp: location.timestamp,
            lat: location.lat,
            lon: location.lon,
            speed: location.speed,
            heading: location.heading,
            accuracy: location.accuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_truncation_collapses_sub_microsecond_jitter() {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::microseconds(42);
        let jittered = base + Duration::nanoseconds(700);

        assert_ne!(base, jittered);
        assert_eq!(
            truncate_to_storage_resolution(base),
            truncate_to_storage_resolution(jittered)
        );
        assert_eq!(truncate_to_storage_resolution(base), base);
    }
}
