use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::TelemetryPoint;

/// A point that passed validation, with every required field present.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPoint {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f32>,
    pub heading: Option<f32>,
    pub accuracy: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingDeviceId,
    MissingTimestamp,
    LatitudeOutOfRange,
    LongitudeOutOfRange,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            RejectReason::MissingDeviceId => "device id must not be empty",
            RejectReason::MissingTimestamp => "timestamp is required",
            RejectReason::LatitudeOutOfRange => "latitude must be between -90 and 90",
            RejectReason::LongitudeOutOfRange => "longitude must be between -180 and 180",
        };
        f.write_str(message)
    }
}

/// Structural and range checks for one point. Pure, no I/O.
pub fn validate(point: &TelemetryPoint) -> Result<ValidPoint, RejectReason> {
    if point.device_id.trim().is_empty() {
        return Err(RejectReason::MissingDeviceId);
    }
    let lat = point
        .lat
        .filter(|lat| (-90.0..=90.0).contains(lat))
        .ok_or(RejectReason::LatitudeOutOfRange)?;
    let lon = point
        .lon
        .filter(|lon| (-180.0..=180.0).contains(lon))
        .ok_or(RejectReason::LongitudeOutOfRange)?;
    let timestamp = point.timestamp.ok_or(RejectReason::MissingTimestamp)?;

    Ok(ValidPoint {
        device_id: point.device_id.clone(),
        timestamp,
        lat,
        lon,
        speed: point.speed,
        heading: point.heading,
        accuracy: point.accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> TelemetryPoint {
        TelemetryPoint {
            device_id: "dev-1".to_string(),
            timestamp: Some(Utc::now()),
            lat: Some(lat),
            lon: Some(lon),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_boundaries() {
        assert!(validate(&point(90.0, 180.0)).is_ok());
        assert!(validate(&point(-90.0, -180.0)).is_ok());
        assert!(validate(&point(0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        assert_eq!(validate(&point(91.0, 0.0)), Err(RejectReason::LatitudeOutOfRange));
        assert_eq!(validate(&point(0.0, -181.0)), Err(RejectReason::LongitudeOutOfRange));
        assert_eq!(validate(&point(f64::NAN, 0.0)), Err(RejectReason::LatitudeOutOfRange));
    }

    #[test]
    fn test_rejects_missing_fields() {
        let mut p = point(1.0, 1.0);
        p.device_id = "  ".to_string();
        assert_eq!(validate(&p), Err(RejectReason::MissingDeviceId));

        let mut p = point(1.0, 1.0);
        p.timestamp = None;
        assert_eq!(validate(&p), Err(RejectReason::MissingTimestamp));

        let mut p = point(1.0, 1.0);
        p.lon = None;
        assert_eq!(validate(&p), Err(RejectReason::LongitudeOutOfRange));
    }
}
