use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single telemetry sample as sent by a device.
///
/// Fields are deliberately lenient: a value that is missing or cannot be
/// parsed becomes `None` so the validator can reject the point on its own,
/// without failing the rest of the batch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPoint {
    #[serde(default)]
    pub device_id: String,
    #[serde(default, deserialize_with = "parse_timestamp_option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "parse_f32_option")]
    pub speed: Option<f32>,
    #[serde(default, deserialize_with = "parse_f32_option")]
    pub heading: Option<f32>,
    #[serde(default, deserialize_with = "parse_f32_option")]
    pub accuracy: Option<f32>,
}

/// The shapes a telemetry payload may arrive in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TelemetryBatch {
    Many(Vec<TelemetryPoint>),
    Wrapped { points: Vec<TelemetryPoint> },
    One(TelemetryPoint),
}

impl TelemetryBatch {
    pub fn into_points(self) -> Vec<TelemetryPoint> {
        match self {
            TelemetryBatch::Many(points) => points,
            TelemetryBatch::Wrapped { points } => points,
            TelemetryBatch::One(point) => vec![point],
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(StringOrFloat::Float(f)) => Some(f),
        Some(StringOrFloat::String(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    })
}

fn parse_f32_option<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(parse_f64_option(deserializer)?.map(|v| v as f32))
}

fn parse_timestamp_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<String> = Option::deserialize(deserializer)?;
    Ok(v.as_deref().and_then(parse_timestamp))
}

/// Parses RFC 3339 timestamps, falling back to offset-less forms read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parsing_string_encoded_numbers() {
        let payload = r#"
        {
            "deviceId": "0848086072",
            "timestamp": "2025-11-29T06:15:15.123456Z",
            "lat": "+20.652494",
            "lon": "-100.391404",
            "speed": "0.00",
            "heading": 12.5
        }
        "#;

        let point: TelemetryPoint = serde_json::from_str(payload).unwrap();
        assert_eq!(point.device_id, "0848086072");
        assert_eq!(point.lat, Some(20.652494));
        assert_eq!(point.lon, Some(-100.391404));
        assert_eq!(point.speed, Some(0.0));
        assert_eq!(point.heading, Some(12.5));
        assert_eq!(point.accuracy, None);
        assert_eq!(
            point.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 11, 29, 6, 15, 15).unwrap()
                + chrono::Duration::microseconds(123_456))
        );
    }

    #[test]
    fn test_unparsable_fields_become_absent() {
        let payload = r#"{ "deviceId": "d1", "timestamp": "yesterday", "lat": "north", "lon": 3 }"#;

        let point: TelemetryPoint = serde_json::from_str(payload).unwrap();
        assert_eq!(point.timestamp, None);
        assert_eq!(point.lat, None);
        assert_eq!(point.lon, Some(3.0));
    }

    #[test]
    fn test_offsets_are_normalized_to_utc() {
        let parsed = parse_timestamp("2025-11-29T01:15:15-05:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 11, 29, 6, 15, 15).unwrap());

        let naive = parse_timestamp("2025-11-29 06:15:15").unwrap();
        assert_eq!(naive, parsed);
    }

    #[test]
    fn test_batch_shapes() {
        let many: TelemetryBatch =
            serde_json::from_str(r#"[{"deviceId":"a"},{"deviceId":"b"}]"#).unwrap();
        assert_eq!(many.into_points().len(), 2);

        let wrapped: TelemetryBatch =
            serde_json::from_str(r#"{"points":[{"deviceId":"a"}]}"#).unwrap();
        assert_eq!(wrapped.into_points()[0].device_id, "a");

        let one: TelemetryBatch = serde_json::from_str(r#"{"deviceId":"c","lat":1}"#).unwrap();
        let points = one.into_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].lat, Some(1.0));
    }
}
