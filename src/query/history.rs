use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

use crate::db::{PageBounds, TelemetryStore};
use crate::error::HistoryError;
use crate::models::LocationPoint;

pub const DEFAULT_HISTORY_LIMIT: i64 = 1000;
pub const MAX_HISTORY_LIMIT: i64 = 5000;

/// Window used when only `to` is given.
fn default_window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    /// `next_cursor` from the previous page
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_HISTORY_LIMIT,
            max_limit: MAX_HISTORY_LIMIT,
        }
    }
}

impl HistoryLimits {
    fn effective(&self, requested: Option<i64>) -> i64 {
        let max = self.max_limit.max(1);
        match requested {
            Some(limit) if limit > 0 => limit.min(max),
            _ => self.default_limit.clamp(1, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub data: Vec<LocationPoint>,
    /// Absent on the last page.
    pub next_cursor: Option<String>,
}

/// One page of a device's locations, oldest first.
///
/// Returns `Ok(None)` when the device is unknown. Paging is keyed on the
/// timestamp of the last returned row, so rows inserted while a client pages
/// through never shift or repeat earlier pages.
pub async fn device_history(
    store: &dyn TelemetryStore,
    external_id: &str,
    request: HistoryRequest,
    limits: HistoryLimits,
    now: DateTime<Utc>,
) -> Result<Option<HistoryPage>, HistoryError> {
    let (from, to) = match (request.from, request.to) {
        (Some(from), None) => (Some(from), Some(now)),
        (None, Some(to)) => (Some(to - default_window()), Some(to)),
        window => window,
    };
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(HistoryError::InvalidRange);
        }
    }
    let after = request.cursor.as_deref().map(parse_cursor).transpose()?;
    let limit = limits.effective(request.limit);

    let Some(device) = store.find_device(external_id).await? else {
        return Ok(None);
    };

    let mut rows = store
        .location_page(
            device.id,
            PageBounds {
                from,
                to,
                after,
                limit: limit + 1,
            },
        )
        .await?;

    let has_more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);
    let next_cursor = if has_more {
        rows.last().map(|row| encode_cursor(row.timestamp))
    } else {
        None
    };

    Ok(Some(HistoryPage {
        data: rows.iter().map(LocationPoint::from).collect(),
        next_cursor,
    }))
}

fn encode_cursor(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_cursor(cursor: &str) -> Result<DateTime<Utc>, HistoryError> {
    DateTime::parse_from_rfc3339(cursor.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| HistoryError::InvalidCursor(cursor.to_string()))
}
