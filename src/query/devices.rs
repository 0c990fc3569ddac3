use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::TelemetryStore;
use crate::error::StoreError;
use crate::models::{DeviceDetail, DeviceSummary, Location, LocationPoint};

/// All known devices with their active flag and latest stored position.
pub async fn list_devices(
    store: &dyn TelemetryStore,
    now: DateTime<Utc>,
    active_threshold: Duration,
) -> Result<Vec<DeviceSummary>, StoreError> {
    let devices = store.list_devices().await?;
    let ids: Vec<Uuid> = devices.iter().map(|d| d.id).collect();
    let latest: HashMap<Uuid, Location> = store
        .latest_locations(&ids)
        .await?
        .into_iter()
        .map(|l| (l.device_id, l))
        .collect();

    Ok(devices
        .into_iter()
        .map(|device| {
            let location = latest.get(&device.id);
            DeviceSummary {
                is_active: device.is_active(now, active_threshold),
                id: device.external_id,
                name: device.name,
                last_seen: device.last_seen_at,
                latitude: location.map(|l| l.lat),
                longitude: location.map(|l| l.lon),
                last_location_time: location.map(|l| l.timestamp),
            }
        })
        .collect())
}

pub async fn device_detail(
    store: &dyn TelemetryStore,
    external_id: &str,
    now: DateTime<Utc>,
    active_threshold: Duration,
) -> Result<Option<DeviceDetail>, StoreError> {
    let Some(device) = store.find_device(external_id).await? else {
        return Ok(None);
    };
    let latest_location = store
        .latest_locations(&[device.id])
        .await?
        .first()
        .map(LocationPoint::from);

    Ok(Some(DeviceDetail {
        is_active: device.is_active(now, active_threshold),
        id: device.external_id,
        name: device.name,
        last_seen: device.last_seen_at,
        latest_location,
    }))
}
