use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::AppConfig;
use crate::db::TelemetryStore;
use crate::error::{HistoryError, StoreError};
use crate::models::{DeviceDetail, DeviceSummary};

pub mod devices;
pub mod history;

pub use devices::{device_detail, list_devices};
pub use history::{device_history, HistoryLimits, HistoryPage, HistoryRequest};

/// Read side of the store, bound to the configured paging limits and
/// active-status threshold.
#[derive(Clone)]
pub struct TelemetryQueries {
    store: Arc<dyn TelemetryStore>,
    limits: HistoryLimits,
    active_threshold: Duration,
}

impl TelemetryQueries {
    pub fn new(store: Arc<dyn TelemetryStore>, limits: HistoryLimits, active_threshold: Duration) -> Self {
        Self {
            store,
            limits,
            active_threshold,
        }
    }

    pub fn from_config(store: Arc<dyn TelemetryStore>, config: &AppConfig) -> Self {
        Self::new(store, config.history_limits(), config.active_threshold())
    }

    pub async fn history(
        &self,
        external_id: &str,
        request: HistoryRequest,
    ) -> Result<Option<HistoryPage>, HistoryError> {
        device_history(self.store.as_ref(), external_id, request, self.limits, Utc::now()).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceSummary>, StoreError> {
        list_devices(self.store.as_ref(), Utc::now(), self.active_threshold).await
    }

    pub async fn device(&self, external_id: &str) -> Result<Option<DeviceDetail>, StoreError> {
        device_detail(self.store.as_ref(), external_id, Utc::now(), self.active_threshold).await
    }
}
