use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::IngestError;
use crate::gate::{GatePermit, IngestionGate};
use crate::models::TelemetryPoint;

pub mod ingestion;
pub mod validator;

pub use ingestion::{IngestResult, IngestionPipeline};
pub use validator::{validate, RejectReason, ValidPoint};

/// The ingestion pipeline behind its admission gate.
#[derive(Clone)]
pub struct Ingestor {
    gate: IngestionGate,
    gate_timeout: Duration,
    pipeline: Arc<IngestionPipeline>,
}

impl Ingestor {
    pub fn new(gate: IngestionGate, gate_timeout: Duration, pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            gate,
            gate_timeout,
            pipeline,
        }
    }

    /// Single attempt: `Busy` when no permit frees up within the gate
    /// timeout, in which case nothing was touched.
    pub async fn submit(&self, points: Vec<TelemetryPoint>) -> Result<IngestResult, IngestError> {
        if points.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        let permit = self.admit().await.ok_or(IngestError::Busy)?;
        self.ingest_admitted(permit, points).await
    }

    pub async fn admit(&self) -> Option<GatePermit> {
        let permit = self.gate.try_enter(self.gate_timeout).await;
        if permit.is_none() {
            warn!(
                "Ingestion gate rejected batch after {}ms ({} permits busy)",
                self.gate_timeout.as_millis(),
                self.gate.capacity()
            );
        }
        permit
    }

    /// Runs a batch under a permit obtained from [`Ingestor::admit`]. The
    /// permit is released when this returns or is dropped.
    pub async fn ingest_admitted(
        &self,
        permit: GatePermit,
        points: Vec<TelemetryPoint>,
    ) -> Result<IngestResult, IngestError> {
        let result = self.pipeline.ingest(points).await;
        permit.exit();
        Ok(result?)
    }

    pub fn gate(&self) -> &IngestionGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{Broadcaster, DEFAULT_MAX_PENDING};
    use crate::db::MemoryStore;
    use chrono::Utc;

    fn ingestor(permits: usize) -> Ingestor {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new(DEFAULT_MAX_PENDING, Vec::new()));
        Ingestor::new(
            IngestionGate::new(permits),
            Duration::from_millis(20),
            Arc::new(IngestionPipeline::new(store, broadcaster)),
        )
    }

    fn batch() -> Vec<TelemetryPoint> {
        vec![TelemetryPoint {
            device_id: "dev-1".to_string(),
            timestamp: Some(Utc::now()),
            lat: Some(1.0),
            lon: Some(1.0),
            ..Default::default()
        }]
    }

    #[tokio::test]
    async fn test_submit_reports_busy_when_gate_is_full() {
        let ingestor = ingestor(1);
        let held = ingestor.admit().await.unwrap();

        let err = ingestor.submit(batch()).await.unwrap_err();
        assert!(matches!(err, IngestError::Busy));
        assert!(err.is_retryable());

        held.exit();
        let result = ingestor.submit(batch()).await.unwrap();
        assert_eq!(result.accepted, 1);
        assert_eq!(ingestor.gate().available(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_caller_error() {
        let ingestor = ingestor(1);
        let err = ingestor.submit(Vec::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyBatch));
        assert_eq!(ingestor.gate().available(), 1);
    }
}
