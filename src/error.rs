use thiserror::Error;

/// Failure talking to the persistence layer. Never retried inside the core.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The admission gate had no free permit within its timeout. Retryable.
    #[error("ingestion pipeline busy, retry later")]
    Busy,
    #[error("telemetry batch contains no points")]
    EmptyBatch,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Busy)
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("'from' must be before or equal to 'to'")]
    InvalidRange,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("kafka produce failed: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}
