use crate::config::AppConfig;
use crate::error::IngestError;
use crate::models::{TelemetryBatch, TelemetryPoint};
use crate::gate::GatePermit;
use crate::processor::Ingestor;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

const STORE_RETRY_ATTEMPTS: u32 = 3;
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Connection and SASL settings shared by the consumer and the update producer.
pub fn client_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);
    client_config
}

/// Decodes a message payload into telemetry points. `None` for payloads
/// that are not valid JSON telemetry.
pub fn decode_batch(payload: &[u8]) -> Option<Vec<TelemetryPoint>> {
    match serde_json::from_slice::<TelemetryBatch>(payload) {
        Ok(batch) => Some(batch.into_points()),
        Err(e) => {
            warn!("Failed to parse telemetry payload: {}", e);
            None
        }
    }
}

/// Consumes telemetry batches with a circuit breaker on consumer errors.
///
/// Each message waits for an ingestion gate permit before it is processed;
/// while the gate stays full the loop keeps retrying, which stops consumption
/// and lets the backlog build up in Kafka instead of in memory. On shutdown
/// it returns only after every spawned batch has finished.
pub async fn start_kafka_consumer(
    config: &AppConfig,
    ingestor: Ingestor,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let consumer: StreamConsumer = client_config(config)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .create()?;

    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let tasks = TaskTracker::new();
    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(cooldown_duration) => {}
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = consumer.recv() => received,
        };

        match received {
            Ok(m) => {
                consecutive_failures = 0;

                let Some(payload) = m.payload() else {
                    warn!("Received empty payload from Kafka");
                    continue;
                };
                let Some(points) = decode_batch(payload) else {
                    continue;
                };
                if points.is_empty() {
                    warn!("Skipping telemetry batch with no points");
                    continue;
                }

                let permit = loop {
                    if let Some(permit) = ingestor.admit().await {
                        break Some(permit);
                    }
                    if shutdown.is_cancelled() {
                        break None;
                    }
                };
                let Some(permit) = permit else {
                    break;
                };

                tasks.spawn(ingest_batch(ingestor.clone(), permit, points));
            }
            Err(e) => {
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e,
                    consecutive_failures + 1,
                    max_retries
                );
                consecutive_failures += 1;

                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    tasks.close();
    info!("Kafka consumer stopped, waiting for {} in-flight batch(es)", tasks.len());
    tasks.wait().await;
    Ok(())
}

/// Ingests one admitted batch. Storage failures are retried a bounded number
/// of times; re-sending is safe because ingestion is idempotent.
async fn ingest_batch(ingestor: Ingestor, permit: GatePermit, points: Vec<TelemetryPoint>) {
    let mut outcome = ingestor.ingest_admitted(permit, points.clone()).await;
    let mut attempt = 1;
    while let Err(e) = &outcome {
        if !matches!(e, IngestError::Store(_) | IngestError::Busy) || attempt >= STORE_RETRY_ATTEMPTS {
            break;
        }
        warn!(
            "Telemetry batch failed (attempt {}/{}): {}. Retrying...",
            attempt, STORE_RETRY_ATTEMPTS, e
        );
        tokio::time::sleep(STORE_RETRY_BACKOFF * attempt).await;
        attempt += 1;
        outcome = ingestor.submit(points.clone()).await;
    }

    match outcome {
        Ok(_) => {}
        Err(IngestError::Store(e)) => {
            error!("Error persisting telemetry batch after {} attempt(s): {}", attempt, e);
        }
        Err(e) => {
            error!("Error processing telemetry batch: {}", e);
        }
    }
}
