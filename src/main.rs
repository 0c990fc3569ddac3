use std::sync::Arc;

use geotrack_ingest::broadcaster::{Broadcaster, ChannelSubscriber, KafkaSubscriber, Subscriber};
use geotrack_ingest::config::AppConfig;
use geotrack_ingest::db::{self, PgStore, TelemetryStore};
use geotrack_ingest::gate::IngestionGate;
use geotrack_ingest::kafka;
use geotrack_ingest::processor::{IngestionPipeline, Ingestor};
use geotrack_ingest::query::TelemetryQueries;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting GeoTrack Ingest Service...");

    // Init DB
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("Connected to database");
    let store: Arc<dyn TelemetryStore> = Arc::new(PgStore::new(pool));

    // Real-time fan-out
    let live = Arc::new(ChannelSubscriber::new(config.broadcast_channel_capacity));
    let mut subscribers: Vec<Arc<dyn Subscriber>> = vec![live];
    if let Some(topic) = &config.kafka_updates_topic {
        subscribers.push(Arc::new(KafkaSubscriber::new(&config, topic)?));
        info!("Publishing device updates to topic: {}", topic);
    }
    let broadcaster = Arc::new(Broadcaster::new(config.broadcast_max_pending, subscribers));

    // The consumer stops first; the broadcaster keeps flushing until every
    // in-flight batch has published.
    let shutdown = CancellationToken::new();
    let flush_shutdown = CancellationToken::new();
    let flush_task = tokio::spawn(
        broadcaster
            .clone()
            .run(config.flush_interval(), flush_shutdown.clone()),
    );

    let queries = TelemetryQueries::from_config(store.clone(), &config);
    match queries.devices().await {
        Ok(devices) => info!(
            "Tracking {} known device(s), {} active",
            devices.len(),
            devices.iter().filter(|d| d.is_active).count()
        ),
        Err(e) => error!("Failed to load device summary: {}", e),
    }

    let pipeline = Arc::new(IngestionPipeline::new(store, broadcaster));
    let ingestor = Ingestor::new(
        IngestionGate::new(config.ingest_gate_permits),
        config.gate_timeout(),
        pipeline,
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        signal_token.cancel();
    });

    // Start Kafka
    let consumed = kafka::start_kafka_consumer(&config, ingestor, shutdown.clone()).await;

    flush_shutdown.cancel();
    flush_task.await?;
    consumed
}
