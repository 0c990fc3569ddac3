use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::broadcast;

use super::DeviceUpdated;
use crate::config::AppConfig;
use crate::error::DeliveryError;
use crate::kafka;

/// A real-time sink for "device updated" events. No acknowledgement is
/// expected; a failed delivery is logged by the broadcaster and dropped.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &DeviceUpdated) -> Result<(), DeliveryError>;
}

/// Fans events out to in-process live viewers over a broadcast channel.
pub struct ChannelSubscriber {
    sender: broadcast::Sender<DeviceUpdated>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceUpdated> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, event: &DeviceUpdated) -> Result<(), DeliveryError> {
        // No connected viewers is not a failure
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Produces events as JSON to a Kafka topic, keyed by device external id.
pub struct KafkaSubscriber {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSubscriber {
    pub fn new(config: &AppConfig, topic: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = kafka::client_config(config)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Subscriber for KafkaSubscriber {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn deliver(&self, event: &DeviceUpdated) -> Result<(), DeliveryError> {
        let payload = serde_json::to_vec(event)?;
        let record = FutureRecord::to(&self.topic)
            .key(&event.external_id)
            .payload(&payload);
        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(err, _)| DeliveryError::Kafka(err))?;
        Ok(())
    }
}
