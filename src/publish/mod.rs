pub mod iot_data;

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;
use tracing::{error, info};

use crate::error::PublishError;
use crate::topics::{BROADCAST_TOPIC, device_command_topic};

pub use iot_data::IotDataPublisher;

/// Anything that can put a payload on a broker topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl PublishSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

async fn publish_json<P: Publisher + ?Sized>(
    publisher: &P,
    topic: &str,
    payload: &serde_json::Value,
    qos: QoS,
) -> Result<(), PublishError> {
    let body = serde_json::to_vec(payload).map_err(|e| PublishError::Publish {
        topic: topic.to_string(),
        reason: e.to_string(),
    })?;
    publisher.publish(topic, qos, body).await
}

/// Publish to `devices/{device_id}/commands`. Failures are logged, not returned.
pub async fn publish_to_device<P: Publisher + ?Sized>(
    publisher: &P,
    device_id: &str,
    payload: &serde_json::Value,
    qos: QoS,
) -> bool {
    let topic = device_command_topic(device_id);
    match publish_json(publisher, &topic, payload, qos).await {
        Ok(()) => {
            info!("Published to {}: {}", topic, payload);
            true
        }
        Err(e) => {
            error!("Failed to publish to {}: {}", topic, e);
            false
        }
    }
}

/// Publish to the broadcast topic. Failures are logged, not returned.
pub async fn broadcast_command<P: Publisher + ?Sized>(
    publisher: &P,
    payload: &serde_json::Value,
    qos: QoS,
) -> bool {
    match publish_json(publisher, BROADCAST_TOPIC, payload, qos).await {
        Ok(()) => {
            info!("Broadcasted to {}: {}", BROADCAST_TOPIC, payload);
            true
        }
        Err(e) => {
            error!("Broadcast failed for topic {}: {}", BROADCAST_TOPIC, e);
            false
        }
    }
}

/// Publish to each device in order, pausing `spacing` between attempts.
/// One device failing does not stop the rest.
pub async fn publish_all<P: Publisher + ?Sized>(
    publisher: &P,
    devices: &[String],
    payload: &serde_json::Value,
    qos: QoS,
    spacing: Duration,
) -> PublishSummary {
    let mut summary = PublishSummary::default();
    for (i, device) in devices.iter().enumerate() {
        if i > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        if publish_to_device(publisher, device, payload, qos).await {
            summary.succeeded.push(device.clone());
        } else {
            summary.failed.push(device.clone());
        }
    }
    summary
}
