use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_iotdataplane::primitives::Blob;
use rumqttc::QoS;
use tracing::debug;

use crate::error::PublishError;

use super::Publisher;

const ENDPOINT_TYPE: &str = "iot:Data-ATS";

/// Publishes through the AWS IoT data plane HTTPS API.
pub struct IotDataPublisher {
    client: aws_sdk_iotdataplane::Client,
    endpoint: String,
}

impl IotDataPublisher {
    /// Build a publisher for `region`. Without an explicit endpoint the ATS
    /// data endpoint is looked up through the IoT control plane.
    pub async fn connect(region: &str, endpoint_override: Option<&str>) -> Result<Self, PublishError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let endpoint = match endpoint_override {
            Some(endpoint) => endpoint.to_string(),
            None => describe_endpoint(&sdk_config, region).await?,
        };

        let endpoint_url = format!("https://{endpoint}");
        debug!("Instantiating IoT Data client for {}", endpoint_url);
        let conf = aws_sdk_iotdataplane::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .build();

        Ok(Self {
            client: aws_sdk_iotdataplane::Client::from_conf(conf),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

async fn describe_endpoint(sdk_config: &SdkConfig, region: &str) -> Result<String, PublishError> {
    let endpoint_error = |reason: String| PublishError::Endpoint {
        region: region.to_string(),
        reason,
    };

    let response = aws_sdk_iot::Client::new(sdk_config)
        .describe_endpoint()
        .endpoint_type(ENDPOINT_TYPE)
        .send()
        .await
        .map_err(|e| endpoint_error(aws_sdk_iot::error::DisplayErrorContext(&e).to_string()))?;

    let endpoint = response
        .endpoint_address()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| endpoint_error(format!("{ENDPOINT_TYPE} endpoint not returned by AWS")))?;

    debug!("Resolved IoT endpoint {} for region {}", endpoint, region);
    Ok(endpoint.to_string())
}

fn qos_level(qos: QoS) -> i32 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

#[async_trait]
impl Publisher for IotDataPublisher {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish()
            .topic(topic)
            .qos(qos_level(qos))
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| PublishError::Publish {
                topic: topic.to_string(),
                reason: aws_sdk_iotdataplane::error::DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}
