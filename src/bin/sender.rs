use tracing::{error, info, warn};

use iot_commands::config::SenderConfig;
use iot_commands::publish::{self, IotDataPublisher};

#[tokio::main]
async fn main() {
    iot_commands::init_tracing();

    let config = match SenderConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let publisher =
        match IotDataPublisher::connect(&config.region, config.endpoint_override.as_deref()).await {
            Ok(p) => p,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        };

    info!(
        "Starting sender (region={}, endpoint={}, devices={}, broadcast={})",
        config.region,
        publisher.endpoint(),
        config.devices.len(),
        config.broadcast,
    );

    let mut summary = publish::publish_all(
        &publisher,
        &config.devices,
        &config.payload,
        config.qos,
        config.spacing,
    )
    .await;

    if config.broadcast {
        if !config.devices.is_empty() {
            tokio::time::sleep(config.spacing).await;
        }
        let topic = iot_commands::topics::BROADCAST_TOPIC.to_string();
        if publish::broadcast_command(&publisher, &config.payload, config.qos).await {
            summary.succeeded.push(topic);
        } else {
            summary.failed.push(topic);
        }
    }

    if summary.all_succeeded() {
        info!("Published {} command(s)", summary.succeeded.len());
    } else {
        warn!(
            "Published {} command(s), {} failed: {}",
            summary.succeeded.len(),
            summary.failed.len(),
            summary.failed.join(", ")
        );
        std::process::exit(1);
    }
}
