use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use iot_commands::command::{self, MessageContext};
use iot_commands::config;
use iot_commands::mqtt::{InboundMessage, MqttClient};
use iot_commands::update::{HttpFetcher, UpdateHandler};

#[tokio::main]
async fn main() {
    iot_commands::init_tracing();

    let config_path = match config::resolve_config_path(None) {
        Ok(p) => p,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!("Using config at {}", config_path.display());

    let device = match config::load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let fetcher = match HttpFetcher::new() {
        Ok(f) => f,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let updater = UpdateHandler::new(Arc::new(fetcher), device.work_root.clone());

    let mqtt_client = match MqttClient::new(&device) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting receiver (thing={}, endpoint={}:{}, topic={})",
        device.thing_name,
        device.endpoint,
        device.port,
        mqtt_client.topic(),
    );

    let (message_tx, mut message_rx) = mpsc::channel::<InboundMessage>(100);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut dispatch_stop = stop_rx.clone();
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(message_tx, stop_rx).await
    });

    // Messages are handled one at a time, off the network task, so a long
    // update does not stall keep-alives.
    let thing_name = device.thing_name.clone();
    let dispatch_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = message_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = dispatch_stop.changed() => break,
            };
            let ctx = MessageContext {
                thing_name: &thing_name,
                topic: &msg.topic,
            };
            command::handle_message(&ctx, &msg.payload, &updater).await;
        }
    });

    wait_for_shutdown().await;

    if let Err(e) = stop_tx.send(true) {
        warn!("Stop request not delivered, tasks already gone: {}", e);
    }
    match mqtt_handle.await {
        Ok(state) => info!("MQTT client finished in state {:?}", state),
        Err(e) => error!("MQTT task failed: {}", e),
    }
    // The dispatcher finishes the message in hand and drops anything queued.
    if let Err(e) = dispatch_handle.await {
        error!("Dispatcher task failed: {}", e);
    }
    info!("receiver stopped");
}

async fn wait_for_shutdown() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }
}
