use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    TlsConfiguration, Transport,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::error::ConfigError;
use crate::topics::device_command_topic;

use super::{ConnectionState, InboundMessage};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    thing_name: String,
    endpoint: String,
    topic: String,
    state: ConnectionState,
}

impl MqttClient {
    /// Build a TLS client for the device. Credential files are read here so a
    /// bad path fails at startup rather than on first connect.
    pub fn new(config: &DeviceConfig) -> Result<Self, ConfigError> {
        let ca = read_pem(&config.root_ca_path, "root CA")?;
        let cert = read_pem(&config.certificate_path, "certificate")?;
        let key = read_pem(&config.private_key_path, "private key")?;

        let mut mqttopts = MqttOptions::new(&config.thing_name, &config.endpoint, config.port);
        mqttopts.set_keep_alive(KEEP_ALIVE);
        mqttopts.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));

        Ok(Self::with_options(mqttopts, &config.thing_name, &config.endpoint))
    }

    fn with_options(mqttopts: MqttOptions, thing_name: &str, endpoint: &str) -> Self {
        let (client, eventloop) = AsyncClient::new(mqttopts, 100);
        Self {
            client,
            eventloop,
            thing_name: thing_name.to_string(),
            endpoint: endpoint.to_string(),
            topic: device_command_topic(thing_name),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("[{}] {:?} -> {:?}", self.thing_name, self.state, next);
            self.state = next;
        }
    }

    /// Run the MQTT event loop until `stop_rx` flips to true. Subscribes on
    /// every connect, forwards inbound publishes through `message_tx`, and
    /// reconnects with bounded backoff on any connection error. Returns the
    /// state the client ended in.
    pub async fn run(
        mut self,
        message_tx: mpsc::Sender<InboundMessage>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> ConnectionState {
        let mut backoff = MIN_RECONNECT_DELAY;
        self.transition(ConnectionState::Connecting);

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to endpoint {}", self.endpoint);
                            self.transition(ConnectionState::Connected);
                            backoff = MIN_RECONNECT_DELAY;

                            if let Err(e) = self.client.subscribe(&self.topic, QoS::AtLeastOnce).await {
                                error!("Failed to subscribe to {}: {}", self.topic, e);
                            }
                        }
                        Ok(Event::Incoming(Incoming::SubAck(_))) => {
                            info!("Subscribed to topic {}", self.topic);
                            self.transition(ConnectionState::Subscribed);
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = InboundMessage {
                                topic: publish.topic.clone(),
                                payload: publish.payload.to_vec(),
                            };
                            if message_tx.send(msg).await.is_err() {
                                warn!("Message channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            match &e {
                                ConnectionError::ConnectionRefused(code) => {
                                    error!("Failed to connect to {} (code={:?})", self.endpoint, code);
                                }
                                _ => error!("MQTT connection error: {}. Reconnecting in {:?}", e, backoff),
                            }
                            self.transition(ConnectionState::Disconnected);

                            // A stop request during the backoff sleep ends the loop immediately.
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = stop_rx.changed() => {}
                            }
                            if *stop_rx.borrow() {
                                break;
                            }
                            backoff = next_backoff(backoff);
                            self.transition(ConnectionState::Connecting);
                        }
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Send DISCONNECT and drive the event loop until it is on the wire.
    async fn shutdown(mut self) -> ConnectionState {
        info!("Stopping MQTT client loop");
        if !needs_disconnect(self.state) {
            self.transition(ConnectionState::Disconnected);
            return self.state;
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to request disconnect: {}", e);
            return self.state;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Event loop ended during disconnect: {}", e);
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), flush).await.is_err() {
            warn!("Timed out waiting for disconnect to flush");
            return self.state;
        }
        self.transition(ConnectionState::Disconnected);
        info!("Disconnected cleanly");
        self.state
    }
}

/// Delay before the next reconnect attempt: doubled, capped at one minute.
fn next_backoff(current: Duration) -> Duration {
    (current * 2).clamp(MIN_RECONNECT_DELAY, MAX_RECONNECT_DELAY)
}

/// DISCONNECT is only sent once the broker has acknowledged the connection.
fn needs_disconnect(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected | ConnectionState::Subscribed)
}

fn read_pem(path: &std::path::Path, what: &'static str) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| {
        debug!("Failed to read {} at {}", what, path.display());
        ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }
    })
}
