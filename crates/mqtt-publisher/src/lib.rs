use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use types::MeasurementRecord;

pub use rumqttc::QoS;

/// Topic every measurement record is published on.
pub const TOPIC: &str = "solar-data";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("json encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker did not acknowledge connection within {timeout_ms}ms")]
    NotConnected { timeout_ms: u64 },
}

/// Broker client as seen by the poll loop.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn reconnect(&mut self) -> Result<(), PublishError>;

    /// Hands the payload to the client without waiting for delivery.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError>;
}

/// Flat JSON object of the record's readings, absent values as `null`.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn serialize_record(record: &MeasurementRecord) -> Result<Vec<u8>, PublishError> {
    serialize(record)
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive_secs: u64,
    /// How long connect and reconnect wait for the broker's acknowledgement.
    pub connect_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "solar-collector".to_string(),
            username: None,
            password: None,
            keepalive_secs: 180,
            connect_timeout_ms: 5_000,
            channel_capacity: 16,
        }
    }
}

impl MqttConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keepalive_secs));
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// rumqttc-backed transport. A driver task polls the event loop and reports
/// the connection state; it stops at the first connection error and is
/// replaced by [`PublishTransport::reconnect`].
#[derive(Debug)]
pub struct MqttPublisher {
    config: MqttConfig,
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    driver: JoinHandle<()>,
}

impl MqttPublisher {
    /// Starts the client and waits a bounded time for the broker. An
    /// unreachable broker is logged, not returned; the poll loop repairs it.
    pub async fn connect(config: MqttConfig) -> Self {
        let (client, connected, driver) = start(&config);
        let mut publisher = Self {
            config,
            client,
            connected,
            driver,
        };
        if let Err(err) = publisher.wait_connected().await {
            warn!(host = %publisher.config.host, error = %err, "mqtt connect failed");
        }
        publisher
    }

    async fn wait_connected(&mut self) -> Result<(), PublishError> {
        let timeout_ms = self.config.connect_timeout_ms;
        let connected = &mut self.connected;
        let acknowledged = async move {
            loop {
                if *connected.borrow_and_update() {
                    return true;
                }
                if connected.changed().await.is_err() {
                    return false;
                }
            }
        };
        match timeout(Duration::from_millis(timeout_ms), acknowledged).await {
            Ok(true) => Ok(()),
            _ => Err(PublishError::NotConnected { timeout_ms }),
        }
    }
}

#[async_trait]
impl PublishTransport for MqttPublisher {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        self.driver.abort();
        let (client, connected, driver) = start(&self.config);
        self.client = client;
        self.connected = connected;
        self.driver = driver;
        self.wait_connected().await?;
        info!(host = %self.config.host, port = self.config.port, "mqtt reconnected");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError> {
        self.client.try_publish(topic, qos, false, payload)?;
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn start(config: &MqttConfig) -> (AsyncClient, watch::Receiver<bool>, JoinHandle<()>) {
    let (client, eventloop) = AsyncClient::new(config.options(), config.channel_capacity);
    let (tx, rx) = watch::channel(false);
    let driver = tokio::spawn(drive(eventloop, tx));
    (client, rx, driver)
}

async fn drive(mut eventloop: EventLoop, connected: watch::Sender<bool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                connected.send_replace(true);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected by broker");
                connected.send_replace(false);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "mqtt connection lost");
                connected.send_replace(false);
                break;
            }
        }
    }
}

/// Transport used when no broker is configured: logs each payload and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl PublishTransport for LogPublisher {
    fn is_connected(&self) -> bool {
        true
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), PublishError> {
        info!(
            topic = %topic,
            bytes = payload.len(),
            payload = %String::from_utf8_lossy(&payload),
            "mock publish invoked"
        );
        Ok(())
    }
}
