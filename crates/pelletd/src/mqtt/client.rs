use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;

/// MQTT message received from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl MqttMessage {
    /// Payload as text; invalid UTF-8 is replaced rather than rejected
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// One broker operation, as described by the topic mapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttOp {
    Subscribe(String),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
}

impl MqttOp {
    pub fn publish_retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        MqttOp::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("MQTT client not connected. Call connect() first.")]
    NotConnected,

    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to encode discovery payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Trait for MQTT client operations
///
/// This trait allows for mocking the MQTT client for testing purposes
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Connect to the MQTT broker
    ///
    /// Returns the stream of messages received on subscribed topics.
    async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<MqttMessage>, MqttError>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&self, topic: &str) -> Result<(), MqttError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Publish a message to an MQTT topic
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError>;

    /// Perform a batch of operations in order, stopping at the first failure
    async fn apply(&self, ops: &[MqttOp]) -> Result<(), MqttError> {
        for op in ops {
            match op {
                MqttOp::Subscribe(topic) => self.subscribe(topic).await?,
                MqttOp::Unsubscribe(topic) => self.unsubscribe(topic).await?,
                MqttOp::Publish {
                    topic,
                    payload,
                    retain,
                } => self.publish(topic, payload.as_bytes(), *retain).await?,
            }
        }
        Ok(())
    }
}

/// Mock MQTT client for testing
///
/// Records every broker operation; messages can be pushed to the engine with
/// [`MockMqttClient::inject`] once connected. [`MockMqttClient::set_offline`]
/// makes requests fail and [`MockMqttClient::stall`] makes them never complete.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    ops: std::sync::Mutex<Vec<MqttOp>>,
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<MqttMessage>>>,
    offline: std::sync::atomic::AtomicBool,
    stalled: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<MqttMessage>, MqttError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.record(MqttOp::Subscribe(topic.to_string())).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.record(MqttOp::Unsubscribe(topic.to_string())).await
    }

    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        self.record(MqttOp::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        })
        .await
    }
}

#[cfg(test)]
impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, op: MqttOp) -> Result<(), MqttError> {
        use std::sync::atomic::Ordering;

        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(MqttError::NotConnected);
        }
        self.ops.lock().unwrap().push(op);
        Ok(())
    }

    /// Fail every request with [`MqttError::NotConnected`] while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    /// Never complete another request, like a client whose queue is full
    pub fn stall(&self) {
        self.stalled.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Every operation performed so far
    pub fn ops(&self) -> Vec<MqttOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Drain recorded operations
    pub fn take_ops(&self) -> Vec<MqttOp> {
        std::mem::take(&mut *self.ops.lock().unwrap())
    }

    /// Only the publishes, as (topic, payload) pairs
    pub fn published(&self) -> Vec<(String, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MqttOp::Publish { topic, payload, .. } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    /// Deliver a message as if the broker had sent it
    pub fn inject(&self, topic: &str, payload: &str) {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .expect("connect() before inject()")
            .send(MqttMessage {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
                retain: false,
            })
            .unwrap();
    }
}

/// Real MQTT client implementation using rumqttc
pub struct RumqttcClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    /// Create a new RumqttcClient from configuration
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // Allow large MQTT packets (2 MiB) for discovery payloads
        mqtt_options.set_max_packet_size(2 * 1024 * 1024, 2 * 1024 * 1024);

        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            mqtt_options.set_credentials(username.clone(), password);
        }

        Self {
            mqtt_options,
            client: None,
            event_loop_task: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        self.client.as_ref().ok_or(MqttError::NotConnected)
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<MqttMessage>, MqttError> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        // Spawn background task to poll event loop
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                            retain: publish.retain,
                        };

                        // Send to channel; if receiver dropped, exit
                        if message_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("MQTT event loop task exiting");
        });

        if let Some(previous) = self.event_loop_task.replace(task) {
            previous.abort();
        }
        self.client = Some(client);

        Ok(message_rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.client()?.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.client()?.unsubscribe(topic).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
