use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::registry::{Device, Poll, PollError, Registry};
use crate::backoff::Backoff;
use crate::config::{Config, DeviceConfig};
use crate::mqtt::{parse_command_topic, Command, MqttClient, MqttError, MqttMessage, TopicConfig};
use crate::stove::{HttpFetch, Mode, Transport};

/// Engine lifecycle: `Uninitialized` until a setup pass succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Ready,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("stove {hostname} answered with an unusable payload: {source}")]
    Poll {
        hostname: String,
        #[source]
        source: PollError,
    },
}

/// State shared between the refresh loop and inbound message handling
struct Inner {
    registry: Registry,
    poll_backoff: Backoff,
    phase: Phase,
}

/// pelletd synchronization engine
///
/// Polls every configured stove, keeps the registry current, publishes
/// retained state and routes inbound commands back to the stoves.
pub struct Engine<C: MqttClient, F: HttpFetch> {
    client: Arc<C>,
    transport: Transport<F>,
    topic_config: TopicConfig,
    devices: Vec<DeviceConfig>,

    /// Never held across an HTTP call
    inner: Mutex<Inner>,

    /// Cuts the refresh loop's sleep short after a command
    wake: Notify,
}

/// Aborts the inbound message task when the run loop goes away
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<C: MqttClient + 'static, F: HttpFetch + 'static> Engine<C, F> {
    pub fn new(config: &Config, client: Arc<C>, fetch: F) -> Self {
        let polling = &config.polling;
        let transport = Transport::new(
            fetch,
            Backoff::new(polling.retry_delays.clone(), polling.retry_delay_randomness),
            polling.retries,
        );

        Self {
            client,
            transport,
            topic_config: TopicConfig::from_config(&config.mqtt, &config.units),
            devices: config.devices.clone(),
            inner: Mutex::new(Inner {
                registry: Registry::default(),
                poll_backoff: Backoff::new(
                    polling.refresh_delays.clone(),
                    polling.refresh_delay_randomness,
                ),
                phase: Phase::Uninitialized,
            }),
            wake: Notify::new(),
        }
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    /// Copy of every known device
    pub async fn devices(&self) -> Vec<Device> {
        self.inner.lock().await.registry.iter().cloned().collect()
    }

    /// Poll every configured stove once, skipping the ones that don't answer
    async fn poll_all(&self) -> Vec<(&DeviceConfig, Value)> {
        let mut responses = Vec::with_capacity(self.devices.len());
        for descriptor in &self.devices {
            match self.transport.fetch_state(&descriptor.hostname).await {
                Some(body) => responses.push((descriptor, body)),
                None => warn!(
                    "No response from {} ({}), skipping this cycle",
                    descriptor.name, descriptor.hostname
                ),
            }
        }
        responses
    }

    /// Discover the configured stoves and (re)build their topics
    ///
    /// A response that answers but lacks its identifier or a required field
    /// aborts the whole pass: nothing from it is registered. Stoves that don't
    /// answer at all are skipped.
    pub async fn setup(&self) -> Result<usize, SetupError> {
        let mut polls = Vec::new();
        for (descriptor, body) in self.poll_all().await {
            match Poll::from_response(descriptor, &body) {
                Ok(poll) => polls.push(poll),
                Err(source) => {
                    error!(
                        "Setup aborted, {} ({}): {}",
                        descriptor.name, descriptor.hostname, source
                    );
                    debug!("Payload received: {}", body);
                    return Err(SetupError::Poll {
                        hostname: descriptor.hostname.clone(),
                        source,
                    });
                }
            }
        }

        let mut inner = self.inner.lock().await;
        for poll in polls {
            inner.registry.apply_poll(poll, &self.topic_config);
        }
        inner.registry.reconfigure(&self.topic_config);

        for device in inner.registry.iter() {
            info!(
                "Device found: {} ({} | {})",
                device.name, device.device_id, device.hostname
            );
        }
        if inner.registry.is_empty() {
            warn!("No stove answered during setup");
        }
        inner.phase = Phase::Ready;

        Ok(inner.registry.len())
    }

    /// Subscribe to the reset topic and every device's command topics
    ///
    /// Discovery payloads go out for devices not yet announced, or for all of
    /// them when `force_discovery` is set.
    pub async fn register(&self, force_discovery: bool) -> Result<(), MqttError> {
        let mut inner = self.inner.lock().await;

        self.client.subscribe(&self.topic_config.reset_topic).await?;
        for device in inner.registry.iter_mut() {
            let announce = force_discovery || !device.announced;
            let ops = device.topics.register_ops(announce)?;
            self.client.apply(&ops).await?;
            if announce {
                device.announced = true;
                debug!("Published discovery for {}", device.device_id);
            }
        }

        Ok(())
    }

    /// Undo [`Engine::register`]; with `clear_discovery` the entities are
    /// also removed from Home Assistant
    pub async fn unregister(&self, clear_discovery: bool) -> Result<(), MqttError> {
        let mut inner = self.inner.lock().await;

        self.client
            .unsubscribe(&self.topic_config.reset_topic)
            .await?;
        for device in inner.registry.iter_mut() {
            self.client
                .apply(&device.topics.unregister_ops(clear_discovery))
                .await?;
            if clear_discovery {
                device.announced = false;
            }
        }

        Ok(())
    }

    /// Unregister before exiting, giving up once `timeout` has passed
    ///
    /// While the broker is down the client's request queue fills up and
    /// further requests never complete.
    pub async fn shutdown(&self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.unregister(false)).await {
            Ok(Ok(())) => info!("Unregistered from MQTT"),
            Ok(Err(e)) => warn!("Failed to unregister from MQTT: {}", e),
            Err(_) => warn!("Unregistering from MQTT timed out after {:?}", timeout),
        }
    }

    /// Poll every stove and republish the state of each one that answered
    ///
    /// Stoves are handled independently: one bad or missing answer never
    /// keeps the others from being published. Returns how many were published.
    pub async fn refresh(&self) -> usize {
        let mut polls = Vec::new();
        for (descriptor, body) in self.poll_all().await {
            match Poll::from_response(descriptor, &body) {
                Ok(poll) => polls.push(poll),
                Err(e) => {
                    error!(
                        "Skipping {} ({}): {}",
                        descriptor.name, descriptor.hostname, e
                    );
                    debug!("Payload received: {}", body);
                }
            }
        }

        let mut published = 0;
        let mut inner = self.inner.lock().await;
        for poll in polls {
            let (device, created) = inner.registry.apply_poll(poll, &self.topic_config);

            if created {
                info!(
                    "Device found: {} ({} | {})",
                    device.name, device.device_id, device.hostname
                );
            }
            if !device.announced {
                match device.topics.register_ops(true) {
                    Ok(ops) => match self.client.apply(&ops).await {
                        Ok(()) => device.announced = true,
                        Err(e) => warn!("Failed to register {}: {}", device.device_id, e),
                    },
                    Err(e) => warn!("Failed to encode discovery for {}: {}", device.device_id, e),
                }
            }

            match self.client.apply(&device.topics.state_ops(&device.state)).await {
                Ok(()) => published += 1,
                Err(e) => warn!("Failed to publish state of {}: {}", device.device_id, e),
            }
        }

        published
    }

    /// Re-run setup and re-announce everything, e.g. after Home Assistant
    /// lost its discovery cache
    pub async fn reset(&self) {
        info!("Reset requested");
        if let Err(e) = self.setup().await {
            error!("Setup failed during reset: {}", e);
        }
        if let Err(e) = self.register(true).await {
            error!("Register failed during reset: {}", e);
        }
    }

    /// Route one inbound message
    ///
    /// Command topics resolve through the owning device's command table;
    /// anything unknown is logged and dropped. Every message except a reset
    /// also resets the refresh cadence so the new state shows up quickly.
    pub async fn handle_message(&self, msg: MqttMessage) {
        if msg.topic == self.topic_config.reset_topic {
            self.reset().await;
            return;
        }

        let value = msg.payload_str();
        match parse_command_topic(&msg.topic) {
            Some((device_id, command)) => {
                info!(
                    "MQTT message received device '{}' command '{}' value '{}'",
                    device_id, command, value
                );

                let target = {
                    let inner = self.inner.lock().await;
                    inner.registry.get(device_id).and_then(|device| {
                        device
                            .topics
                            .command_for(&msg.topic)
                            .map(|command| (command, device.hostname.clone()))
                    })
                };

                match target {
                    Some((command, hostname)) => self.dispatch(command, &hostname, &value).await,
                    None => debug!("No handler for {}", msg.topic),
                }
            }
            None => debug!("Ignoring message on {}", msg.topic),
        }

        self.inner.lock().await.poll_backoff.reset();
        self.wake.notify_one();
    }

    async fn dispatch(&self, command: Command, hostname: &str, value: &str) {
        let response = match command {
            Command::SetMode => {
                let on = matches!(value.parse::<Mode>(), Ok(Mode::Heat));
                self.transport.set_power_state(hostname, on).await
            }
            Command::SetTargetTemperature => match value.trim().parse::<f64>() {
                Ok(temperature) if temperature.is_finite() => {
                    self.transport
                        .set_target_temperature(hostname, temperature)
                        .await
                }
                _ => {
                    warn!("Ignoring non-numeric target temperature '{}'", value);
                    return;
                }
            },
        };

        if response.is_none() {
            warn!("Command {:?} to {} was not acknowledged", command, hostname);
        }
    }

    /// One refresh cycle; retries setup first if it has never succeeded
    async fn tick(&self) {
        if self.phase().await == Phase::Uninitialized {
            if let Err(e) = self.setup().await {
                error!("Setup failed, retrying next cycle: {}", e);
                return;
            }
            if let Err(e) = self.register(false).await {
                error!("Register failed: {}", e);
            }
        }

        let published = self.refresh().await;
        debug!("Refreshed {}/{} devices", published, self.devices.len());
    }

    /// Run until the future is dropped
    ///
    /// Inbound messages are handled on their own task so commands are served
    /// while a refresh cycle is waiting on a slow stove.
    pub async fn run(self: Arc<Self>, mut messages: mpsc::UnboundedReceiver<MqttMessage>) {
        let engine = self.clone();
        let _inbound = AbortOnDrop(tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                engine.handle_message(msg).await;
            }
            info!("MQTT message stream closed");
        }));

        info!("Engine starting with {} configured devices", self.devices.len());
        match self.setup().await {
            Ok(found) => {
                info!("Setup complete, {} devices", found);
                if let Err(e) = self.register(false).await {
                    error!("Register failed: {}", e);
                }
            }
            Err(e) => error!("Initial setup failed: {}", e),
        }

        loop {
            self.tick().await;

            let delay = self.inner.lock().await.poll_backoff.next_duration();
            debug!("Next refresh in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => debug!("Refresh woken by command"),
            }
        }
    }
}
