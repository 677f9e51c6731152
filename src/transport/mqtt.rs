//! MQTT session with persistent connection and automatic reconnection

use super::backoff::ReconnectPolicy;
use super::traits::{MessageHandler, PubSubTransport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Capacity of the client request queue
const REQUEST_CAPACITY: usize = 10;

/// Configuration for the broker session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or address
    pub broker: String,
    /// Broker port
    pub port: u16,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// Username (empty for anonymous)
    pub username: String,
    /// Password
    pub password: String,
    /// Topic relay commands are published on
    pub command_topic: String,
    /// Topic relay acknowledgments arrive on
    pub ack_topic: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's ConnAck, in seconds
    pub connect_timeout_secs: u64,
    /// Delay between initial connect attempts at startup, in seconds
    pub connect_retry_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".into(),
            port: 1883,
            client_id: "powercycle-rig".into(),
            username: String::new(),
            password: String::new(),
            command_topic: String::new(),
            ack_topic: String::new(),
            keep_alive_secs: 120,
            connect_timeout_secs: 5,
            connect_retry_secs: 1,
        }
    }
}

/// State shared between the session task and the owner
struct SessionState {
    ack_topic: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    connected: AtomicBool,
    exit: AtomicBool,
    closing: AtomicBool,
    handler: RwLock<Option<MessageHandler>>,
}

impl SessionState {
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let handler = match self.handler.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match handler {
            Some(handler) => handler(topic, payload),
            None => debug!("[MQTT] No handler registered, dropping message on {}", topic),
        }
    }
}

/// MQTT transport backed by rumqttc
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    state: Arc<SessionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create a transport with the default reconnect policy
    pub fn new(config: &MqttConfig) -> Self {
        Self::with_policy(config, ReconnectPolicy::default())
    }

    /// Create a transport with an explicit reconnect policy
    pub fn with_policy(config: &MqttConfig, policy: ReconnectPolicy) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            state: Arc::new(SessionState {
                ack_topic: config.ack_topic.clone(),
                connect_timeout: Duration::from_secs(config.connect_timeout_secs),
                policy,
                connected: AtomicBool::new(false),
                exit: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                handler: RwLock::new(None),
            }),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.eventloop.lock().await;
        let mut eventloop = slot.take().ok_or(TransportError::AlreadyStarted)?;

        match timeout(self.state.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *slot = Some(eventloop);
                error!("[MQTT] Connection failed: {}", e);
                return Err(TransportError::Client(e.to_string()));
            }
            Err(_) => {
                *slot = Some(eventloop);
                error!("[MQTT] Connection timed out");
                return Err(TransportError::ConnectTimeout);
            }
        }
        drop(slot);

        on_connected(&self.client, &self.state);

        let client = self.client.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            session_loop(eventloop, client, state).await;
        });
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.state.exit.load(Ordering::SeqCst) {
            error!("[MQTT] Publish: session has exited");
            return Err(TransportError::Exited);
        }
        if !self.state.connected.load(Ordering::SeqCst) {
            error!("[MQTT] Publish: client not connected");
            return Err(TransportError::NotConnected);
        }

        let text = String::from_utf8_lossy(&payload).into_owned();
        match self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
        {
            Ok(()) => {
                info!("[MQTT] Sent `{}` to topic `{}`", text, topic);
                Ok(())
            }
            Err(e) => {
                error!("[MQTT] Failed to send to topic {}: {}", topic, e);
                Err(TransportError::Client(e.to_string()))
            }
        }
    }

    fn on_message(&self, handler: MessageHandler) {
        match self.state.handler.write() {
            Ok(mut guard) => *guard = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn exit_requested(&self) -> bool {
        self.state.exit.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.state.closing.store(true, Ordering::SeqCst);
        self.state.exit.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!("[MQTT] Disconnect request not queued: {}", e);
        }

        // Give the loop a moment to flush the disconnect before tearing it down
        if let Some(mut handle) = self.task.lock().await.take() {
            if timeout(Duration::from_secs(1), &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.state.connected.store(false, Ordering::SeqCst);
        info!("[MQTT] Session closed");
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}

/// Poll until the broker accepts the connection
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Mark the session up and (re)subscribe to acknowledgments
fn on_connected(client: &AsyncClient, state: &SessionState) {
    state.connected.store(true, Ordering::SeqCst);
    info!("[MQTT] Connected to broker");

    match client.try_subscribe(state.ack_topic.as_str(), QoS::AtMostOnce) {
        Ok(()) => info!("[MQTT] Subscribed to {}", state.ack_topic),
        Err(e) => error!("[MQTT] Subscribe to {} failed: {}", state.ack_topic, e),
    }
}

/// Main session loop with reconnection logic
async fn session_loop(mut eventloop: EventLoop, client: AsyncClient, state: Arc<SessionState>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "[MQTT] Received on {}: {}",
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload)
                );
                state.dispatch(&publish.topic, &publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                state.connected.store(false, Ordering::SeqCst);
                if state.closing.load(Ordering::SeqCst) {
                    break;
                }

                warn!("[MQTT] Disconnected: {}", e);
                if !reconnect(&mut eventloop, &client, &state).await {
                    state.exit.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    info!("[MQTT] Session loop stopped");
}

/// Retry the broker connection following the reconnect policy
///
/// Returns `false` once every attempt has failed.
async fn reconnect(eventloop: &mut EventLoop, client: &AsyncClient, state: &SessionState) -> bool {
    let max_attempts = state.policy.max_attempts;

    for (attempt, delay) in state.policy.delays().enumerate() {
        info!(
            "[MQTT] Reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt + 1,
            max_attempts
        );
        tokio::time::sleep(delay).await;

        if state.closing.load(Ordering::SeqCst) {
            return false;
        }

        match timeout(state.connect_timeout, wait_for_connack(eventloop)).await {
            Ok(Ok(())) => {
                info!("[MQTT] Reconnected");
                on_connected(client, state);
                return true;
            }
            Ok(Err(e)) => warn!("[MQTT] Reconnect failed: {}", e),
            Err(_) => warn!("[MQTT] Reconnect timed out"),
        }
    }

    error!(
        "[MQTT] Reconnect failed after {} attempts, exiting session",
        max_attempts
    );
    false
}
