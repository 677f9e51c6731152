//! Relay command client - publishes power commands and waits for matching acks

use crate::transport::{MqttConfig, PubSubTransport, TransportError};
use rig_shared::{codec, relay, CommandMessage, RelayTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Conditions under which control of the relay is lost
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Relay did not confirm switching {target} after {attempts} attempts")]
    FatalControlLoss { target: RelayTarget, attempts: u32 },

    #[error("Transport session exited, relay control lost")]
    TransportExited,

    #[error("Failed to encode relay command: {0}")]
    Encode(#[from] codec::CodecError),
}

/// Configuration for the relay command protocol
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Topic commands are published on
    pub command_topic: String,
    /// Topic acknowledgments arrive on
    pub ack_topic: String,
    /// How long each attempt waits for its ack
    pub ack_window: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl RelayConfig {
    /// Build the relay configuration for a broker session
    pub fn from_mqtt(mqtt: &MqttConfig) -> Self {
        Self {
            command_topic: mqtt.command_topic.clone(),
            ack_topic: mqtt.ack_topic.clone(),
            ..Default::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command_topic: String::new(),
            ack_topic: String::new(),
            ack_window: Duration::from_millis(relay::ACK_WINDOW_MS),
            max_attempts: relay::MAX_ATTEMPTS,
        }
    }
}

/// Confirmation state shared with the transport's delivery path
///
/// `confirmed` is written only by `handle_message` and read/reset only by
/// the command issuer. `target` is written only by the issuer.
#[derive(Debug)]
struct AckState {
    ack_topic: String,
    target: Mutex<RelayTarget>,
    confirmed: AtomicBool,
    notify: Notify,
}

impl AckState {
    fn new(ack_topic: String) -> Self {
        Self {
            ack_topic,
            target: Mutex::new(RelayTarget::Off),
            confirmed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn outstanding(&self) -> RelayTarget {
        match self.target.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_outstanding(&self, target: RelayTarget) {
        match self.target.lock() {
            Ok(mut guard) => *guard = target,
            Err(poisoned) => *poisoned.into_inner() = target,
        }
    }

    /// Inbound message from the transport
    fn handle_message(&self, topic: &str, payload: &[u8]) {
        if !self.ack_topic.is_empty() && topic != self.ack_topic {
            debug!("[RELAY] Ignoring message on {}", topic);
            return;
        }

        let ack = match codec::decode_ack(payload) {
            Ok(ack) => ack,
            Err(e) => {
                debug!("[RELAY] Discarding message: {}", e);
                return;
            }
        };

        let outstanding = self.outstanding();
        if ack.confirms(outstanding) {
            debug!("[RELAY] Ack matches outstanding key {}", outstanding.key());
            self.confirmed.store(true, Ordering::SeqCst);
            self.notify.notify_one();
        } else {
            debug!(
                "[RELAY] Discarding stale ack key={} (outstanding {})",
                ack.key.key(),
                outstanding.key()
            );
        }
    }

    /// Wait until the flag is set or the window elapses
    async fn wait_for_confirmation(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        loop {
            // Register interest before checking so a concurrent notify is not lost
            let notified = self.notify.notified();
            if self.confirmed.load(Ordering::SeqCst) {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.confirmed.load(Ordering::SeqCst);
            }
        }
    }
}

/// Issues relay power commands and blocks until the relay confirms them
pub struct RelayCommandClient {
    transport: Arc<dyn PubSubTransport>,
    config: RelayConfig,
    ack: Arc<AckState>,
}

impl RelayCommandClient {
    /// Create a relay client and register its ack handler on the transport
    pub fn new(transport: Arc<dyn PubSubTransport>, config: RelayConfig) -> Self {
        let ack = Arc::new(AckState::new(config.ack_topic.clone()));

        let ack_clone = ack.clone();
        transport.on_message(Arc::new(move |topic: &str, payload: &[u8]| {
            ack_clone.handle_message(topic, payload);
        }));

        Self {
            transport,
            config,
            ack,
        }
    }

    /// Switch the relay on
    pub async fn turn_on(&self) -> Result<(), RelayError> {
        self.set_relay_state(RelayTarget::On).await
    }

    /// Switch the relay off
    pub async fn turn_off(&self) -> Result<(), RelayError> {
        self.set_relay_state(RelayTarget::Off).await
    }

    /// Command the relay to `target` and wait for a matching acknowledgment
    ///
    /// Each attempt resets the confirmation flag, publishes the command and
    /// waits up to the ack window. There is no delay between attempts.
    pub async fn set_relay_state(&self, target: RelayTarget) -> Result<(), RelayError> {
        let payload = codec::encode_command(&CommandMessage::new(target))?;
        self.ack.set_outstanding(target);

        for attempt in 1..=self.config.max_attempts {
            if self.transport.exit_requested() {
                error!("[RELAY] Transport has exited, cannot switch relay {}", target);
                return Err(RelayError::TransportExited);
            }

            self.ack.confirmed.store(false, Ordering::SeqCst);
            info!(
                "[RELAY] Switching relay {} (attempt {}/{})",
                target, attempt, self.config.max_attempts
            );

            if !self.transport.is_connected() {
                warn!(
                    "[RELAY] {} session is down, attempt {} only waits for a late ack",
                    self.transport.name(),
                    attempt
                );
            } else {
                match self
                    .transport
                    .publish(&self.config.command_topic, payload.clone())
                    .await
                {
                    Ok(()) => {}
                    Err(TransportError::Exited) => {
                        error!("[RELAY] Transport has exited, cannot switch relay {}", target);
                        return Err(RelayError::TransportExited);
                    }
                    Err(e) => warn!("[RELAY] Attempt {} publish failed: {}", attempt, e),
                }
            }

            if self.ack.wait_for_confirmation(self.config.ack_window).await {
                info!("[RELAY] Relay switched {} (attempt {})", target, attempt);
                return Ok(());
            }

            warn!(
                "[RELAY] Attempt {} failed: no confirmation within {:?}",
                attempt, self.config.ack_window
            );
        }

        error!(
            "[RELAY] Relay failed to switch {} after {} attempts",
            target, self.config.max_attempts
        );
        Err(RelayError::FatalControlLoss {
            target,
            attempts: self.config.max_attempts,
        })
    }
}
