//! Transport trait abstraction for publish/subscribe sessions

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Callback invoked for every inbound message, on the session's own task
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Errors surfaced by a transport session
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Session exited after exhausting reconnect attempts")]
    Exited,

    #[error("Broker client error: {0}")]
    Client(String),
}

/// A reconnecting publish/subscribe session
///
/// `connect` establishes the session and subscribes to the acknowledgment
/// topic. `publish` never retries: it fails if the session is down. Inbound
/// messages reach the registered handler concurrently with the caller.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Establish the session and start message delivery
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Register the inbound message handler, replacing any previous one
    fn on_message(&self, handler: MessageHandler);

    /// Whether the session is currently up
    fn is_connected(&self) -> bool;

    /// Set once reconnection has been abandoned; the owner must treat it as fatal
    fn exit_requested(&self) -> bool;

    /// Stop the session loop and release the broker session
    async fn close(&self);

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
