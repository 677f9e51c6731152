//! Bench emulator for the Socket-mini-v2 relay
//!
//! Subscribes to the command topic and answers every valid command with an
//! acknowledgment carrying the same key, optionally after a delay or after
//! silently dropping the first few commands.

use anyhow::Result;
use clap::Parser;
use rig_shared::{codec, AckMessage, RelayTarget};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Relay emulator answering power commands over MQTT")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    broker: String,

    #[arg(long, default_value_t = 1883)]
    port: u16,

    #[arg(long, default_value = "relay-sim")]
    client_id: String,

    #[arg(long)]
    command_topic: String,

    #[arg(long)]
    ack_topic: String,

    /// Delay before each acknowledgment, in milliseconds
    #[arg(long, default_value_t = 200)]
    ack_delay_ms: u64,

    /// Number of leading commands to ignore
    #[arg(long, default_value_t = 0)]
    drop_first: u32,
}

/// Emulated relay: tracks its switch state and decides what to answer
struct Relay {
    state: Option<RelayTarget>,
    to_drop: u32,
}

impl Relay {
    fn new(drop_first: u32) -> Self {
        Self {
            state: None,
            to_drop: drop_first,
        }
    }

    /// Handle one inbound payload, returning the ack to send if any
    fn handle(&mut self, payload: &[u8]) -> Option<AckMessage> {
        let command = match codec::decode_command(payload) {
            Ok(command) => command,
            Err(e) => {
                debug!("[SIM] Ignoring payload: {}", e);
                return None;
            }
        };

        if self.to_drop > 0 {
            self.to_drop -= 1;
            warn!(
                "[SIM] Dropping command {} ({} more to drop)",
                command.key, self.to_drop
            );
            return None;
        }

        if self.state != Some(command.key) {
            info!("[SIM] Relay switched {}", command.key);
            self.state = Some(command.key);
        }
        Some(AckMessage::new(command.key))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut options = MqttOptions::new(&args.client_id, &args.broker, args.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let mut relay = Relay::new(args.drop_first);
    let ack_delay = Duration::from_millis(args.ack_delay_ms);

    info!(
        "[SIM] Relay emulator on {}:{} ({} -> {})",
        args.broker, args.port, args.command_topic, args.ack_topic
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("[SIM] Connected, subscribing to {}", args.command_topic);
                client
                    .subscribe(args.command_topic.as_str(), QoS::AtMostOnce)
                    .await?;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(ack) = relay.handle(&publish.payload) else {
                    continue;
                };
                let payload = codec::encode_ack(&ack)?;
                let client = client.clone();
                let topic = args.ack_topic.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(ack_delay).await;
                    if let Err(e) = client
                        .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
                        .await
                    {
                        error!("[SIM] Failed to send ack: {}", e);
                    }
                });
            }
            Ok(_) => {}
            Err(e) => {
                error!("[SIM] Connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
