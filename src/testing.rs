//! In-memory stand-ins for the broker, devices, ping and alert webhook

use crate::alert::{AlertCategory, AlertSink};
use crate::device::{DeviceDriver, DeviceId, DiagnosticCapture};
use crate::orchestrator::ping::Reachability;
use crate::transport::traits::MessageHandler;
use crate::transport::{PubSubTransport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use rig_shared::{codec, relay, AckMessage};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How the fake relay answers one published command
#[derive(Debug, Clone)]
pub enum AckScript {
    /// Never answer
    Drop,
    /// Acknowledge with the command's own key
    Echo { delay: Duration },
    /// Acknowledge with a fixed key
    AckKey { key: u8, delay: Duration },
    /// Deliver arbitrary bytes on the ack topic
    Raw { payload: Vec<u8>, delay: Duration },
}

impl AckScript {
    pub fn ack_after(delay: Duration) -> Self {
        AckScript::Echo { delay }
    }
}

/// Transport that records publishes and answers them per script
pub struct FakeTransport {
    ack_topic: String,
    handler: Mutex<Option<MessageHandler>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    scripts: Mutex<VecDeque<AckScript>>,
    default: Mutex<AckScript>,
    exited: AtomicBool,
    connected: AtomicBool,
}

impl FakeTransport {
    pub fn new(ack_topic: &str) -> Self {
        Self {
            ack_topic: ack_topic.to_string(),
            handler: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            scripts: Mutex::new(VecDeque::new()),
            default: Mutex::new(AckScript::ack_after(Duration::from_millis(50))),
            exited: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    /// Queue the answer for the next unanswered publish
    pub fn script(&self, script: AckScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Answer used once the queue is empty
    pub fn set_default(&self, script: AckScript) {
        *self.default.lock().unwrap() = script;
    }

    /// Deliver a payload on the ack topic after `delay`, unprompted
    pub fn deliver_later(&self, payload: Vec<u8>, delay: Duration) {
        self.deliver(payload, delay);
    }

    /// Behave as if the broker session dropped and is reconnecting
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Behave as if reconnection was abandoned
    pub fn request_exit(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    /// Keys of every published command, in order
    pub fn commands(&self) -> Vec<u8> {
        self.published()
            .iter()
            .map(|(_, payload)| codec::decode_command(payload).unwrap().key.key())
            .collect()
    }

    fn deliver(&self, payload: Vec<u8>, delay: Duration) {
        let Some(handler) = self.handler.lock().unwrap().clone() else {
            return;
        };
        let topic = self.ack_topic.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handler(&topic, &payload);
        });
    }
}

#[async_trait]
impl PubSubTransport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.exit_requested() {
            return Err(TransportError::Exited);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().unwrap().clone());

        match script {
            AckScript::Drop => {}
            AckScript::Echo { delay } => {
                let command = codec::decode_command(&payload).unwrap();
                let ack = codec::encode_ack(&AckMessage::new(command.key)).unwrap();
                self.deliver(ack.to_vec(), delay);
            }
            AckScript::AckKey { key, delay } => {
                let ack = format!(r#"{{"type":"{}","key":{}}}"#, relay::ACK_TYPE, key);
                self.deliver(ack.into_bytes(), delay);
            }
            AckScript::Raw { payload, delay } => self.deliver(payload, delay),
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn is_connected(&self) -> bool {
        !self.exit_requested() && self.connected.load(Ordering::SeqCst)
    }

    fn exit_requested(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.request_exit();
    }

    fn name(&self) -> &'static str {
        "Fake"
    }
}

#[derive(Default)]
struct DeviceScript {
    progress: Vec<Option<u64>>,
    cursor: usize,
    queries: usize,
    connects: usize,
}

/// Device driver replaying scripted progress values
///
/// Each device's values are returned in order and the last one repeats.
/// Devices without a script connect but never report progress.
#[derive(Default)]
pub struct ScriptedDriver {
    devices: Mutex<HashMap<String, DeviceScript>>,
    unreachable: HashSet<String>,
    foreground: HashMap<String, String>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(self, device: &str, values: &[Option<u64>]) -> Self {
        self.devices
            .lock()
            .unwrap()
            .entry(device.to_string())
            .or_default()
            .progress = values.to_vec();
        self
    }

    pub fn unreachable(mut self, device: &str) -> Self {
        self.unreachable.insert(device.to_string());
        self
    }

    pub fn foreground(mut self, device: &str, package: &str) -> Self {
        self.foreground
            .insert(device.to_string(), package.to_string());
        self
    }

    pub fn query_count(&self, device: &str) -> usize {
        self.devices
            .lock()
            .unwrap()
            .get(device)
            .map_or(0, |script| script.queries)
    }

    pub fn connect_count(&self, device: &str) -> usize {
        self.devices
            .lock()
            .unwrap()
            .get(device)
            .map_or(0, |script| script.connects)
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    type Session = DeviceId;

    async fn connect(&self, id: &DeviceId) -> Option<DeviceId> {
        let mut devices = self.devices.lock().unwrap();
        devices.entry(id.to_string()).or_default().connects += 1;
        if self.unreachable.contains(id.as_str()) {
            None
        } else {
            Some(id.clone())
        }
    }

    async fn query_progress(&self, session: &DeviceId) -> Option<u64> {
        let mut devices = self.devices.lock().unwrap();
        let script = devices.entry(session.to_string()).or_default();
        script.queries += 1;

        let value = script
            .progress
            .get(script.cursor)
            .or_else(|| script.progress.last())
            .copied()
            .flatten();
        if script.cursor < script.progress.len() {
            script.cursor += 1;
        }
        value
    }

    async fn capture_diagnostic(&self, session: &DeviceId) -> anyhow::Result<DiagnosticCapture> {
        Ok(DiagnosticCapture {
            foreground_app: self.foreground.get(session.as_str()).cloned(),
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "Scripted"
    }
}

/// Reachability probe replaying scripted answers
///
/// Answers are returned in order and the last one repeats; unscripted
/// hosts never answer.
#[derive(Default)]
pub struct ScriptedProbe {
    hosts: Mutex<HashMap<String, (Vec<bool>, usize)>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, host: &str, answers: &[bool]) -> Self {
        self.hosts
            .lock()
            .unwrap()
            .insert(host.to_string(), (answers.to_vec(), 0));
        self
    }

    pub fn probe_count(&self, host: &str) -> usize {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .map_or(0, |(_, count)| *count)
    }
}

#[async_trait]
impl Reachability for ScriptedProbe {
    async fn probe(&self, host: &DeviceId) -> bool {
        let mut hosts = self.hosts.lock().unwrap();
        let Some((answers, count)) = hosts.get_mut(host.as_str()) else {
            return false;
        };
        let answer = answers
            .get(*count)
            .or_else(|| answers.last())
            .copied()
            .unwrap_or(false);
        *count += 1;
        answer
    }
}

/// Alert sink that keeps every alert
#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<(AlertCategory, String)>>,
}

impl RecordingAlerts {
    pub fn alerts(&self) -> Vec<(AlertCategory, String)> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn categories(&self) -> Vec<AlertCategory> {
        self.alerts().into_iter().map(|(category, _)| category).collect()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(&self, category: AlertCategory, detail: &str) {
        self.alerts
            .lock()
            .unwrap()
            .push((category, detail.to_string()));
    }
}
