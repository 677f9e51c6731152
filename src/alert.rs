//! Operator alerts
//!
//! Alerts are best-effort: a failed delivery is logged and dropped, never
//! retried and never surfaced to the caller.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Kind of condition being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    /// A phase did not complete within its budget
    Timeout,
    /// Devices failed to come back after a power cycle
    Failure,
    /// The rig itself hit an unrecoverable error
    Error,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::Timeout => write!(f, "timeout"),
            AlertCategory::Failure => write!(f, "failure"),
            AlertCategory::Error => write!(f, "error"),
        }
    }
}

/// Destination for operator alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Report a condition; never fails
    async fn notify(&self, category: AlertCategory, detail: &str);
}

/// Configuration for webhook alerts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Webhook endpoint; alerts are only logged when absent
    pub webhook_url: Option<String>,
    /// JSON body posted for timeout alerts
    pub timeout_template: Option<Value>,
    /// JSON body posted for failure alerts
    pub failure_template: Option<Value>,
    /// JSON body posted for error alerts
    pub error_template: Option<Value>,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_template: None,
            failure_template: None,
            error_template: None,
            request_timeout_secs: 10,
        }
    }
}

impl AlertConfig {
    /// Body to post for `category`, falling back to a plain text message
    fn body(&self, category: AlertCategory, detail: &str) -> Value {
        let template = match category {
            AlertCategory::Timeout => &self.timeout_template,
            AlertCategory::Failure => &self.failure_template,
            AlertCategory::Error => &self.error_template,
        };
        template.clone().unwrap_or_else(|| {
            json!({
                "msgtype": "text",
                "text": { "content": format!("[{}] {}", category, detail) }
            })
        })
    }
}

/// Posts alerts to a chat webhook
pub struct WebhookAlerter {
    config: AlertConfig,
    client: reqwest::Client,
}

impl WebhookAlerter {
    /// Create a new webhook alerter
    pub fn new(config: AlertConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }
}

#[async_trait]
impl AlertSink for WebhookAlerter {
    async fn notify(&self, category: AlertCategory, detail: &str) {
        warn!("[ALERT] {}: {}", category, detail);

        let Some(url) = self.config.webhook_url.as_deref() else {
            return;
        };

        let body = self.config.body(category, detail);
        match self.client.post(url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!("[ALERT] Delivered {} alert", category);
            }
            Ok(response) => {
                error!("[ALERT] Webhook rejected {} alert: {}", category, response.status());
            }
            Err(e) => error!("[ALERT] Failed to deliver {} alert: {}", category, e),
        }
    }
}
