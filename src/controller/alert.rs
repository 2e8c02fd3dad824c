//! Failure alerts
//!
//! Alerts go to Slack through an [`AlertSink`]. Delivery is best effort: a
//! failed alert is logged and never fails the reconcile. Probe failures and
//! rollout timeouts are also recorded as Warning events on the Coastie.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::client::ClusterClient;
use crate::crd::{AlertCredentials, Coastie};

const MESSAGE_PREFIX: &str = "Coastie Operator:";

/// Event reason for an exhausted probe
pub const REASON_PROBE_FAILED: &str = "ProbeFailed";
/// Event reason for a DaemonSet that never became ready
pub const REASON_ROLLOUT_TIMEOUT: &str = "RolloutTimeout";

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, channel_id: &str, token: &str, text: &str) -> Result<(), AlertError>;
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts alerts with Slack's `chat.postMessage`
pub struct SlackSink {
    api_url: String,
    client: Client,
}

impl SlackSink {
    pub fn new(api_url: impl Into<String>) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("coastie-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_url: api_url.into(),
            client,
        })
    }
}

#[async_trait]
impl AlertSink for SlackSink {
    async fn send(&self, channel_id: &str, token: &str, text: &str) -> Result<(), AlertError> {
        let url = format!("{}/chat.postMessage", self.api_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "channel": channel_id,
            "text": text,
            "link_names": true,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AlertError::Rejected(format!("HTTP {}", resp.status())));
        }

        let reply: SlackResponse = resp.json().await?;
        if !reply.ok {
            return Err(AlertError::Rejected(
                reply.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

/// Sends alerts for a Coastie if it has Slack credentials
#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    pub async fn notify(&self, credentials: &AlertCredentials, message: &str) {
        if !credentials.is_configured() {
            debug!("Alerting not configured, dropping: {}", message);
            return;
        }

        match self
            .sink
            .send(&credentials.channel_id, &credentials.token, message)
            .await
        {
            Ok(()) => info!("Alert sent to {}", credentials.channel_id),
            Err(e) => warn!("Failed to send alert to {}: {}", credentials.channel_id, e),
        }
    }
}

pub fn probe_failed_message(protocol: &str, detail: &str) -> String {
    format!("{MESSAGE_PREFIX} {protocol} Test failed. {detail}")
}

pub fn rollout_timeout_message(minutes: u64, nodes: &[String]) -> String {
    format!(
        "{MESSAGE_PREFIX} DaemonSet took longer than {minutes} minutes to become ready, nodes with issues: [{}]",
        nodes.join(" ")
    )
}

pub fn rollout_status_error_message() -> String {
    format!("{MESSAGE_PREFIX} Failed to get DaemonSet status")
}

pub fn record_failed_message(protocol: &str, error: &str) -> String {
    format!("{MESSAGE_PREFIX} Failed to record {protocol} result: {error}")
}

/// Record a Warning event on the Coastie; failures are only logged
pub async fn emit_warning_event<C: ClusterClient>(
    client: &C,
    coastie: &Coastie,
    reason: &str,
    message: &str,
) {
    let Some(namespace) = coastie.namespace() else {
        return;
    };
    let now = chrono::Utc::now();
    let name = format!(
        "{}.{:x}",
        coastie.name_any(),
        now.timestamp_nanos_opt().unwrap_or_default()
    );

    let event = Event {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        type_: Some("Warning".to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: coastie.object_ref(&()),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        count: Some(1),
        ..Default::default()
    };

    if let Err(e) = client.create(&namespace, &event).await {
        warn!("Failed to emit {} event for {}: {}", reason, coastie.name_any(), e);
    }
}
