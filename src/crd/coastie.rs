//! Coastie Custom Resource Definition
//!
//! A Coastie names the protocols whose node-to-node connectivity should be
//! tested continuously, and where failures are reported.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{AlertCredentials, Protocol, TestOutcome};

/// Structured validation error for `CoastieSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.how_to_fix)
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.coastie.io",
    version = "v1alpha1",
    kind = "Coastie",
    namespaced,
    status = "CoastieStatus",
    shortname = "cst",
    printcolumn = r#"{"name":"Tests","type":"string","jsonPath":".spec.tests"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct CoastieSpec {
    /// Ordered protocol names to test: any of "tcp", "udp", "http"
    pub tests: Vec<String>,

    // Field names match the manifests already deployed for this kind.
    #[serde(default, rename = "slacktoken", alias = "slackToken")]
    pub slack_token: String,

    #[serde(default, rename = "slackchannelid", alias = "slackChannelId")]
    pub slack_channel_id: String,

    /// Externally reachable host routed to the HTTP probe workload
    #[serde(default, rename = "hosturl", alias = "hostUrl")]
    pub host_url: String,
}

impl CoastieSpec {
    /// Requested protocols in spec order
    ///
    /// Unknown names are skipped and repeated names only count once.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols = Vec::with_capacity(self.tests.len());
        for name in &self.tests {
            match name.parse::<Protocol>() {
                Ok(p) if !protocols.contains(&p) => protocols.push(p),
                Ok(_) => debug!("Ignoring duplicate test '{}'", name),
                Err(e) => debug!("Ignoring test: {}", e),
            }
        }
        protocols
    }

    pub fn alert_credentials(&self) -> AlertCredentials {
        AlertCredentials {
            channel_id: self.slack_channel_id.clone(),
            token: self.slack_token.clone(),
        }
    }

    /// Validate the spec
    ///
    /// The HTTP test is driven through an Ingress, so it needs `hosturl`.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.protocols().contains(&Protocol::Http) {
            let host = self.host_url.trim();
            if host.is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.hosturl",
                    "hosturl is required when the http test is requested",
                    "Set spec.hosturl to a host name your ingress controller serves, or remove http from spec.tests.",
                ));
            } else if host.contains("://") || host.contains('/') {
                errors.push(SpecValidationError::new(
                    "spec.hosturl",
                    "hosturl must be a bare host name",
                    "Drop the scheme and path, e.g. use 'coastie.example.com' instead of 'http://coastie.example.com/'.",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Observed state of a Coastie
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoastieStatus {
    /// One entry per protocol, keyed by protocol name
    #[serde(default, alias = "testresults", alias = "TestResults")]
    pub test_results: BTreeMap<String, TestOutcome>,
}

impl Coastie {
    /// Recorded outcome for a protocol, if any
    pub fn outcome(&self, protocol: Protocol) -> Option<&TestOutcome> {
        self.status
            .as_ref()
            .and_then(|s| s.test_results.get(protocol.as_str()))
    }
}
