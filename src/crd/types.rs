//! Shared types for Coastie test specifications and results
//!
//! - [`Protocol`] - The protocols a Coastie can exercise (tcp, udp, http)
//! - [`TestPhase`] - Lifecycle phase recorded for one protocol test
//! - [`TestOutcome`] - The per-protocol entry stored under `status.testResults`
//! - [`AlertCredentials`] - Slack channel and token taken from the spec

use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Protocols a Coastie knows how to test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Http];

    /// Lowercase name used in the spec, in status keys and in object names
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "http" => Ok(Protocol::Http),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

/// Phase of a single protocol test
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TestPhase {
    /// Probe workload has been provisioned and the test is in flight
    #[default]
    Running,
    /// The last probe round got the expected reply
    #[serde(alias = "Pass")]
    Passed,
    /// The last probe round exhausted its attempts
    #[serde(alias = "Fail")]
    Failed,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestPhase::Running => write!(f, "Running"),
            TestPhase::Passed => write!(f, "Passed"),
            TestPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Recorded result of one protocol test
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub status: TestPhase,

    /// RFC3339 creation time of the probe DaemonSet
    ///
    /// Kept as a string: older records may carry timestamps in other formats,
    /// which [`TestOutcome::provisioned_time`] then treats as unknown.
    #[serde(default, alias = "daemonsetcreationtime")]
    pub provisioned_at: String,
}

impl TestOutcome {
    /// Outcome written right after the probe workload was created
    pub fn running(provisioned_at: DateTime<Utc>) -> Self {
        Self {
            status: TestPhase::Running,
            provisioned_at: provisioned_at.to_rfc3339(),
        }
    }

    /// Same provisioning time, new phase
    pub fn with_phase(&self, status: TestPhase) -> Self {
        Self {
            status,
            provisioned_at: self.provisioned_at.clone(),
        }
    }

    /// Parsed `provisioned_at`, if it is a valid RFC3339 timestamp
    pub fn provisioned_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.provisioned_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl PartialEq for TestOutcome {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.provisioned_at == other.provisioned_at
    }
}

impl Eq for TestOutcome {}

/// Where failure alerts for a Coastie are sent
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlertCredentials {
    pub channel_id: String,
    pub token: String,
}

impl AlertCredentials {
    /// Alerting is off unless both the channel and the token are set
    pub fn is_configured(&self) -> bool {
        !self.channel_id.trim().is_empty() && !self.token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_is_case_insensitive() {
        assert_eq!("TCP".parse::<Protocol>(), Ok(Protocol::Tcp));
        assert_eq!(" udp ".parse::<Protocol>(), Ok(Protocol::Udp));
        assert_eq!("Http".parse::<Protocol>(), Ok(Protocol::Http));
        assert!("icmp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_phase_accepts_short_aliases() {
        let pass: TestPhase = serde_json::from_str("\"Pass\"").unwrap();
        let fail: TestPhase = serde_json::from_str("\"Fail\"").unwrap();
        assert_eq!(pass, TestPhase::Passed);
        assert_eq!(fail, TestPhase::Failed);
        assert_eq!(serde_json::to_string(&pass).unwrap(), "\"Passed\"");
    }

    #[test]
    fn test_outcome_equality_compares_status_and_time() {
        let created = Utc::now();
        let running = TestOutcome::running(created);
        assert_eq!(running, TestOutcome::running(created));
        assert_ne!(running, running.with_phase(TestPhase::Passed));

        let mut later = running.clone();
        later.provisioned_at = (created + chrono::Duration::seconds(1)).to_rfc3339();
        assert_ne!(running, later);
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = TestOutcome {
            status: TestPhase::Failed,
            provisioned_at: "2024-01-01T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "Failed");
        assert_eq!(json["provisionedAt"], "2024-01-01T00:00:00+00:00");
        assert!(outcome.provisioned_time().is_some());
    }

    #[test]
    fn test_alert_credentials_require_both_fields() {
        let mut creds = AlertCredentials::default();
        assert!(!creds.is_configured());
        creds.channel_id = "C123".into();
        assert!(!creds.is_configured());
        creds.token = "xoxb-1".into();
        assert!(creds.is_configured());
    }
}
