//! Operator configuration
//!
//! Built from the `run` subcommand's flags (each with an environment variable
//! fallback) in `main.rs`; the defaults below are the production values.

use std::time::Duration;

/// Registry hosting the tcpserver, udpserver and httpserver probe images
pub const DEFAULT_IMAGE_REGISTRY: &str = "hub.soh.re/jmainguy";

/// Slack Web API base URL
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Waits, retry counts and network timeouts used by the test pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Delay before re-running a Coastie after a complete pass
    pub requeue_interval: Duration,
    /// Rollout polls before the readiness gate gives up
    pub readiness_attempts: u32,
    /// Delay between rollout polls
    pub readiness_interval: Duration,
    /// Probe attempts per test
    pub probe_attempts: u32,
    /// Delay between failed probe attempts
    pub probe_backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Whole-request timeout for the HTTP probe
    pub http_timeout: Duration,
    /// Delay before the single status write retry
    pub status_retry_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(300),
            readiness_attempts: 5,
            readiness_interval: Duration::from_secs(60),
            probe_attempts: 5,
            probe_backoff: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(2),
            http_timeout: Duration::from_secs(10),
            status_retry_delay: Duration::from_secs(5),
        }
    }
}

impl Timings {
    /// Worst-case time the readiness gate waits, in whole minutes (for alerts)
    pub fn readiness_budget_minutes(&self) -> u64 {
        let total = self.readiness_interval * self.readiness_attempts;
        (total.as_secs() + 59) / 60
    }
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub image_registry: String,
    pub slack_api_url: String,
    /// Leave probe workloads running between passes instead of tearing them down
    pub keep_workloads: bool,
    pub timings: Timings,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            slack_api_url: DEFAULT_SLACK_API_URL.to_string(),
            keep_workloads: false,
            timings: Timings::default(),
        }
    }
}

impl OperatorConfig {
    /// Full image reference for a probe server
    pub fn image_for(&self, image_name: &str) -> String {
        format!("{}/{}", self.image_registry.trim_end_matches('/'), image_name)
    }
}
