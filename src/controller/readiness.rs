//! Readiness gate for probe DaemonSets
//!
//! Polls the rollout counters a bounded number of times. When the budget runs
//! out it works out which nodes never got a Ready probe pod so the alert can
//! name them.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::client::ClusterClient;
use super::resources::selector_string;
use crate::config::Timings;
use crate::crd::TestOutcome;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Every scheduled pod reported Ready on poll number `attempts`
    Ready { attempts: u32 },
    /// Attempts exhausted; nodes lacking a Ready probe pod, sorted
    NotReady { nodes_without_pods: Vec<String> },
    /// The DaemonSet vanished while we were waiting
    Missing,
}

/// True once the DaemonSet reports as many Ready pods as it wants scheduled
///
/// A status that has not observed the current generation, or that wants no
/// pods at all, is the DaemonSet controller not having caught up yet.
pub fn rollout_complete(ds: &DaemonSet) -> bool {
    let Some(status) = ds.status.as_ref() else {
        return false;
    };
    if let Some(generation) = ds.metadata.generation {
        if status.observed_generation.unwrap_or(0) < generation {
            return false;
        }
    }
    status.desired_number_scheduled > 0 && status.desired_number_scheduled == status.number_ready
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

pub struct ReadinessGate<'a, C> {
    client: &'a C,
    timings: &'a Timings,
}

impl<'a, C: ClusterClient> ReadinessGate<'a, C> {
    pub fn new(client: &'a C, timings: &'a Timings) -> Self {
        Self { client, timings }
    }

    /// Wait for the workload's rollout to complete
    ///
    /// The first poll is immediate and there is no sleep after the last one.
    /// A failed read is returned as an error straight away.
    #[instrument(skip(self), fields(namespace = %namespace, name = %name))]
    pub async fn await_ready(&self, namespace: &str, name: &str) -> Result<Readiness> {
        let attempts = self.timings.readiness_attempts.max(1);

        for attempt in 1..=attempts {
            let Some(ds) = self.client.get::<DaemonSet>(namespace, name).await? else {
                warn!("DaemonSet {}/{} disappeared while waiting for rollout", namespace, name);
                return Ok(Readiness::Missing);
            };

            if rollout_complete(&ds) {
                info!("DaemonSet {}/{} is ready (poll {})", namespace, name, attempt);
                return Ok(Readiness::Ready { attempts: attempt });
            }

            let (desired, ready) = ds
                .status
                .as_ref()
                .map(|s| (s.desired_number_scheduled, s.number_ready))
                .unwrap_or_default();
            debug!(
                "DaemonSet {}/{} not ready: {}/{} pods (poll {}/{})",
                namespace, name, ready, desired, attempt, attempts
            );

            if attempt < attempts {
                tokio::time::sleep(self.timings.readiness_interval).await;
            }
        }

        let nodes_without_pods = self.nodes_without_ready_pods(namespace, name).await?;
        warn!(
            "DaemonSet {}/{} not ready after {} polls, nodes with issues: {:?}",
            namespace, name, attempts, nodes_without_pods
        );
        Ok(Readiness::NotReady { nodes_without_pods })
    }

    /// Every node in the cluster minus those hosting a Ready pod of the workload
    pub async fn nodes_without_ready_pods(&self, namespace: &str, name: &str) -> Result<Vec<String>> {
        let nodes: Vec<Node> = self.client.list_all(None).await?;
        let pods: Vec<Pod> = self.client.list(namespace, &selector_string(name)).await?;

        let covered: BTreeSet<String> = pods
            .iter()
            .filter(|p| pod_is_ready(p))
            .filter_map(|p| p.spec.as_ref().and_then(|s| s.node_name.clone()))
            .collect();

        let missing: BTreeSet<String> = nodes
            .iter()
            .map(|n| n.name_any())
            .filter(|n| !covered.contains(n))
            .collect();

        Ok(missing.into_iter().collect())
    }

    /// Log how long each probe pod took to become Ready after provisioning
    ///
    /// Informational only: failures are logged and swallowed.
    pub async fn report_rollout_latency(&self, namespace: &str, name: &str, outcome: &TestOutcome) {
        let Some(provisioned) = outcome.provisioned_time() else {
            debug!("No provisioning time recorded for {}/{}", namespace, name);
            return;
        };

        let pods: Vec<Pod> = match self.client.list(namespace, &selector_string(name)).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!("Failed to list pods for {}/{}: {}", namespace, name, e);
                return;
            }
        };

        for pod in &pods {
            let ready_at = pod
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .and_then(|conds| {
                    conds
                        .iter()
                        .find(|c| c.type_ == "Ready" && c.status == "True")
                })
                .and_then(|c| c.last_transition_time.as_ref());

            let node = pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default();

            match ready_at {
                Some(t) => info!(
                    pod = %pod.name_any(),
                    node = %node,
                    "Probe pod ready {}s after provisioning",
                    (t.0 - provisioned).num_seconds()
                ),
                None => debug!(pod = %pod.name_any(), node = %node, "Probe pod has no Ready transition"),
            }
        }
    }
}
