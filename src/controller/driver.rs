//! Per-Coastie test pipeline
//!
//! One pass walks the requested protocols in order. Each protocol goes
//! through the same stages, driven by its [`ProtocolDescriptor`]:
//!
//! ```text
//! Provisioning -> AwaitingReadiness -> Exposing -> Probing -> Recorded
//! ```
//!
//! Creating an object ends the pass with [`ReconcileOutcome::RetryNow`] so the
//! next pass starts from the cluster's view of it. Once every protocol is
//! recorded the probe objects are torn down and the Coastie is re-run after
//! the requeue interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::alert::{
    emit_warning_event, probe_failed_message, record_failed_message, rollout_status_error_message,
    rollout_timeout_message, AlertDispatcher, REASON_PROBE_FAILED, REASON_ROLLOUT_TIMEOUT,
};
use super::client::ClusterClient;
use super::probe::{probe_with_retry, ProbeOutcome, ProbeTarget, Prober};
use super::protocol::{Exchange, ProtocolDescriptor};
use super::provisioner::{Exposure, Provisioned, Provisioner};
use super::readiness::{Readiness, ReadinessGate};
use super::status::StatusRecorder;
use crate::config::OperatorConfig;
use crate::crd::{Coastie, TestOutcome, TestPhase};
use crate::error::{Error, Result};

/// What the controller should do after a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Run the Coastie again straight away
    RetryNow,
    RetryAfter(Duration),
}

/// Where a protocol test is in its pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestStage {
    Provisioning,
    AwaitingReadiness,
    Exposing,
    Probing,
    Recorded,
}

impl std::fmt::Display for TestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestStage::Provisioning => "Provisioning",
            TestStage::AwaitingReadiness => "AwaitingReadiness",
            TestStage::Exposing => "Exposing",
            TestStage::Probing => "Probing",
            TestStage::Recorded => "Recorded",
        };
        f.write_str(s)
    }
}

/// How far one protocol got on this pass
enum Progress {
    Done,
    RetryNow,
}

pub struct TestDriver<C> {
    client: C,
    alerts: AlertDispatcher,
    prober: Arc<dyn Prober>,
    config: OperatorConfig,
}

impl<C: ClusterClient> TestDriver<C> {
    pub fn new(
        client: C,
        alerts: AlertDispatcher,
        prober: Arc<dyn Prober>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            alerts,
            prober,
            config,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run one pass over every protocol the Coastie asks for
    #[instrument(skip(self, coastie), fields(name = %coastie.name_any(), namespace = coastie.namespace()))]
    pub async fn run(&self, coastie: &Coastie) -> Result<ReconcileOutcome> {
        if let Err(errors) = coastie.spec.validate() {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!("Invalid Coastie {}: {}", coastie.name_any(), message);
            return Err(Error::ValidationError(message));
        }

        let protocols = coastie.spec.protocols();
        if protocols.is_empty() {
            debug!("Coastie {} requests no known protocols", coastie.name_any());
        }

        let mut coastie = coastie.clone();
        for protocol in &protocols {
            let descriptor = ProtocolDescriptor::for_protocol(*protocol);
            if let Progress::RetryNow = self.run_test(descriptor, &mut coastie).await? {
                return Ok(ReconcileOutcome::RetryNow);
            }
        }

        if self.config.keep_workloads {
            debug!("Keeping probe workloads for {}", coastie.name_any());
        } else {
            let provisioner = Provisioner::new(&self.client, &self.config);
            for protocol in &protocols {
                provisioner
                    .teardown(ProtocolDescriptor::for_protocol(*protocol), &coastie)
                    .await?;
            }
        }

        info!(
            "Test pass for {} complete, next run in {:?}",
            coastie.name_any(),
            self.config.timings.requeue_interval
        );
        Ok(ReconcileOutcome::RetryAfter(
            self.config.timings.requeue_interval,
        ))
    }

    #[instrument(skip(self, descriptor, coastie), fields(protocol = %descriptor.protocol))]
    async fn run_test(
        &self,
        descriptor: &ProtocolDescriptor,
        coastie: &mut Coastie,
    ) -> Result<Progress> {
        let namespace = coastie
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let name = descriptor.object_name(&coastie.name_any());
        let provisioner = Provisioner::new(&self.client, &self.config);

        enter(TestStage::Provisioning, &name);
        match provisioner.ensure_workload(descriptor, coastie).await? {
            Provisioned::Created => {
                self.record(coastie, descriptor, TestOutcome::running(Utc::now()))
                    .await?;
                return Ok(Progress::RetryNow);
            }
            Provisioned::Existing(ds) => {
                if coastie.outcome(descriptor.protocol).is_none() {
                    self.record(coastie, descriptor, running_since(&ds)).await?;
                }
            }
        }

        enter(TestStage::AwaitingReadiness, &name);
        let gate = ReadinessGate::new(&self.client, &self.config.timings);
        let credentials = coastie.spec.alert_credentials();
        match gate.await_ready(&namespace, &name).await {
            Ok(Readiness::Ready { .. }) => {}
            Ok(Readiness::NotReady { nodes_without_pods }) => {
                let message = rollout_timeout_message(
                    self.config.timings.readiness_budget_minutes(),
                    &nodes_without_pods,
                );
                self.alerts.notify(&credentials, &message).await;
                emit_warning_event(&self.client, coastie, REASON_ROLLOUT_TIMEOUT, &message).await;
                return Ok(Progress::RetryNow);
            }
            Ok(Readiness::Missing) => return Ok(Progress::RetryNow),
            Err(e) => {
                self.alerts
                    .notify(&credentials, &rollout_status_error_message())
                    .await;
                return Err(e);
            }
        }

        enter(TestStage::Exposing, &name);
        let service = match provisioner.ensure_exposure(descriptor, coastie).await? {
            Exposure::Created => {
                // first pass past the gate for this rollout
                let running = coastie
                    .outcome(descriptor.protocol)
                    .filter(|o| o.status == TestPhase::Running);
                if let Some(outcome) = running {
                    gate.report_rollout_latency(&namespace, &name, outcome).await;
                }
                return Ok(Progress::RetryNow);
            }
            Exposure::Ready(service) => service,
        };

        enter(TestStage::Probing, &name);
        let (outcome, attempts) = match probe_target(descriptor, coastie, &service) {
            Ok(target) => {
                probe_with_retry(
                    self.prober.as_ref(),
                    descriptor,
                    &target,
                    &self.config.timings,
                )
                .await
            }
            Err(reason) => (ProbeOutcome::ConnectError(reason), 0),
        };

        enter(TestStage::Recorded, &name);
        let phase = if outcome.is_success() {
            TestPhase::Passed
        } else {
            TestPhase::Failed
        };
        let recorded = coastie
            .outcome(descriptor.protocol)
            .cloned()
            .unwrap_or_else(|| TestOutcome::running(Utc::now()))
            .with_phase(phase);
        self.record(coastie, descriptor, recorded).await?;

        if outcome.is_success() {
            info!("{} test passed after {} attempt(s)", descriptor.display_name(), attempts);
        } else {
            let message = probe_failed_message(&descriptor.display_name(), &outcome.detail());
            warn!("{} test failed after {} attempt(s)", descriptor.display_name(), attempts);
            self.alerts.notify(&credentials, &message).await;
            emit_warning_event(&self.client, coastie, REASON_PROBE_FAILED, &message).await;
        }

        Ok(Progress::Done)
    }

    /// Record an outcome, alerting if it cannot be persisted
    async fn record(
        &self,
        coastie: &mut Coastie,
        descriptor: &ProtocolDescriptor,
        outcome: TestOutcome,
    ) -> Result<bool> {
        let recorder = StatusRecorder::new(&self.client, self.config.timings.status_retry_delay);
        match recorder.record(coastie, descriptor.protocol, outcome).await {
            Ok(written) => Ok(written),
            Err(e) => {
                let message = record_failed_message(&descriptor.display_name(), &e.to_string());
                self.alerts
                    .notify(&coastie.spec.alert_credentials(), &message)
                    .await;
                Err(e)
            }
        }
    }
}

fn enter(stage: TestStage, workload: &str) {
    debug!(stage = %stage, "{} entering {}", workload, stage);
}

/// Running outcome for a workload found without a status entry
fn running_since(ds: &DaemonSet) -> TestOutcome {
    let created = ds
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);
    TestOutcome::running(created)
}

/// Where to send the probe: the Service's cluster IP, or the Ingress host for HTTP
fn probe_target(
    descriptor: &ProtocolDescriptor,
    coastie: &Coastie,
    service: &Service,
) -> std::result::Result<ProbeTarget, String> {
    let port = u16::try_from(descriptor.service_port)
        .map_err(|_| format!("invalid service port {}", descriptor.service_port))?;

    match descriptor.exchange {
        Exchange::HttpGet { .. } => Ok(ProbeTarget::new(coastie.spec.host_url.trim(), port)),
        Exchange::Line { .. } => {
            let cluster_ip = service
                .spec
                .as_ref()
                .and_then(|s| s.cluster_ip.as_deref())
                .filter(|ip| !ip.is_empty() && *ip != "None")
                .ok_or_else(|| format!("service {} has no cluster IP", service.name_any()))?;
            Ok(ProbeTarget::new(cluster_ip, port))
        }
    }
}
