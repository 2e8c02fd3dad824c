//! Controller module for Coastie reconciliation
//!
//! The reconciler hands each Coastie to the [`TestDriver`], which runs the
//! per-protocol pipeline built from the provisioner, readiness gate, probes,
//! status recorder and alert dispatcher in this module.

pub mod alert;
pub mod client;
mod driver;
pub mod probe;
pub mod protocol;
mod provisioner;
mod readiness;
mod reconciler;
mod resources;
#[cfg(test)]
mod resources_test;
mod status;
#[cfg(test)]
mod testing;

pub use alert::{AlertDispatcher, AlertError, AlertSink, SlackSink};
pub use client::{ClusterClient, KubeClusterClient};
pub use driver::{ReconcileOutcome, TestDriver, TestStage};
pub use probe::{NetworkProber, ProbeOutcome, ProbeTarget, Prober};
pub use protocol::ProtocolDescriptor;
pub use provisioner::{Exposure, Provisioned, Provisioner};
pub use readiness::{Readiness, ReadinessGate};
pub use reconciler::{run_controller, ControllerState};
pub use status::StatusRecorder;
