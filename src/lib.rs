//! Coastie: continuous node-to-node connectivity testing for Kubernetes
//!
//! A `Coastie` resource names the protocols to test (tcp, udp, http). For
//! each one the operator rolls a probe server out to every node, probes it
//! through a Service (or an Ingress for http), records the outcome on the
//! resource's status and alerts Slack when a test fails.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod leader;

pub use crate::config::{OperatorConfig, Timings};
pub use crate::error::{Error, Result};
