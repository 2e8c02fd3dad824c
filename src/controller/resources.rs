//! Kubernetes resource builders for Coastie probe workloads
//!
//! Pure functions of (descriptor, Coastie, config): the provisioner builds the
//! expected object here and only then looks at the cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use super::protocol::ProtocolDescriptor;
use crate::config::OperatorConfig;
use crate::crd::Coastie;

/// Pod label the DaemonSet and Service select on
pub const APP_LABEL: &str = "app";

const PROBE_CPU: &str = "100m";
const PROBE_MEMORY: &str = "100M";

/// `app={coastie}-{protocol}`
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])
}

/// Label selector string for listing a workload's pods
pub fn selector_string(name: &str) -> String {
    format!("{APP_LABEL}={name}")
}

/// Get the standard labels for a Coastie's probe objects
pub fn standard_labels(coastie: &Coastie, descriptor: &ProtocolDescriptor) -> BTreeMap<String, String> {
    let name = descriptor.object_name(&coastie.name_any());
    let mut labels = selector_labels(&name);
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "coastie-probe".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), coastie.name_any());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        descriptor.protocol.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "coastie-operator".to_string(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(coastie: &Coastie) -> OwnerReference {
    OwnerReference {
        api_version: Coastie::api_version(&()).to_string(),
        kind: Coastie::kind(&()).to_string(),
        name: coastie.name_any(),
        uid: coastie.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn object_meta(coastie: &Coastie, descriptor: &ProtocolDescriptor) -> ObjectMeta {
    ObjectMeta {
        name: Some(descriptor.object_name(&coastie.name_any())),
        namespace: coastie.namespace(),
        labels: Some(standard_labels(coastie, descriptor)),
        owner_references: Some(vec![owner_reference(coastie)]),
        ..Default::default()
    }
}

fn probe_resources() -> ResourceRequirements {
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(PROBE_CPU.to_string())),
        ("memory".to_string(), Quantity(PROBE_MEMORY.to_string())),
    ]);
    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}

// ============================================================================
// DaemonSet
// ============================================================================

/// One probe-server pod per node
pub fn build_daemonset(
    coastie: &Coastie,
    descriptor: &ProtocolDescriptor,
    config: &OperatorConfig,
) -> DaemonSet {
    let name = descriptor.object_name(&coastie.name_any());
    let selector = selector_labels(&name);

    let container = Container {
        name: name.clone(),
        image: Some(config.image_for(descriptor.image_name)),
        ports: Some(vec![ContainerPort {
            container_port: descriptor.container_port,
            protocol: Some(descriptor.transport.as_k8s().to_string()),
            ..Default::default()
        }]),
        resources: Some(probe_resources()),
        ..Default::default()
    };

    DaemonSet {
        metadata: object_meta(coastie, descriptor),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(standard_labels(coastie, descriptor)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Service
// ============================================================================

pub fn build_service(coastie: &Coastie, descriptor: &ProtocolDescriptor) -> Service {
    let name = descriptor.object_name(&coastie.name_any());

    Service {
        metadata: object_meta(coastie, descriptor),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&name)),
            ports: Some(vec![ServicePort {
                name: Some(descriptor.port_name.to_string()),
                protocol: Some(descriptor.transport.as_k8s().to_string()),
                port: descriptor.service_port,
                target_port: Some(IntOrString::Int(descriptor.container_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Ingress
// ============================================================================

/// Routes `spec.hosturl` to the probe Service
pub fn build_ingress(coastie: &Coastie, descriptor: &ProtocolDescriptor) -> Ingress {
    let name = descriptor.object_name(&coastie.name_any());

    let rule = IngressRule {
        host: Some(coastie.spec.host_url.trim().to_string()),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some("/".to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name,
                        port: Some(ServiceBackendPort {
                            number: Some(descriptor.service_port),
                            name: None,
                        }),
                    }),
                    ..Default::default()
                },
            }],
        }),
    };

    Ingress {
        metadata: object_meta(coastie, descriptor),
        spec: Some(IngressSpec {
            rules: Some(vec![rule]),
            ..Default::default()
        }),
        status: None,
    }
}
