//! In-memory [`ClusterClient`] and fixtures for controller tests
//!
//! Objects are stored as JSON keyed by (kind, namespace, name), so any kind
//! the pipeline touches works without per-kind code. Every write is counted
//! so tests can assert on how often the pipeline hit the API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, PodCondition, PodSpec, PodStatus};
use kube::api::ObjectMeta;
use kube::core::ErrorResponse;
use serde_json::Value;

use super::alert::{AlertError, AlertSink};
use super::client::{AnyObject, ClusterClient, NamespacedObject};
use crate::crd::{Coastie, CoastieSpec};
use crate::error::{Error, Result};

type Key = (String, String, String);

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<Key, Value>>,
    writes: Mutex<BTreeMap<(String, &'static str), u32>>,
    lists: Mutex<BTreeMap<String, u32>>,
    failing_status_writes: AtomicU32,
    next_ip: AtomicU32,
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(obj: &Value, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    let labels = &obj["metadata"]["labels"];
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels[k.trim()].as_str() == Some(v.trim()),
            None => !labels[term.trim()].is_null(),
        })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn key<K: AnyObject>(namespace: &str, name: &str) -> Key {
        (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
    }

    fn count_write(&self, kind: &str, op: &'static str) {
        let mut writes = self.writes.lock().unwrap();
        *writes.entry((kind.to_string(), op)).or_insert(0) += 1;
    }

    /// Number of successful `op` calls ("create", "status", "delete") on `kind`
    pub fn writes(&self, kind: &str, op: &'static str) -> u32 {
        self.writes
            .lock()
            .unwrap()
            .get(&(kind.to_string(), op))
            .copied()
            .unwrap_or(0)
    }

    /// Number of namespaced `list` calls made for `kind`
    pub fn lists(&self, kind: &str) -> u32 {
        self.lists.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    /// Make the next `n` status writes fail with a 409
    pub fn fail_status_writes(&self, n: u32) {
        self.failing_status_writes.store(n, Ordering::SeqCst);
    }

    pub fn contains<K: AnyObject>(&self, namespace: &str, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&Self::key::<K>(namespace, name))
    }

    pub fn count<K: AnyObject>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// Store an object as-is, bypassing create semantics
    pub fn insert<K: AnyObject>(&self, obj: &K) {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let value = serde_json::to_value(obj).unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert(Self::key::<K>(&namespace, &name), value);
    }

    pub fn fetch<K: AnyObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::key::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Set a DaemonSet's rollout counters
    pub fn set_rollout(&self, namespace: &str, name: &str, desired: i32, ready: i32) {
        let key = Self::key::<k8s_openapi::api::apps::v1::DaemonSet>(namespace, name);
        let mut objects = self.objects.lock().unwrap();
        let ds = objects.get_mut(&key).expect("daemonset exists");
        ds["status"] = serde_json::json!({
            "currentNumberScheduled": desired,
            "desiredNumberScheduled": desired,
            "numberMisscheduled": 0,
            "numberReady": ready,
        });
    }

    pub fn add_node(&self, name: &str) {
        self.insert(&Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
    }

    /// Add a probe pod for `app={workload}` on `node`
    pub fn add_pod(&self, namespace: &str, workload: &str, node: &str, ready: bool) {
        self.insert(&Pod {
            metadata: ObjectMeta {
                name: Some(format!("{workload}-{node}")),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), workload.to_string())])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    last_transition_time: Some(
                        k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
                    ),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        });
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let objects = self.objects.lock().unwrap();
        match objects.get(&Self::key::<K>(namespace, name)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("metadata.name"))?;
        let key = Self::key::<K>(namespace, &name);
        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["namespace"] = Value::String(namespace.to_string());
        value["metadata"]["uid"] = Value::String(format!("uid-{name}"));
        value["metadata"]["creationTimestamp"] =
            Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        if key.0 == "Service" && value["spec"]["clusterIP"].is_null() {
            let n = self.next_ip.fetch_add(1, Ordering::SeqCst) + 10;
            value["spec"]["clusterIP"] = Value::String(format!("10.96.0.{n}"));
        }

        {
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(&key) {
                return Err(api_error(
                    409,
                    "AlreadyExists",
                    format!("{} {name} already exists", key.0),
                ));
            }
            objects.insert(key.clone(), value.clone());
        }
        self.count_write(&key.0, "create");
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        if self
            .failing_status_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(api_error(409, "Conflict", "injected conflict".to_string()));
        }

        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("metadata.name"))?;
        let key = Self::key::<K>(namespace, &name);
        let status = serde_json::to_value(obj)?["status"].clone();

        let updated = {
            let mut objects = self.objects.lock().unwrap();
            let stored = objects
                .get_mut(&key)
                .ok_or_else(|| api_error(404, "NotFound", format!("{name} not found")))?;
            stored["status"] = status;
            stored.clone()
        };
        self.count_write(&key.0, "status");
        Ok(serde_json::from_value(updated)?)
    }

    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&Self::key::<K>(namespace, name))
            .is_some();
        if removed {
            self.count_write(K::kind(&()).as_ref(), "delete");
        }
        Ok(removed)
    }

    async fn list<K: NamespacedObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        *self.lists.lock().unwrap().entry(kind.clone()).or_insert(0) += 1;
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .filter(|((k, ns, _), v)| {
                *k == kind && ns == namespace && matches_selector(v, Some(label_selector))
            })
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn list_all<K: AnyObject>(&self, label_selector: Option<&str>) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .filter(|((k, _, _), v)| *k == kind && matches_selector(v, label_selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }
}

/// A Coastie as the API server would hand it to the reconciler
pub fn coastie(name: &str, namespace: &str, tests: &[&str]) -> Coastie {
    let mut coastie = Coastie::new(
        name,
        CoastieSpec {
            tests: tests.iter().map(|t| t.to_string()).collect(),
            slack_token: "xoxb-test".to_string(),
            slack_channel_id: "C0TEST".to_string(),
            host_url: "coastie.example.com".to_string(),
        },
    );
    coastie.metadata.namespace = Some(namespace.to_string());
    coastie.metadata.uid = Some(format!("uid-{name}"));
    coastie
}

/// [`AlertSink`] that keeps every message it was asked to send
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, _channel_id: &str, _token: &str, text: &str) -> std::result::Result<(), AlertError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
