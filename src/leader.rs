//! Lease-based leader election
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs test
//! passes; the others keep requeueing until they take over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "coastie-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Whether a lease nobody renewed since `renew_time` is up for grabs at `now`
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renewed) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
}

/// Pod identity used as the lease holder
pub fn holder_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    })
}

pub struct LeaderElection {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElection {
    pub fn new(client: Client, namespace: &str, identity: String, is_leader: Arc<AtomicBool>) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity,
            is_leader,
        }
    }

    /// Acquire and renew the lease forever, updating the shared flag
    pub async fn run(self) {
        info!(
            "Leader election on lease {}/{} as {}",
            self.namespace, LEASE_NAME, self.identity
        );

        loop {
            let was_leader = self.is_leader.load(Ordering::Relaxed);
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    if !was_leader {
                        info!("Acquired leadership for lease {}", LEASE_NAME);
                    }
                    self.is_leader.store(true, Ordering::Relaxed);
                    tokio::time::sleep(RENEW_INTERVAL).await;
                }
                Ok(false) => {
                    if was_leader {
                        warn!("Lost leadership for lease {}", LEASE_NAME);
                    }
                    self.is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    self.is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let Some(existing) = self.leases.get_opt(LEASE_NAME).await? else {
            self.create_lease(now).await?;
            return Ok(true);
        };

        let spec = existing.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());

        let patch = if holder == Some(self.identity.as_str()) {
            serde_json::json!({
                "spec": {
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            })
        } else if lease_expired(spec, now) {
            info!("Lease held by {:?} has expired, taking over", holder);
            serde_json::json!({
                "spec": {
                    "holderIdentity": self.identity,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            })
        } else {
            debug!("Lease held by {:?}", holder);
            return Ok(false);
        };

        self.leases
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(true)
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> Result<(), kube::Error> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        self.leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
        Ok(())
    }
}
