//! Controller wiring for Coastie resources
//!
//! Coasties are watched through a reflector filtered on `metadata.generation`,
//! so the operator's own status writes and probe objects never wake it up.
//! The test pipeline is driven by the requeue actions instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        predicates, reflector,
        watcher::{self, watcher},
        WatchStreamExt,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::client::{ClusterClient, KubeClusterClient};
use super::driver::{ReconcileOutcome, TestDriver};
use crate::crd::Coastie;
use crate::error::{Error, Result};

/// How long a non-leader replica waits before looking again
const STANDBY_REQUEUE: Duration = Duration::from_secs(5);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub driver: TestDriver<KubeClusterClient>,
    /// Set by the leader election task
    pub is_leader: Arc<AtomicBool>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let coasties: Api<Coastie> = Api::all(state.client.clone());

    info!("Starting Coastie controller");

    // Verify CRD exists
    match coasties.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("Coastie CRD is available"),
        Err(e) => {
            error!("Coastie CRD not found. Please install the CRD first: {:?}", e);
            return Err(Error::ConfigError("Coastie CRD not installed".to_string()));
        }
    }

    let (reader, writer) = reflector::store();
    let stream = reflector(
        writer,
        watcher(coasties, watcher::Config::default()).default_backoff(),
    )
    .applied_objects()
    .predicate_filter(predicates::generation);

    Controller::for_stream(stream, reader)
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("Coastie controller stopped");
    Ok(())
}

#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Coastie>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, standing by");
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();

    // The cached copy can lag behind our own status write from the previous pass
    let Some(current) = ctx
        .driver
        .client()
        .get::<Coastie>(&namespace, &name)
        .await?
    else {
        debug!("Coastie {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    info!(
        "Reconciling Coastie {}/{} (tests: {:?})",
        namespace, name, current.spec.tests
    );

    Ok(requeue_action(ctx.driver.run(&current).await?))
}

/// Map a finished pass onto the controller's requeue action
pub fn requeue_action(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::RetryNow => Action::requeue(Duration::ZERO),
        ReconcileOutcome::RetryAfter(delay) => Action::requeue(delay),
    }
}

/// Backoff after a failed pass
pub fn retry_delay(error: &Error) -> Duration {
    if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    }
}

fn error_policy(obj: Arc<Coastie>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", obj.name_any(), error);
    Action::requeue(retry_delay(error))
}
