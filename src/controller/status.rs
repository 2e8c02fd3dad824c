//! Recording test outcomes on the Coastie status subresource

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::client::ClusterClient;
use crate::crd::{Coastie, Protocol, TestOutcome};
use crate::error::{Error, Result};

/// Writes `status.testResults[protocol]` only when it actually changes
pub struct StatusRecorder<'a, C> {
    client: &'a C,
    retry_delay: Duration,
}

impl<'a, C: ClusterClient> StatusRecorder<'a, C> {
    pub fn new(client: &'a C, retry_delay: Duration) -> Self {
        Self {
            client,
            retry_delay,
        }
    }

    /// Merge `outcome` into the Coastie's status
    ///
    /// Returns `Ok(false)` without touching the API when the recorded outcome
    /// is already equal. Otherwise the in-memory copy is updated and persisted
    /// in one write, retried once after `retry_delay` unless the Coastie has
    /// been deleted. If both writes fail the
    /// in-memory change is rolled back and the error returned.
    pub async fn record(
        &self,
        coastie: &mut Coastie,
        protocol: Protocol,
        outcome: TestOutcome,
    ) -> Result<bool> {
        let namespace = coastie
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let key = protocol.as_str();

        let status = coastie.status.get_or_insert_with(Default::default);
        if status.test_results.get(key) == Some(&outcome) {
            debug!("{} outcome for {} unchanged", protocol, coastie.name_any());
            return Ok(false);
        }
        let previous = status.test_results.insert(key.to_string(), outcome.clone());

        if let Err(e) = self.persist(&namespace, coastie).await {
            let status = coastie.status.get_or_insert_with(Default::default);
            match previous {
                Some(prev) => status.test_results.insert(key.to_string(), prev),
                None => status.test_results.remove(key),
            };
            return Err(e);
        }

        info!(
            "Recorded {} {} for {}/{}",
            protocol,
            outcome.status,
            namespace,
            coastie.name_any()
        );
        Ok(true)
    }

    async fn persist(&self, namespace: &str, coastie: &Coastie) -> Result<()> {
        match self.client.update_status(namespace, coastie).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{}/{} is gone, not retrying status update", namespace, coastie.name_any());
                Err(e)
            }
            Err(e) => {
                warn!(
                    "Status update for {}/{} failed, retrying in {:?}: {}",
                    namespace,
                    coastie.name_any(),
                    self.retry_delay,
                    e
                );
                tokio::time::sleep(self.retry_delay).await;
                self.client.update_status(namespace, coastie).await?;
                Ok(())
            }
        }
    }
}
