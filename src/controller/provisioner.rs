//! Idempotent create/delete of a protocol's probe objects
//!
//! Objects are only ever created or deleted, never patched: the builders are
//! pure functions of the Coastie and the protocol, so an existing object is
//! taken as-is.

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::client::{ClusterClient, NamespacedObject};
use super::protocol::ProtocolDescriptor;
use super::resources::{build_daemonset, build_ingress, build_service};
use crate::config::OperatorConfig;
use crate::crd::Coastie;
use crate::error::{Error, Result};

/// Result of ensuring one object exists
#[derive(Clone, Debug)]
pub enum Provisioned<K> {
    /// We created it on this pass
    Created,
    Existing(K),
}

/// Result of ensuring the Service (and Ingress) exist
#[derive(Clone, Debug)]
pub enum Exposure {
    /// At least one object was created on this pass
    Created,
    /// Everything was already there
    Ready(Service),
}

pub struct Provisioner<'a, C> {
    client: &'a C,
    config: &'a OperatorConfig,
}

fn namespace_of(coastie: &Coastie) -> Result<String> {
    coastie
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))
}

impl<'a, C: ClusterClient> Provisioner<'a, C> {
    pub fn new(client: &'a C, config: &'a OperatorConfig) -> Self {
        Self { client, config }
    }

    async fn ensure_object<K: NamespacedObject>(
        &self,
        namespace: &str,
        desired: K,
    ) -> Result<Provisioned<K>> {
        let name = desired.name_any();
        if let Some(existing) = self.client.get::<K>(namespace, &name).await? {
            debug!("{} {}/{} already exists", K::kind(&()), namespace, name);
            return Ok(Provisioned::Existing(existing));
        }

        match self.client.create(namespace, &desired).await {
            Ok(_) => {
                info!("Created {} {}/{}", K::kind(&()), namespace, name);
                Ok(Provisioned::Created)
            }
            // Created by an earlier pass the cache had not seen yet
            Err(e) if e.is_conflict() => {
                debug!("{} {}/{} created concurrently", K::kind(&()), namespace, name);
                Ok(Provisioned::Created)
            }
            Err(e) => Err(e),
        }
    }

    /// Make sure the probe DaemonSet exists
    #[instrument(skip(self, coastie), fields(name = %coastie.name_any(), protocol = %descriptor.protocol))]
    pub async fn ensure_workload(
        &self,
        descriptor: &ProtocolDescriptor,
        coastie: &Coastie,
    ) -> Result<Provisioned<DaemonSet>> {
        let namespace = namespace_of(coastie)?;
        let desired = build_daemonset(coastie, descriptor, self.config);
        self.ensure_object(&namespace, desired).await
    }

    /// Make sure the Service, and for HTTP the Ingress, exist
    #[instrument(skip(self, coastie), fields(name = %coastie.name_any(), protocol = %descriptor.protocol))]
    pub async fn ensure_exposure(
        &self,
        descriptor: &ProtocolDescriptor,
        coastie: &Coastie,
    ) -> Result<Exposure> {
        let namespace = namespace_of(coastie)?;

        let service = self
            .ensure_object(&namespace, build_service(coastie, descriptor))
            .await?;

        let ingress_created = if descriptor.uses_ingress {
            matches!(
                self.ensure_object(&namespace, build_ingress(coastie, descriptor))
                    .await?,
                Provisioned::Created
            )
        } else {
            false
        };

        match service {
            Provisioned::Existing(svc) if !ingress_created => Ok(Exposure::Ready(svc)),
            _ => Ok(Exposure::Created),
        }
    }

    /// Delete everything provisioned for this protocol; absent objects are fine
    #[instrument(skip(self, coastie), fields(name = %coastie.name_any(), protocol = %descriptor.protocol))]
    pub async fn teardown(&self, descriptor: &ProtocolDescriptor, coastie: &Coastie) -> Result<()> {
        let namespace = namespace_of(coastie)?;
        let name = descriptor.object_name(&coastie.name_any());

        if descriptor.uses_ingress {
            self.delete_object::<Ingress>(&namespace, &name).await?;
        }
        self.delete_object::<Service>(&namespace, &name).await?;
        self.delete_object::<DaemonSet>(&namespace, &name).await?;
        Ok(())
    }

    async fn delete_object<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<()> {
        if self.client.delete::<K>(namespace, name).await? {
            info!("Deleted {} {}/{}", K::kind(&()), namespace, name);
        } else {
            debug!("{} {}/{} was already gone", K::kind(&()), namespace, name);
        }
        Ok(())
    }
}
