//! Kubernetes operations used by the populator
//!
//! Every API call the populator makes goes through [`PopulatorClient`], so the
//! workflow can be exercised against mocks or an in-memory cluster.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use volsync_common::crd::{ReplicationDestination, VolumeSnapshot};
use volsync_common::error::is_not_found;
use volsync_common::Error;

/// Optimistic-concurrency guard for deletes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletePrecondition {
    /// Delete only if the object is still at this version
    pub resource_version: String,
    /// Delete only if the object is still this incarnation
    pub uid: Option<String>,
}

/// Trait abstracting the Kubernetes operations of the populator
///
/// `get_*` return `Ok(None)` for missing objects. Deletes of objects that are
/// already gone succeed, except guarded snapshot deletes which surface the
/// API server's answer unchanged.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PopulatorClient: Send + Sync {
    /// Get a claim
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// Create a claim, returning the stored object
    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Error>;

    /// List claims in a namespace matching a label selector
    async fn list_claims(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, Error>;

    /// Delete a claim
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a volume
    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>, Error>;

    /// Apply a JSON merge patch to a volume
    async fn patch_volume(&self, name: &str, patch: &serde_json::Value) -> Result<(), Error>;

    /// Get a storage class
    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error>;

    /// Get a ReplicationDestination
    async fn get_replication_destination(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationDestination>, Error>;

    /// Get a snapshot
    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeSnapshot>, Error>;

    /// List snapshots in a namespace matching a label selector
    async fn list_snapshots(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<VolumeSnapshot>, Error>;

    /// Apply a JSON merge patch to a snapshot
    async fn patch_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete a snapshot if it still matches the precondition
    async fn delete_snapshot(
        &self,
        namespace: &str,
        name: &str,
        precondition: &DeletePrecondition,
    ) -> Result<(), Error>;

    /// List jobs in a namespace matching a label selector
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, Error>;

    /// Delete a job and its pods
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct PopulatorClientImpl {
    client: Client,
}

impl PopulatorClientImpl {
    /// Wrap a kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl PopulatorClient for PopulatorClientImpl {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Error> {
        let namespace = claim
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("claim to create has no namespace"))?;
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), claim).await?)
    }

    async fn list_claims(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>, Error> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_volume(&self, name: &str, patch: &serde_json::Value) -> Result<(), Error> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_replication_destination(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationDestination>, Error> {
        let api: Api<ReplicationDestination> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeSnapshot>, Error> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_snapshots(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<VolumeSnapshot>, Error> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn patch_snapshot(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn delete_snapshot(
        &self,
        namespace: &str,
        name: &str,
        precondition: &DeletePrecondition,
    ) -> Result<(), Error> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(precondition.resource_version.clone()),
                uid: precondition.uid.clone(),
            }),
            ..Default::default()
        };
        api.delete(name, &dp).await?;
        Ok(())
    }

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        ignore_not_found(api.delete(name, &dp).await)
    }
}
