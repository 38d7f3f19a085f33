//! Helpers over target and shadow claims
//!
//! All pure functions of the claim object; nothing here talks to the API.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

use volsync_common::crd::{REPLICATION_DESTINATION_GROUP, REPLICATION_DESTINATION_KIND};
use volsync_common::kube_utils::object_key;
use volsync_common::lifecycle::SELECTED_NODE_ANNOTATION;
use volsync_common::Error;

/// Prefix of shadow claim names; the target claim uid is appended
pub const SHADOW_CLAIM_PREFIX: &str = "vs-prime-";

/// Phase a claim enters when its volume has been bound to another claim
pub const CLAIM_LOST: &str = "Lost";

/// Identity of a claim: enough to address it and to detect recreation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimIdentity {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Unique identity assigned by the API server
    pub uid: String,
}

impl ClaimIdentity {
    /// Extract the identity of a stored claim
    pub fn of(claim: &PersistentVolumeClaim) -> Result<Self, Error> {
        let name = claim.name_any();
        let namespace = claim
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "claim has no namespace"))?;
        let uid = claim
            .uid()
            .ok_or_else(|| Error::validation_for(object_key(&namespace, &name), "claim has no uid"))?;
        Ok(Self {
            namespace,
            name,
            uid,
        })
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// Name of the ReplicationDestination a claim wants to be populated from
///
/// Claims whose `dataSourceRef` points at anything else are not ours.
pub fn replication_destination_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    let source = claim.spec.as_ref()?.data_source_ref.as_ref()?;
    let group_matches = source.api_group.as_deref() == Some(REPLICATION_DESTINATION_GROUP);
    (group_matches && source.kind == REPLICATION_DESTINATION_KIND).then_some(source.name.as_str())
}

/// Deterministic shadow claim name for a target claim uid
pub fn shadow_claim_name(target_uid: &str) -> String {
    format!("{}{}", SHADOW_CLAIM_PREFIX, target_uid)
}

/// Volume the claim is bound to, if any
pub fn bound_volume(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()?
        .volume_name
        .as_deref()
        .filter(|v| !v.is_empty())
}

/// Storage class named by the claim, if any
pub fn storage_class_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()?
        .storage_class_name
        .as_deref()
        .filter(|v| !v.is_empty())
}

/// Node the scheduler picked for a WaitForFirstConsumer claim
pub fn selected_node(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .annotations()
        .get(SELECTED_NODE_ANNOTATION)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// True once the binder has moved the claim's volume to another claim
pub fn is_lost(claim: &PersistentVolumeClaim) -> bool {
    claim.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(CLAIM_LOST)
}
