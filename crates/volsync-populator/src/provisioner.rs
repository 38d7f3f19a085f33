//! Shadow claim provisioning
//!
//! The shadow claim is a copy of the target claim whose `dataSource` points at
//! the latest snapshot of the ReplicationDestination. The storage driver
//! restores into the shadow's volume; the volume is later handed to the
//! target by [`crate::rebind`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::{debug, info};

use volsync_common::crd::ImageReference;
use volsync_common::error::is_already_exists;
use volsync_common::lifecycle::{created_by_labels, CLEANUP_LABEL, SELECTED_NODE_ANNOTATION};
use volsync_common::Error;

use crate::claim::{shadow_claim_name, ClaimIdentity};
use crate::client::PopulatorClient;
use crate::tracker::mark_snapshot_in_use;

/// Result of [`ensure_shadow_claim`]
#[derive(Clone, Debug)]
pub enum ShadowClaim {
    /// The shadow claim was already there; nothing was written
    Existing(PersistentVolumeClaim),
    /// The shadow claim was created by this call
    Created(PersistentVolumeClaim),
    /// The ReplicationDestination does not exist (yet)
    SourceMissing,
    /// The ReplicationDestination has no snapshot to restore from
    NoUsableImage,
}

impl ShadowClaim {
    /// The shadow claim, if one exists
    pub fn claim(&self) -> Option<&PersistentVolumeClaim> {
        match self {
            Self::Existing(c) | Self::Created(c) => Some(c),
            Self::SourceMissing | Self::NoUsableImage => None,
        }
    }
}

/// Build the shadow claim for `target`, restoring from `image`
pub fn build_shadow_claim(
    target: &PersistentVolumeClaim,
    identity: &ClaimIdentity,
    image: &ImageReference,
    selected_node: Option<&str>,
) -> PersistentVolumeClaim {
    let mut labels = created_by_labels();
    labels.insert(CLEANUP_LABEL.to_string(), identity.uid.clone());

    let annotations = selected_node.map(|node| {
        BTreeMap::from([(SELECTED_NODE_ANNOTATION.to_string(), node.to_string())])
    });

    let spec = target.spec.clone().unwrap_or_default();

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(shadow_claim_name(&identity.uid)),
            namespace: Some(identity.namespace.clone()),
            labels: Some(labels),
            annotations,
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".to_string(),
                kind: "PersistentVolumeClaim".to_string(),
                name: identity.name.clone(),
                uid: identity.uid.clone(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: spec.access_modes,
            resources: spec.resources,
            storage_class_name: spec.storage_class_name,
            volume_mode: spec.volume_mode,
            data_source: Some(image.to_data_source()),
            ..Default::default()
        }),
        status: None,
    }
}

/// Find or create the shadow claim of `target`
///
/// An existing shadow claim is returned without any writes. Otherwise the
/// latest snapshot of ReplicationDestination `source` is marked in use by the
/// target before the shadow claim referencing it is created, so the snapshot
/// cannot be reclaimed while the restore is running.
pub async fn ensure_shadow_claim(
    kube: &dyn PopulatorClient,
    target: &PersistentVolumeClaim,
    identity: &ClaimIdentity,
    source: &str,
    selected_node: Option<&str>,
) -> Result<ShadowClaim, Error> {
    let shadow_name = shadow_claim_name(&identity.uid);
    if let Some(existing) = kube.get_claim(&identity.namespace, &shadow_name).await? {
        return Ok(ShadowClaim::Existing(existing));
    }

    let Some(rd) = kube
        .get_replication_destination(&identity.namespace, source)
        .await?
    else {
        debug!(claim = %identity.key(), source, "replication destination not found");
        return Ok(ShadowClaim::SourceMissing);
    };

    let Some(image) = rd.latest_snapshot() else {
        debug!(claim = %identity.key(), source, "replication destination has no snapshot image");
        return Ok(ShadowClaim::NoUsableImage);
    };

    let Some(snapshot) = kube.get_snapshot(&identity.namespace, &image.name).await? else {
        debug!(claim = %identity.key(), snapshot = %image.name, "latest image not found");
        return Ok(ShadowClaim::NoUsableImage);
    };

    mark_snapshot_in_use(kube, &snapshot, identity).await?;

    let shadow = build_shadow_claim(target, identity, image, selected_node);
    match kube.create_claim(&shadow).await {
        Ok(created) => {
            info!(
                claim = %identity.key(),
                shadow = %shadow_name,
                snapshot = %image.name,
                "shadow claim created"
            );
            Ok(ShadowClaim::Created(created))
        }
        Err(Error::Kube { source }) if is_already_exists(&source) => {
            debug!(shadow = %shadow_name, "shadow claim created concurrently");
            let existing = kube
                .get_claim(&identity.namespace, &shadow_name)
                .await?
                .ok_or_else(|| {
                    Error::internal_with_context(
                        "provisioner",
                        format!("shadow claim {} vanished after create conflict", shadow_name),
                    )
                })?;
            Ok(ShadowClaim::Existing(existing))
        }
        Err(e) => Err(e),
    }
}
