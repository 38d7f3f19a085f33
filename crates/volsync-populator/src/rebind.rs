//! Hand-off of the restored volume from the shadow claim to the target claim
//!
//! The volume's `claimRef` is rewritten to the target claim. The binder then
//! binds the target to the volume and moves the shadow claim to `Lost`; this
//! module only requests the hand-off and reports what it observed.

use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use serde_json::json;
use tracing::{debug, info};

use volsync_common::kube_utils::object_key;
use volsync_common::lifecycle::POPULATED_FROM_ANNOTATION;
use volsync_common::Error;

use crate::claim::{bound_volume, ClaimIdentity};
use crate::client::PopulatorClient;

/// Outcome of a rebind attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebindStatus {
    /// The shadow claim has no volume yet
    ShadowUnbound,
    /// The shadow names a volume that does not exist
    VolumeMissing,
    /// The volume's claimRef was rewritten; waiting for the binder
    HandOffRequested,
    /// The volume already references the target claim
    Rebound,
}

/// True if `claim_ref` names exactly this incarnation of the target claim
pub fn references_claim(claim_ref: Option<&ObjectReference>, target: &ClaimIdentity) -> bool {
    claim_ref.is_some_and(|r| {
        r.name.as_deref() == Some(target.name.as_str())
            && r.namespace.as_deref() == Some(target.namespace.as_str())
            && r.uid.as_deref() == Some(target.uid.as_str())
    })
}

/// Merge patch pointing `volume` at the target claim
///
/// The claimRef's resourceVersion is replaced so the binder does not treat
/// the reference as stale. Other claimRef fields and annotations are kept.
pub fn rebind_patch(
    target: &ClaimIdentity,
    resource_version: Option<&str>,
    source: &str,
) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                POPULATED_FROM_ANNOTATION: object_key(&target.namespace, source),
            }
        },
        "spec": {
            "claimRef": {
                "name": target.name,
                "namespace": target.namespace,
                "uid": target.uid,
                "resourceVersion": resource_version,
            }
        }
    })
}

/// Move the shadow claim's volume to the target claim
pub async fn try_rebind(
    kube: &dyn PopulatorClient,
    target: &PersistentVolumeClaim,
    identity: &ClaimIdentity,
    shadow: &PersistentVolumeClaim,
    source: &str,
) -> Result<RebindStatus, Error> {
    let Some(volume_name) = bound_volume(shadow) else {
        debug!(claim = %identity.key(), "shadow claim not bound yet");
        return Ok(RebindStatus::ShadowUnbound);
    };

    let Some(volume) = kube.get_volume(volume_name).await? else {
        debug!(claim = %identity.key(), volume = %volume_name, "shadow volume not found");
        return Ok(RebindStatus::VolumeMissing);
    };

    if references_claim(claim_ref(&volume), identity) {
        return Ok(RebindStatus::Rebound);
    }

    let patch = rebind_patch(
        identity,
        target.metadata.resource_version.as_deref(),
        source,
    );
    kube.patch_volume(volume_name, &patch).await?;
    info!(claim = %identity.key(), volume = %volume_name, "volume handed over to target claim");
    Ok(RebindStatus::HandOffRequested)
}

fn claim_ref(volume: &PersistentVolume) -> Option<&ObjectReference> {
    volume.spec.as_ref()?.claim_ref.as_ref()
}
