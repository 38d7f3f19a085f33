//! Reclamation of temporary objects
//!
//! Objects created for a single owner (shadow claims, mover jobs) carry the
//! cleanup label with the owner's uid and are deleted outright. Snapshots may
//! be shared with other owners and with claims being populated from them, so
//! they go through a reference-aware path:
//!
//! 1. do-not-delete → relinquish, never delete
//! 2. another owner reference, or an in-use label of another consumer →
//!    relinquish, the object stays
//! 3. otherwise → delete, guarded by resourceVersion and uid
//!
//! Relinquishing removes only the caller's cleanup label and owner reference.

use tracing::{debug, info};

use kube::ResourceExt;
use volsync_common::crd::{ImageReference, VolumeSnapshot};
use volsync_common::lifecycle::{
    cleanup_selector, has_other_owner, is_do_not_delete, is_in_use_by_other,
    is_marked_for_cleanup_by, mark_for_cleanup_patch, relinquish_patch,
};
use volsync_common::Error;

use crate::claim::ClaimIdentity;
use crate::client::{DeletePrecondition, PopulatorClient};

/// Kinds of temporary objects reclaimed by [`cleanup`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupKind {
    /// Shadow and other temporary claims
    Claims,
    /// Mover jobs
    Jobs,
    /// Snapshots, possibly shared
    Snapshots,
}

/// Identity of the object whose temporary objects are reclaimed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupOwner {
    /// Namespace the owner and its temporary objects live in
    pub namespace: String,
    /// Owner uid, the value of the cleanup label
    pub uid: String,
}

impl From<&ClaimIdentity> for CleanupOwner {
    fn from(claim: &ClaimIdentity) -> Self {
        Self {
            namespace: claim.namespace.clone(),
            uid: claim.uid.clone(),
        }
    }
}

/// What reclamation did, per object class
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Claims deleted
    pub claims_deleted: usize,
    /// Jobs deleted
    pub jobs_deleted: usize,
    /// Snapshots deleted
    pub snapshots_deleted: usize,
    /// Snapshots kept, with the owner's claim on them removed
    pub snapshots_relinquished: usize,
}

/// Decision for a single snapshot labelled for cleanup by an owner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotDisposition {
    /// Protected by the do-not-delete label
    Protected,
    /// Still referenced by another owner or consumer
    Shared,
    /// No remaining references
    Delete,
}

/// Decide what to do with a snapshot reclaimed on behalf of `owner_uid`
pub fn snapshot_disposition(snapshot: &VolumeSnapshot, owner_uid: &str) -> SnapshotDisposition {
    let meta = &snapshot.metadata;
    if is_do_not_delete(meta) {
        SnapshotDisposition::Protected
    } else if has_other_owner(meta, owner_uid) || is_in_use_by_other(meta, owner_uid) {
        SnapshotDisposition::Shared
    } else {
        SnapshotDisposition::Delete
    }
}

/// Reclaim the temporary objects of `owner`
pub async fn cleanup(
    kube: &dyn PopulatorClient,
    owner: &CleanupOwner,
    kinds: &[CleanupKind],
) -> Result<CleanupReport, Error> {
    let selector = cleanup_selector(&owner.uid);
    let mut report = CleanupReport::default();

    for kind in kinds {
        match kind {
            CleanupKind::Claims => {
                for claim in kube.list_claims(&owner.namespace, &selector).await? {
                    let name = claim.name_any();
                    kube.delete_claim(&owner.namespace, &name).await?;
                    debug!(claim = %name, owner = %owner.uid, "temporary claim deleted");
                    report.claims_deleted += 1;
                }
            }
            CleanupKind::Jobs => {
                for job in kube.list_jobs(&owner.namespace, &selector).await? {
                    let name = job.name_any();
                    kube.delete_job(&owner.namespace, &name).await?;
                    debug!(job = %name, owner = %owner.uid, "temporary job deleted");
                    report.jobs_deleted += 1;
                }
            }
            CleanupKind::Snapshots => {
                cleanup_snapshots(kube, owner, &selector, &mut report).await?;
            }
        }
    }

    Ok(report)
}

async fn cleanup_snapshots(
    kube: &dyn PopulatorClient,
    owner: &CleanupOwner,
    selector: &str,
    report: &mut CleanupReport,
) -> Result<(), Error> {
    for snapshot in kube.list_snapshots(&owner.namespace, selector).await? {
        let name = snapshot.name_any();
        match snapshot_disposition(&snapshot, &owner.uid) {
            disposition @ (SnapshotDisposition::Protected | SnapshotDisposition::Shared) => {
                kube.patch_snapshot(
                    &owner.namespace,
                    &name,
                    &relinquish_patch(&snapshot.metadata, &owner.uid),
                )
                .await?;
                info!(snapshot = %name, owner = %owner.uid, ?disposition, "snapshot relinquished");
                report.snapshots_relinquished += 1;
            }
            SnapshotDisposition::Delete => {
                let resource_version = snapshot.resource_version().ok_or_else(|| {
                    Error::internal_with_context(
                        "gc",
                        format!("snapshot {} has no resourceVersion", name),
                    )
                })?;
                let precondition = DeletePrecondition {
                    resource_version,
                    uid: snapshot.uid(),
                };
                kube.delete_snapshot(&owner.namespace, &name, &precondition)
                    .await?;
                info!(snapshot = %name, owner = %owner.uid, "snapshot deleted");
                report.snapshots_deleted += 1;
            }
        }
    }
    Ok(())
}

/// Schedule a superseded image for reclamation by `owner`
///
/// Acts only when both references are snapshots and they differ; the old
/// snapshot gets the owner's cleanup label and is handled by the next
/// [`cleanup`] run with the usual sharing checks. Returns true if a label was
/// written.
pub async fn mark_old_image_for_cleanup(
    kube: &dyn PopulatorClient,
    owner: &CleanupOwner,
    old: Option<&ImageReference>,
    latest: Option<&ImageReference>,
) -> Result<bool, Error> {
    let (Some(old), Some(latest)) = (old, latest) else {
        return Ok(false);
    };
    if !old.is_snapshot() || !latest.is_snapshot() || old == latest {
        return Ok(false);
    }

    let Some(snapshot) = kube.get_snapshot(&owner.namespace, &old.name).await? else {
        debug!(snapshot = %old.name, "old image already gone");
        return Ok(false);
    };
    if is_marked_for_cleanup_by(&snapshot.metadata, &owner.uid) {
        return Ok(false);
    }

    kube.patch_snapshot(
        &owner.namespace,
        &old.name,
        &mark_for_cleanup_patch(&owner.uid),
    )
    .await?;
    info!(snapshot = %old.name, owner = %owner.uid, "old image marked for cleanup");
    Ok(true)
}
