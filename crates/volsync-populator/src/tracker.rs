//! In-use bookkeeping on snapshots
//!
//! A target claim marks the snapshot it restores from before the shadow claim
//! exists, and releases the mark once the hand-off is done. Both operations
//! write only when the label actually changes.

use tracing::{debug, info};

use volsync_common::crd::VolumeSnapshot;
use volsync_common::lifecycle::{
    in_use_selector, is_in_use_by, mark_in_use_patch, release_in_use_patch,
};
use volsync_common::Error;

use crate::claim::ClaimIdentity;
use crate::client::PopulatorClient;

/// Record that `target` is restoring from `snapshot`
pub async fn mark_snapshot_in_use(
    kube: &dyn PopulatorClient,
    snapshot: &VolumeSnapshot,
    target: &ClaimIdentity,
) -> Result<(), Error> {
    if is_in_use_by(&snapshot.metadata, &target.uid) {
        return Ok(());
    }
    let name = snapshot.metadata.name.as_deref().unwrap_or_default();
    kube.patch_snapshot(&target.namespace, name, &mark_in_use_patch(&target.uid))
        .await?;
    info!(snapshot = %name, claim = %target.key(), "snapshot marked in use");
    Ok(())
}

/// Drop `target`'s in-use label from every snapshot carrying it
///
/// Returns the number of snapshots released.
pub async fn release_snapshots_in_use(
    kube: &dyn PopulatorClient,
    target: &ClaimIdentity,
) -> Result<usize, Error> {
    let snapshots = kube
        .list_snapshots(&target.namespace, &in_use_selector(&target.uid))
        .await?;

    let patch = release_in_use_patch(&target.uid);
    for snapshot in &snapshots {
        let name = snapshot.metadata.name.as_deref().unwrap_or_default();
        kube.patch_snapshot(&target.namespace, name, &patch).await?;
        debug!(snapshot = %name, claim = %target.key(), "snapshot released");
    }
    Ok(snapshots.len())
}
