//! VolumePopulator registration
//!
//! Registers ReplicationDestination as a populator data source so the
//! volume-data-source-validator accepts claims referencing it. The
//! VolumePopulator CRD is optional; without it the populator still works,
//! claims just get a validator warning event.

use kube::Client;
use tracing::{info, warn};

use volsync_common::crd::{VolumePopulator, VOLUME_POPULATOR_NAME};
use volsync_common::kube_utils::{apply_cluster_resource, crd_exists};
use volsync_common::FIELD_MANAGER;

/// Name of the VolumePopulator CRD
const VOLUME_POPULATOR_CRD: &str = "volumepopulators.populator.storage.k8s.io";

/// Apply the VolumePopulator object if the CRD is installed
///
/// Returns true if the registration was applied. Failures are logged and
/// reported as false; they never stop the operator.
pub async fn ensure_volume_populator_registered(client: &Client) -> bool {
    match crd_exists(client, VOLUME_POPULATOR_CRD).await {
        Ok(true) => {}
        Ok(false) => {
            info!(
                crd = VOLUME_POPULATOR_CRD,
                "VolumePopulator CRD not installed, skipping registration"
            );
            return false;
        }
        Err(e) => {
            warn!(error = %e, "failed to look up VolumePopulator CRD");
            return false;
        }
    }

    let populator = VolumePopulator::for_replication_destination();
    match apply_cluster_resource(client, &populator, FIELD_MANAGER).await {
        Ok(()) => {
            info!(name = VOLUME_POPULATOR_NAME, "volume populator registered");
            true
        }
        Err(e) => {
            warn!(error = %e, name = VOLUME_POPULATOR_NAME, "failed to register volume populator");
            false
        }
    }
}
