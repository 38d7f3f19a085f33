//! `snapshot.storage.k8s.io/v1` VolumeSnapshot
//!
//! Installed by the external-snapshotter project; the CRD is never generated
//! from this type.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the external snapshot API
pub const SNAPSHOT_GROUP: &str = "snapshot.storage.k8s.io";

/// Kind of a snapshot object
pub const SNAPSHOT_KIND: &str = "VolumeSnapshot";

/// A point-in-time copy of a volume's data
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    namespaced,
    status = "VolumeSnapshotStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Where the snapshot is taken from
    pub source: VolumeSnapshotSource,

    /// Snapshot class used to take the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Exactly one of the fields is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    /// Claim to snapshot (dynamic snapshot)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    /// Pre-provisioned content to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

/// Observed state reported by the snapshot controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    /// Name of the bound VolumeSnapshotContent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_volume_snapshot_content_name: Option<String>,

    /// True once the snapshot can be restored from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// Minimum size of a volume restored from this snapshot (quantity string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<String>,
}
