//! ReplicationDestination CRD types
//!
//! A ReplicationDestination receives data from a remote source and captures
//! each completed sync as an image (normally a VolumeSnapshot) published in
//! `status.latestImage`. The populator only reads that field; the movers and
//! the sync scheduler that fill it in live elsewhere.
//!
//! Only the fields the populator reads are modelled. The installed CRD marks
//! `spec` and `status` with `x-kubernetes-preserve-unknown-fields` so mover
//! settings (`rsync`, `restic`, ...) and mover status survive the schema.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ImageReference;

/// API group of VolSync resources
pub const REPLICATION_DESTINATION_GROUP: &str = "volsync.backube";

/// Kind used in `PersistentVolumeClaim.spec.dataSourceRef`
pub const REPLICATION_DESTINATION_KIND: &str = "ReplicationDestination";

/// Destination side of a replication relationship
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "volsync.backube",
    version = "v1alpha1",
    kind = "ReplicationDestination",
    plural = "replicationdestinations",
    namespaced,
    status = "ReplicationDestinationStatus",
    printcolumn = r#"{"name":"Last sync","type":"string","format":"date-time","jsonPath":".status.lastSyncTime"}"#,
    printcolumn = r#"{"name":"Duration","type":"string","jsonPath":".status.lastSyncDuration"}"#,
    printcolumn = r#"{"name":"Next sync","type":"string","format":"date-time","jsonPath":".status.nextSyncTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationSpec {
    /// When to run a synchronization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ReplicationDestinationTriggerSpec>,

    /// Pause all synchronization
    #[serde(default)]
    pub paused: bool,
}

/// Sync trigger: a cron schedule or a manual tag
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationTriggerSpec {
    /// Cronspec for periodic syncs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Sync once each time this value changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<String>,
}

/// Observed state of a ReplicationDestination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationDestinationStatus {
    /// Time of the most recent completed sync (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    /// Duration of the most recent completed sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_duration: Option<String>,

    /// Time the next sync is scheduled (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_sync_time: Option<String>,

    /// Most recent image captured by a completed sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<ImageReference>,
}

impl ReplicationDestination {
    /// CRD to install: the generated schema with `spec` and `status` kept open
    pub fn crd_preserving_unknown_fields() -> CustomResourceDefinition {
        let mut crd = Self::crd();
        for version in &mut crd.spec.versions {
            let properties = version
                .schema
                .as_mut()
                .and_then(|s| s.open_api_v3_schema.as_mut())
                .and_then(|s| s.properties.as_mut());
            if let Some(properties) = properties {
                for field in ["spec", "status"] {
                    if let Some(schema) = properties.get_mut(field) {
                        schema.x_kubernetes_preserve_unknown_fields = Some(true);
                    }
                }
            }
        }
        crd
    }

    /// The latest image, if one exists and is backed by a VolumeSnapshot
    pub fn latest_snapshot(&self) -> Option<&ImageReference> {
        self.status
            .as_ref()
            .and_then(|s| s.latest_image.as_ref())
            .filter(|image| image.is_snapshot())
    }
}
