//! `populator.storage.k8s.io/v1beta1` VolumePopulator
//!
//! Registers a kind as a valid `dataSourceRef` target so the
//! volume-data-source-validator does not flag claims using it. The object has
//! no spec, just a top-level `sourceKind`, so it is modelled as a plain
//! serializable struct and applied through `DynamicObject`.

use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};

use super::{REPLICATION_DESTINATION_GROUP, REPLICATION_DESTINATION_KIND};
use crate::kube_utils::HasApiResource;
use crate::lifecycle::created_by_labels;

/// Name of the registration object for ReplicationDestination sources
pub const VOLUME_POPULATOR_NAME: &str = "volsync-replicationdestination";

/// Cluster-scoped populator registration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumePopulator {
    /// API version
    #[serde(default = "VolumePopulator::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "VolumePopulator::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Kind handled by the populator
    pub source_kind: SourceKind,
}

/// Group/kind pair accepted as a data source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceKind {
    /// API group
    pub group: String,
    /// Kind
    pub kind: String,
}

impl HasApiResource for VolumePopulator {
    const API_VERSION: &'static str = "populator.storage.k8s.io/v1beta1";
    const KIND: &'static str = "VolumePopulator";
}

impl VolumePopulator {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Registration for ReplicationDestination data sources
    pub fn for_replication_destination() -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta {
                name: Some(VOLUME_POPULATOR_NAME.to_string()),
                labels: Some(created_by_labels()),
                ..Default::default()
            },
            source_kind: SourceKind {
                group: REPLICATION_DESTINATION_GROUP.to_string(),
                kind: REPLICATION_DESTINATION_KIND.to_string(),
            },
        }
    }
}
