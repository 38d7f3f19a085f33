//! Typed reference to a point-in-time image

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::volume_snapshot::{SNAPSHOT_GROUP, SNAPSHOT_KIND};

/// Reference to an image in the same namespace as the object publishing it.
///
/// Mirrors `TypedLocalObjectReference`; the kind and API group decide what the
/// image is backed by. Only `VolumeSnapshot` images can be restored from.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    /// API group of the referenced object (`None` for the core group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    /// Kind of the referenced object
    pub kind: String,
    /// Name of the referenced object
    pub name: String,
}

impl ImageReference {
    /// Reference to a `VolumeSnapshot` by name
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            api_group: Some(SNAPSHOT_GROUP.to_string()),
            kind: SNAPSHOT_KIND.to_string(),
            name: name.into(),
        }
    }

    /// True if the reference names a `VolumeSnapshot` from the snapshot API group
    pub fn is_snapshot(&self) -> bool {
        self.kind == SNAPSHOT_KIND && self.api_group.as_deref() == Some(SNAPSHOT_GROUP)
    }

    /// Convert to the core type used in `PersistentVolumeClaim.spec.dataSource`
    pub fn to_data_source(&self) -> TypedLocalObjectReference {
        TypedLocalObjectReference {
            api_group: self.api_group.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }
}
