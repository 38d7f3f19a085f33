//! Custom resource types used by the VolSync controllers
//!
//! `ReplicationDestination` is owned by VolSync. `VolumeSnapshot` and
//! `VolumePopulator` belong to the external snapshot and populator projects;
//! only the fields the controllers read or write are modelled.

mod image;
mod replication_destination;
mod volume_populator;
mod volume_snapshot;

pub use image::ImageReference;
pub use replication_destination::{
    ReplicationDestination, ReplicationDestinationSpec, ReplicationDestinationStatus,
    ReplicationDestinationTriggerSpec, REPLICATION_DESTINATION_GROUP,
    REPLICATION_DESTINATION_KIND,
};
pub use volume_populator::{SourceKind, VolumePopulator, VOLUME_POPULATOR_NAME};
pub use volume_snapshot::{
    VolumeSnapshot, VolumeSnapshotSource, VolumeSnapshotSpec, VolumeSnapshotStatus,
    SNAPSHOT_GROUP, SNAPSHOT_KIND,
};
