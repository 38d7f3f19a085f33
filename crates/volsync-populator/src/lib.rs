//! Volume populator for ReplicationDestination data sources
//!
//! A claim with `dataSourceRef` pointing at a ReplicationDestination is
//! provisioned from the destination's latest snapshot: a shadow claim restores
//! the snapshot, its volume is rebound to the target claim, and the shadow is
//! removed. Snapshots are reference counted through labels so that images
//! shared with other consumers are never deleted underneath them.

#![deny(missing_docs)]

pub mod claim;
pub mod client;
pub mod controller;
pub mod gc;
pub mod index;
pub mod provisioner;
pub mod rebind;
pub mod tracker;

pub use client::{DeletePrecondition, PopulatorClient, PopulatorClientImpl};
pub use controller::{error_policy, reconcile, PopulatorContext, PopulatorContextBuilder};
pub use gc::{cleanup, mark_old_image_for_cleanup, CleanupKind, CleanupOwner, CleanupReport};
pub use index::ClaimIndex;
pub use provisioner::{ensure_shadow_claim, ShadowClaim};
pub use rebind::{try_rebind, RebindStatus};
pub use tracker::{mark_snapshot_in_use, release_snapshots_in_use};
