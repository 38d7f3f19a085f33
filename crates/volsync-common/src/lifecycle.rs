//! Lifecycle labels for temporary objects
//!
//! VolSync marks the objects it creates so they can be reclaimed later without
//! any bookkeeping of its own:
//!
//! - `volsync.backube/cleanup=<owner-uid>`: reclaim together with the owner
//! - `volsync.backube/do-not-delete`: never delete, set by users or other tools
//! - `volsync.backube/volpop-pvc-<claim-uid>`: a snapshot is being restored
//!   into a claim; one label per consumer, acting as a reference count
//!
//! Everything here is a pure function of object metadata. The functions
//! returning patches build JSON merge patches; callers send them.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use serde_json::{json, Map, Value};

/// Label carrying the uid of the object whose cleanup reclaims this one
pub const CLEANUP_LABEL: &str = "volsync.backube/cleanup";

/// Presence-only label that exempts an object from reclamation
pub const DO_NOT_DELETE_LABEL: &str = "volsync.backube/do-not-delete";

/// Prefix of the per-consumer in-use label; the consumer claim uid is appended
pub const IN_USE_LABEL_PREFIX: &str = "volsync.backube/volpop-pvc-";

/// Standard label recording which tool created an object
pub const CREATED_BY_LABEL: &str = "app.kubernetes.io/created-by";

/// Value of [`CREATED_BY_LABEL`] for objects created by VolSync
pub const CREATED_BY_VALUE: &str = "volsync";

/// Label selector matching objects created by VolSync
pub const CREATED_BY_SELECTOR: &str = "app.kubernetes.io/created-by=volsync";

/// Node chosen by the scheduler for WaitForFirstConsumer claims
pub const SELECTED_NODE_ANNOTATION: &str = "volume.kubernetes.io/selected-node";

/// Provenance annotation written on a volume after it was populated
pub const POPULATED_FROM_ANNOTATION: &str = "volsync.backube/populated-from";

/// Set by the in-tree to CSI migration on claims of migrated storage classes
pub const MIGRATED_TO_ANNOTATION: &str = "pv.kubernetes.io/migrated-to";

/// Labels every VolSync-created object carries
pub fn created_by_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(CREATED_BY_LABEL.to_string(), CREATED_BY_VALUE.to_string())])
}

/// Label selector for objects reclaimed together with `owner_uid`
pub fn cleanup_selector(owner_uid: &str) -> String {
    format!("{}={}", CLEANUP_LABEL, owner_uid)
}

/// In-use label key for a consumer claim
pub fn in_use_label(consumer_uid: &str) -> String {
    format!("{}{}", IN_USE_LABEL_PREFIX, consumer_uid)
}

/// Existence selector for the in-use label of a consumer claim
pub fn in_use_selector(consumer_uid: &str) -> String {
    in_use_label(consumer_uid)
}

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

/// True if the object is reclaimed together with `owner_uid`
pub fn is_marked_for_cleanup_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    label(meta, CLEANUP_LABEL) == Some(owner_uid)
}

/// True if the object carries the do-not-delete label (any value)
pub fn is_do_not_delete(meta: &ObjectMeta) -> bool {
    label(meta, DO_NOT_DELETE_LABEL).is_some()
}

/// True if `consumer_uid` has marked the object as in use
pub fn is_in_use_by(meta: &ObjectMeta, consumer_uid: &str) -> bool {
    label(meta, &in_use_label(consumer_uid)).is_some()
}

/// Uids of all consumers holding an in-use label on the object
pub fn in_use_consumers(meta: &ObjectMeta) -> Vec<&str> {
    meta.labels
        .iter()
        .flatten()
        .filter_map(|(k, _)| k.strip_prefix(IN_USE_LABEL_PREFIX))
        .collect()
}

/// True if some consumer other than `self_uid` holds an in-use label
pub fn is_in_use_by_other(meta: &ObjectMeta, self_uid: &str) -> bool {
    in_use_consumers(meta).iter().any(|uid| *uid != self_uid)
}

/// True if an owner reference exists for anything other than `owner_uid`
pub fn has_other_owner(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| r.uid != owner_uid)
}

/// Patch adding the cleanup label for `owner_uid`
pub fn mark_for_cleanup_patch(owner_uid: &str) -> Value {
    json!({ "metadata": { "labels": { CLEANUP_LABEL: owner_uid } } })
}

/// Patch adding the in-use label for a consumer claim
///
/// The value is the consumer uid. Claim names may be longer than the 63
/// characters a label value allows.
pub fn mark_in_use_patch(consumer_uid: &str) -> Value {
    json!({ "metadata": { "labels": { in_use_label(consumer_uid): consumer_uid } } })
}

/// Patch removing the in-use label of a consumer claim
pub fn release_in_use_patch(consumer_uid: &str) -> Value {
    json!({ "metadata": { "labels": { in_use_label(consumer_uid): Value::Null } } })
}

/// Patch giving up `owner_uid`'s claim on a shared object
///
/// Removes the cleanup label and the owner reference with that uid, keeping
/// every other owner reference. The current resourceVersion is included, so
/// the write fails with a conflict if anyone changed the object since it was
/// read. Merge patches replace lists wholesale, which makes that precondition
/// necessary for the ownerReferences rewrite.
pub fn relinquish_patch(meta: &ObjectMeta, owner_uid: &str) -> Value {
    let mut metadata = Map::new();
    metadata.insert(
        "labels".to_string(),
        json!({ CLEANUP_LABEL: Value::Null }),
    );
    if let Some(rv) = &meta.resource_version {
        metadata.insert("resourceVersion".to_string(), json!(rv));
    }
    if let Some(refs) = &meta.owner_references {
        if refs.iter().any(|r| r.uid == owner_uid) {
            let remaining: Vec<_> = refs.iter().filter(|r| r.uid != owner_uid).collect();
            let value = if remaining.is_empty() {
                Value::Null
            } else {
                json!(remaining)
            };
            metadata.insert("ownerReferences".to_string(), value);
        }
    }
    json!({ "metadata": metadata })
}
