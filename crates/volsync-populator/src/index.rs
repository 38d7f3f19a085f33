//! Secondary indices from watched objects back to target claims
//!
//! A change to a ReplicationDestination or a StorageClass has to re-trigger
//! every claim waiting on it. Both indices are fed from the claim watch
//! stream and only hold claims that reference a ReplicationDestination.

use std::collections::HashSet;

use dashmap::DashMap;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::ResourceExt;

use volsync_common::crd::ReplicationDestination;
use volsync_common::kube_utils::object_key;

use crate::claim::{replication_destination_name, storage_class_name};

type ClaimRef = ObjectRef<PersistentVolumeClaim>;

#[derive(Clone, Debug, PartialEq, Eq)]
struct IndexEntry {
    source: String,
    storage_class: Option<String>,
}

/// Claims keyed by the objects they wait on
#[derive(Debug, Default)]
pub struct ClaimIndex {
    by_source: DashMap<String, HashSet<ClaimRef>>,
    by_storage_class: DashMap<String, HashSet<ClaimRef>>,
    entries: DashMap<ClaimRef, IndexEntry>,
}

impl ClaimIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a claim watch event
    pub fn observe(&self, event: &watcher::Event<PersistentVolumeClaim>) {
        match event {
            watcher::Event::Apply(claim) | watcher::Event::InitApply(claim) => self.upsert(claim),
            watcher::Event::Delete(claim) => self.remove(claim),
            // Relist: entries are rebuilt from the InitApply events that follow
            watcher::Event::Init => self.clear(),
            watcher::Event::InitDone => {}
        }
    }

    /// Index a created or updated claim
    pub fn upsert(&self, claim: &PersistentVolumeClaim) {
        let key = ObjectRef::from_obj(claim);
        let namespace = claim.namespace().unwrap_or_default();
        let entry = replication_destination_name(claim).map(|source| IndexEntry {
            source: object_key(&namespace, source),
            storage_class: storage_class_name(claim).map(str::to_string),
        });

        let previous = match &entry {
            Some(e) => self.entries.insert(key.clone(), e.clone()),
            None => self.entries.remove(&key).map(|(_, e)| e),
        };
        if previous == entry {
            return;
        }
        if let Some(prev) = previous {
            self.unlink(&key, &prev);
        }
        if let Some(e) = entry {
            link(&self.by_source, &e.source, &key);
            if let Some(sc) = &e.storage_class {
                link(&self.by_storage_class, sc, &key);
            }
        }
    }

    /// Drop a deleted claim
    pub fn remove(&self, claim: &PersistentVolumeClaim) {
        let key = ObjectRef::from_obj(claim);
        if let Some((_, prev)) = self.entries.remove(&key) {
            self.unlink(&key, &prev);
        }
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.clear();
        self.by_source.clear();
        self.by_storage_class.clear();
    }

    /// Claims referencing ReplicationDestination `namespace/name`
    pub fn claims_for_source(&self, namespace: &str, name: &str) -> Vec<ClaimRef> {
        lookup(&self.by_source, &object_key(namespace, name))
    }

    /// Claims referencing a ReplicationDestination that use storage class `name`
    pub fn claims_for_storage_class(&self, name: &str) -> Vec<ClaimRef> {
        lookup(&self.by_storage_class, name)
    }

    /// Mapper for ReplicationDestination changes
    pub fn map_replication_destination(&self, rd: &ReplicationDestination) -> Vec<ClaimRef> {
        match rd.namespace() {
            Some(namespace) => self.claims_for_source(&namespace, &rd.name_any()),
            None => Vec::new(),
        }
    }

    /// Mapper for StorageClass changes
    pub fn map_storage_class(&self, sc: &StorageClass) -> Vec<ClaimRef> {
        self.claims_for_storage_class(&sc.name_any())
    }

    /// Number of indexed claims
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no claim is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unlink(&self, key: &ClaimRef, entry: &IndexEntry) {
        unlink(&self.by_source, &entry.source, key);
        if let Some(sc) = &entry.storage_class {
            unlink(&self.by_storage_class, sc, key);
        }
    }
}

fn link(map: &DashMap<String, HashSet<ClaimRef>>, key: &str, claim: &ClaimRef) {
    map.entry(key.to_string()).or_default().insert(claim.clone());
}

fn unlink(map: &DashMap<String, HashSet<ClaimRef>>, key: &str, claim: &ClaimRef) {
    if let Some(mut set) = map.get_mut(key) {
        set.remove(claim);
    }
    map.remove_if(key, |_, set| set.is_empty());
}

fn lookup(map: &DashMap<String, HashSet<ClaimRef>>, key: &str) -> Vec<ClaimRef> {
    map.get(key)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}
