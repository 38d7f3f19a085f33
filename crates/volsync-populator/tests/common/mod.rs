//! In-memory cluster for driving the populator without an API server
//!
//! Implements [`PopulatorClient`] over plain maps with the API server
//! behaviours the populator relies on: resource versions bumped on every
//! write, merge patches with an optional `metadata.resourceVersion`
//! precondition, guarded deletes, `AlreadyExists` on duplicate creates and
//! `Invalid` for label values longer than 63 characters.
//! Helpers stand in for the binder and the snapshot restore provisioner.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimStatus,
    PersistentVolumeSpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ObjectMeta;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use volsync_common::crd::{
    ImageReference, ReplicationDestination, ReplicationDestinationSpec,
    ReplicationDestinationStatus, VolumeSnapshot, VolumeSnapshotSpec,
};
use volsync_common::events::EventPublisher;
use volsync_common::Error;
use volsync_populator::{DeletePrecondition, PopulatorClient};

pub const NAMESPACE: &str = "apps";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    claims: BTreeMap<Key, PersistentVolumeClaim>,
    volumes: BTreeMap<String, PersistentVolume>,
    storage_classes: BTreeMap<String, StorageClass>,
    destinations: BTreeMap<Key, ReplicationDestination>,
    snapshots: BTreeMap<Key, VolumeSnapshot>,
    jobs: BTreeMap<Key, Job>,
    next_version: u64,
    next_uid: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn uid(&mut self, prefix: &str) -> String {
        self.next_uid += 1;
        format!("{}-{}", prefix, self.next_uid)
    }
}

/// Fake API server state plus a count of writes made through the client
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    writes: AtomicUsize,
    storage_class_reads: AtomicUsize,
}

fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(meta: &ObjectMeta, selector: &str) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(obj) = target {
        for (k, v) in fields {
            if v.is_null() {
                obj.remove(k);
            } else {
                merge_patch(obj.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

const MAX_LABEL_VALUE_LEN: usize = 63;

fn validate_labels(meta: &ObjectMeta) -> Result<(), Error> {
    let too_long = meta
        .labels
        .iter()
        .flatten()
        .find(|(_, v)| v.len() > MAX_LABEL_VALUE_LEN);
    match too_long {
        Some((k, _)) => Err(api_error(
            422,
            "Invalid",
            &format!("metadata.labels: Invalid value for {k}: must be no more than 63 characters"),
        )),
        None => Ok(()),
    }
}

fn apply_patch<K>(obj: &K, patch: &Value, version: String) -> Result<K, Error>
where
    K: Resource + Serialize + DeserializeOwned,
{
    if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
        if obj.meta().resource_version.as_deref() != Some(expected) {
            return Err(api_error(409, "Conflict", "the object has been modified"));
        }
    }
    let mut value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    merge_patch(&mut value, patch);
    let mut patched: K =
        serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))?;
    validate_labels(patched.meta())?;
    patched.meta_mut().resource_version = Some(version);
    Ok(patched)
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster lock poisoned")
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Writes made through the [`PopulatorClient`] interface
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// StorageClass lookups made through the [`PopulatorClient`] interface
    pub fn storage_class_reads(&self) -> usize {
        self.storage_class_reads.load(Ordering::SeqCst)
    }

    // Seeding

    pub fn add_storage_class(&self, name: &str, provisioner: &str) {
        let class = StorageClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            provisioner: provisioner.to_string(),
            volume_binding_mode: Some("Immediate".to_string()),
            ..Default::default()
        };
        self.state().storage_classes.insert(name.to_string(), class);
    }

    /// Add a ReplicationDestination, returning its uid
    pub fn add_destination(&self, name: &str, latest_snapshot: Option<&str>) -> String {
        let mut state = self.state();
        let mut rd = ReplicationDestination::new(name, ReplicationDestinationSpec::default());
        let uid = state.uid("rd");
        rd.metadata.namespace = Some(NAMESPACE.to_string());
        rd.metadata.uid = Some(uid.clone());
        rd.metadata.resource_version = Some(state.bump());
        rd.status = Some(ReplicationDestinationStatus {
            latest_image: latest_snapshot.map(ImageReference::snapshot),
            ..Default::default()
        });
        state.destinations.insert(key(NAMESPACE, name), rd);
        uid
    }

    pub fn set_latest_image(&self, destination: &str, snapshot: &str) {
        let mut state = self.state();
        let version = state.bump();
        if let Some(rd) = state.destinations.get_mut(&key(NAMESPACE, destination)) {
            rd.status.get_or_insert_with(Default::default).latest_image =
                Some(ImageReference::snapshot(snapshot));
            rd.metadata.resource_version = Some(version);
        }
    }

    /// Add a snapshot with the given labels and owner uids
    pub fn add_snapshot(&self, name: &str, labels: &[(&str, &str)], owner_uids: &[&str]) {
        let mut state = self.state();
        let mut snap = VolumeSnapshot::new(name, VolumeSnapshotSpec::default());
        snap.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(state.uid("snap")),
            resource_version: Some(state.bump()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            owner_references: (!owner_uids.is_empty()).then(|| {
                owner_uids
                    .iter()
                    .map(|uid| k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                        api_version: "volsync.backube/v1alpha1".to_string(),
                        kind: "ReplicationDestination".to_string(),
                        name: format!("owner-{uid}"),
                        uid: uid.to_string(),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        };
        state.snapshots.insert(key(NAMESPACE, name), snap);
    }

    /// Store a claim as the API server would after a user created it
    pub fn add_claim(&self, mut claim: PersistentVolumeClaim) -> PersistentVolumeClaim {
        let mut state = self.state();
        claim.metadata.uid.get_or_insert_with(|| state.uid("pvc"));
        claim.metadata.resource_version = Some(state.bump());
        let k = key(
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            &claim.name_any(),
        );
        state.claims.insert(k, claim.clone());
        claim
    }

    // Inspection

    pub fn claim(&self, name: &str) -> Option<PersistentVolumeClaim> {
        self.state().claims.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.state().volumes.get(name).cloned()
    }

    pub fn snapshot(&self, name: &str) -> Option<VolumeSnapshot> {
        self.state().snapshots.get(&key(NAMESPACE, name)).cloned()
    }

    // Other controllers

    /// Snapshot restore provisioner: create a volume for the claim and bind it
    pub fn provision_volume(&self, claim_name: &str, volume_name: &str) {
        let mut state = self.state();
        let Some(claim) = state.claims.get(&key(NAMESPACE, claim_name)).cloned() else {
            return;
        };
        let volume = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(volume_name.to_string()),
                resource_version: Some(state.bump()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                claim_ref: Some(ObjectReference {
                    kind: Some("PersistentVolumeClaim".to_string()),
                    name: claim.metadata.name.clone(),
                    namespace: claim.metadata.namespace.clone(),
                    uid: claim.metadata.uid.clone(),
                    resource_version: claim.metadata.resource_version.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        state.volumes.insert(volume_name.to_string(), volume);

        let version = state.bump();
        if let Some(stored) = state.claims.get_mut(&key(NAMESPACE, claim_name)) {
            if let Some(spec) = stored.spec.as_mut() {
                spec.volume_name = Some(volume_name.to_string());
            }
            stored.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".to_string()),
                ..Default::default()
            });
            stored.metadata.resource_version = Some(version);
        }
    }

    /// Binder: follow the volume's claimRef, binding the referenced claim
    /// and marking any other claim holding the volume as `Lost`
    pub fn sync_binder(&self, volume_name: &str) {
        let mut state = self.state();
        let Some(claim_ref) = state
            .volumes
            .get(volume_name)
            .and_then(|v| v.spec.as_ref())
            .and_then(|s| s.claim_ref.clone())
        else {
            return;
        };

        let keys: Vec<Key> = state.claims.keys().cloned().collect();
        for k in keys {
            let version = state.bump();
            let Some(claim) = state.claims.get_mut(&k) else {
                continue;
            };
            let holds_volume = claim
                .spec
                .as_ref()
                .and_then(|s| s.volume_name.as_deref())
                == Some(volume_name);
            let is_referenced = claim.metadata.uid == claim_ref.uid;

            if is_referenced {
                if let Some(spec) = claim.spec.as_mut() {
                    spec.volume_name = Some(volume_name.to_string());
                }
                claim.status = Some(PersistentVolumeClaimStatus {
                    phase: Some("Bound".to_string()),
                    ..Default::default()
                });
                claim.metadata.resource_version = Some(version);
            } else if holds_volume {
                claim.status = Some(PersistentVolumeClaimStatus {
                    phase: Some("Lost".to_string()),
                    ..Default::default()
                });
                claim.metadata.resource_version = Some(version);
            }
        }
    }

    /// Another writer touching a snapshot, bumping its resource version
    pub fn touch_snapshot(&self, name: &str) {
        let mut state = self.state();
        let version = state.bump();
        if let Some(snap) = state.snapshots.get_mut(&key(NAMESPACE, name)) {
            snap.metadata.resource_version = Some(version);
        }
    }
}

#[async_trait]
impl PopulatorClient for FakeCluster {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        Ok(self.state().claims.get(&key(namespace, name)).cloned())
    }

    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Error> {
        let mut state = self.state();
        let k = key(
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            &claim.name_any(),
        );
        if state.claims.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists", "claim already exists"));
        }
        validate_labels(&claim.metadata)?;
        let mut stored = claim.clone();
        stored.metadata.uid = Some(state.uid("pvc"));
        stored.metadata.resource_version = Some(state.bump());
        stored.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        state.claims.insert(k, stored.clone());
        self.wrote();
        Ok(stored)
    }

    async fn list_claims(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, Error> {
        Ok(self
            .state()
            .claims
            .iter()
            .filter(|((ns, _), c)| ns == namespace && matches_selector(&c.metadata, selector))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), Error> {
        if self.state().claims.remove(&key(namespace, name)).is_some() {
            self.wrote();
        }
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>, Error> {
        Ok(self.state().volumes.get(name).cloned())
    }

    async fn patch_volume(&self, name: &str, patch: &Value) -> Result<(), Error> {
        let mut state = self.state();
        let version = state.bump();
        let current = state
            .volumes
            .get(name)
            .ok_or_else(|| api_error(404, "NotFound", "volume not found"))?;
        let patched = apply_patch(current, patch, version)?;
        state.volumes.insert(name.to_string(), patched);
        self.wrote();
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error> {
        self.storage_class_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().storage_classes.get(name).cloned())
    }

    async fn get_replication_destination(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationDestination>, Error> {
        Ok(self.state().destinations.get(&key(namespace, name)).cloned())
    }

    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeSnapshot>, Error> {
        Ok(self.state().snapshots.get(&key(namespace, name)).cloned())
    }

    async fn list_snapshots(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<VolumeSnapshot>, Error> {
        Ok(self
            .state()
            .snapshots
            .iter()
            .filter(|((ns, _), s)| ns == namespace && matches_selector(&s.metadata, selector))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn patch_snapshot(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), Error> {
        let mut state = self.state();
        let version = state.bump();
        let k = key(namespace, name);
        let current = state
            .snapshots
            .get(&k)
            .ok_or_else(|| api_error(404, "NotFound", "snapshot not found"))?;
        let patched = apply_patch(current, patch, version)?;
        state.snapshots.insert(k, patched);
        self.wrote();
        Ok(())
    }

    async fn delete_snapshot(
        &self,
        namespace: &str,
        name: &str,
        precondition: &DeletePrecondition,
    ) -> Result<(), Error> {
        let mut state = self.state();
        let k = key(namespace, name);
        let current = state
            .snapshots
            .get(&k)
            .ok_or_else(|| api_error(404, "NotFound", "snapshot not found"))?;
        let version_matches =
            current.metadata.resource_version.as_deref() == Some(precondition.resource_version.as_str());
        let uid_matches = precondition
            .uid
            .as_ref()
            .map_or(true, |uid| current.metadata.uid.as_ref() == Some(uid));
        if !version_matches || !uid_matches {
            return Err(api_error(409, "Conflict", "precondition failed"));
        }
        state.snapshots.remove(&k);
        self.wrote();
        Ok(())
    }

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, Error> {
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|((ns, _), j)| ns == namespace && matches_selector(&j.metadata, selector))
            .map(|(_, j)| j.clone())
            .collect())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        if self.state().jobs.remove(&key(namespace, name)).is_some() {
            self.wrote();
        }
        Ok(())
    }
}

/// Event publisher remembering the reasons it was given
#[derive(Default)]
pub struct RecordedEvents {
    reasons: Mutex<Vec<String>>,
}

impl RecordedEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().expect("events lock poisoned").clone()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.reasons().iter().filter(|r| *r == reason).count()
    }
}

#[async_trait]
impl EventPublisher for RecordedEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.reasons
            .lock()
            .expect("events lock poisoned")
            .push(reason.to_string());
    }
}

/// An unbound claim asking to be populated from ReplicationDestination `source`
///
/// Without a storage class the claim relies on the cluster default.
pub fn target_claim(
    name: &str,
    source: &str,
    storage_class: Option<&str>,
) -> PersistentVolumeClaim {
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimSpec, TypedObjectReference, VolumeResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("1Gi".to_string()),
                )])),
                ..Default::default()
            }),
            storage_class_name: storage_class.map(str::to_string),
            data_source_ref: Some(TypedObjectReference {
                api_group: Some("volsync.backube".to_string()),
                kind: "ReplicationDestination".to_string(),
                name: source.to_string(),
                namespace: None,
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        }),
    }
}
