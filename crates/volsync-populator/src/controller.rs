//! Populator reconciliation
//!
//! Drives a target claim whose `dataSourceRef` names a ReplicationDestination
//! from unbound to bound to a volume restored from the latest snapshot:
//!
//! 1. check the storage class can provision from a snapshot
//! 2. ensure the shadow claim restoring the snapshot
//! 3. hand the shadow's volume over to the target claim
//! 4. once the shadow claim is `Lost`, delete it and release the snapshot
//!
//! Every step is inferred from cluster state; nothing is remembered between
//! runs. Whenever the next step depends on another controller the reconcile
//! returns `await_change` and is re-triggered by a watch.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use volsync_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use volsync_common::lifecycle::MIGRATED_TO_ANNOTATION;
use volsync_common::Error;

use crate::claim::{
    bound_volume, is_lost, replication_destination_name, selected_node, shadow_claim_name,
    storage_class_name, ClaimIdentity,
};
use crate::client::{PopulatorClient, PopulatorClientImpl};
use crate::gc::{self, CleanupKind, CleanupOwner};
use crate::provisioner::{ensure_shadow_claim, ShadowClaim};
use crate::rebind::{try_rebind, RebindStatus};
use crate::tracker::release_snapshots_in_use;

/// Name reported by the event recorder
pub const CONTROLLER_NAME: &str = "volsync-populator";

/// Provisioner prefix of in-tree volume plugins
const IN_TREE_PROVISIONER_PREFIX: &str = "kubernetes.io/";

/// Binding mode that delays provisioning until a pod is scheduled
const WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";

/// Requeue delay after an optimistic-concurrency conflict
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue delay after any other retryable failure
const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Shared context for the populator controller
pub struct PopulatorContext {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn PopulatorClient>,
    /// Event recorder
    pub events: Arc<dyn EventPublisher>,
}

impl PopulatorContext {
    /// Create a builder for constructing a context
    pub fn builder(client: Client) -> PopulatorContextBuilder {
        PopulatorContextBuilder::new(client)
    }

    /// Context backed by the given client
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Context from explicit collaborators, used where no cluster is available
    pub fn from_parts(kube: Arc<dyn PopulatorClient>, events: Arc<dyn EventPublisher>) -> Self {
        Self { kube, events }
    }
}

/// Builder for [`PopulatorContext`]
pub struct PopulatorContextBuilder {
    client: Client,
    kube: Option<Arc<dyn PopulatorClient>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl PopulatorContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
        }
    }

    /// Override the Kubernetes operations
    pub fn kube_client(mut self, kube: Arc<dyn PopulatorClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the context
    pub fn build(self) -> PopulatorContext {
        PopulatorContext {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(PopulatorClientImpl::new(self.client.clone()))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, CONTROLLER_NAME))),
        }
    }
}

enum StorageClassCheck {
    /// Provisioning can proceed, pinned to this node if set
    Ready(Option<String>),
    /// Not yet, or never, provisionable
    Wait,
}

/// Reconcile a claim that may need populating
#[instrument(skip(claim, ctx), fields(claim = %claim.name_any(), namespace = ?claim.namespace()))]
pub async fn reconcile(
    claim: Arc<PersistentVolumeClaim>,
    ctx: Arc<PopulatorContext>,
) -> Result<Action, Error> {
    let Some(source) = replication_destination_name(&claim) else {
        return Ok(Action::await_change());
    };
    if claim.metadata.deletion_timestamp.is_some() {
        debug!("claim is being deleted");
        return Ok(Action::await_change());
    }
    let identity = ClaimIdentity::of(&claim)?;

    if bound_volume(&claim).is_some() {
        return finish(&ctx, &claim, &identity).await;
    }

    let node = match check_storage_class(&ctx, &claim, &identity).await? {
        StorageClassCheck::Ready(node) => node,
        StorageClassCheck::Wait => return Ok(Action::await_change()),
    };

    let shadow =
        ensure_shadow_claim(ctx.kube.as_ref(), &claim, &identity, source, node.as_deref()).await?;
    let shadow_claim = match &shadow {
        ShadowClaim::Created(created) => {
            publish(
                &ctx,
                &claim,
                EventType::Normal,
                reasons::POPULATOR_PVC_CREATED,
                actions::PROVISION,
                format!(
                    "Populator started restoring {} from {}",
                    created.name_any(),
                    source
                ),
            )
            .await;
            created
        }
        ShadowClaim::Existing(existing) => existing,
        ShadowClaim::SourceMissing => {
            info!(source, "waiting for replication destination");
            return Ok(Action::await_change());
        }
        ShadowClaim::NoUsableImage => {
            info!(source, "waiting for replication destination to publish a snapshot");
            return Ok(Action::await_change());
        }
    };

    match try_rebind(ctx.kube.as_ref(), &claim, &identity, shadow_claim, source).await? {
        RebindStatus::Rebound => finish(&ctx, &claim, &identity).await,
        status => {
            debug!(?status, "waiting for volume hand-off");
            Ok(Action::await_change())
        }
    }
}

async fn check_storage_class(
    ctx: &PopulatorContext,
    claim: &PersistentVolumeClaim,
    identity: &ClaimIdentity,
) -> Result<StorageClassCheck, Error> {
    let Some(class_name) = storage_class_name(claim) else {
        return Ok(StorageClassCheck::Ready(None));
    };
    let Some(class) = ctx.kube.get_storage_class(class_name).await? else {
        info!(storage_class = %class_name, "waiting for storage class");
        return Ok(StorageClassCheck::Wait);
    };

    let migrated = claim.annotations().contains_key(MIGRATED_TO_ANNOTATION);
    if class.provisioner.starts_with(IN_TREE_PROVISIONER_PREFIX) && !migrated {
        warn!(
            storage_class = %class_name,
            provisioner = %class.provisioner,
            "in-tree volume plugins cannot restore from a snapshot"
        );
        publish(
            ctx,
            claim,
            EventType::Warning,
            reasons::STORAGE_CLASS_UNSUPPORTED,
            actions::PROVISION,
            format!(
                "Storage class {} uses in-tree provisioner {}, which the populator does not support",
                class_name, class.provisioner
            ),
        )
        .await;
        return Ok(StorageClassCheck::Wait);
    }

    if class.volume_binding_mode.as_deref() == Some(WAIT_FOR_FIRST_CONSUMER) {
        return Ok(match selected_node(claim) {
            Some(node) => StorageClassCheck::Ready(Some(node.to_string())),
            None => {
                debug!(claim = %identity.key(), "waiting for a consumer to be scheduled");
                StorageClassCheck::Wait
            }
        });
    }

    Ok(StorageClassCheck::Ready(None))
}

/// Tear down once the volume belongs to the target claim
async fn finish(
    ctx: &PopulatorContext,
    claim: &PersistentVolumeClaim,
    identity: &ClaimIdentity,
) -> Result<Action, Error> {
    let shadow_name = shadow_claim_name(&identity.uid);
    if let Some(shadow) = ctx.kube.get_claim(&identity.namespace, &shadow_name).await? {
        if !is_lost(&shadow) {
            debug!(shadow = %shadow_name, "waiting for the binder to release the shadow claim");
            return Ok(Action::await_change());
        }
    }

    let report = gc::cleanup(
        ctx.kube.as_ref(),
        &CleanupOwner::from(identity),
        &[CleanupKind::Claims],
    )
    .await?;
    let released = release_snapshots_in_use(ctx.kube.as_ref(), identity).await?;

    if report.claims_deleted > 0 {
        info!(released, "population finished");
        publish(
            ctx,
            claim,
            EventType::Normal,
            reasons::POPULATOR_FINISHED,
            actions::POPULATE,
            "Populator finished".to_string(),
        )
        .await;
    }
    Ok(Action::await_change())
}

async fn publish(
    ctx: &PopulatorContext,
    claim: &PersistentVolumeClaim,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&claim.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Error policy for the populator controller
///
/// Conflicts are retried quickly; they mean another writer got there first
/// and the next run sees the new state. Errors that a retry cannot fix wait
/// for the claim to change.
pub fn error_policy(
    claim: Arc<PersistentVolumeClaim>,
    error: &Error,
    _ctx: Arc<PopulatorContext>,
) -> Action {
    error!(
        ?error,
        claim = %claim.name_any(),
        namespace = ?claim.namespace(),
        "reconciliation failed"
    );
    if error.is_conflict() {
        Action::requeue(CONFLICT_REQUEUE)
    } else if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::await_change()
    }
}
