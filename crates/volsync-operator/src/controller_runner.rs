//! Controller runner - builds the populator controller future
//!
//! The controller is keyed on claims. Three more streams feed it:
//! owned shadow claims through owner references, and StorageClass and
//! ReplicationDestination changes through the [`ClaimIndex`] built from the
//! claim watch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};

use volsync_common::crd::ReplicationDestination;
use volsync_common::lifecycle::CREATED_BY_SELECTOR;
use volsync_populator::{error_policy, reconcile, ClaimIndex, PopulatorContext};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Default bound on concurrent reconciles
pub const DEFAULT_CONCURRENCY: u16 = 4;

/// Build the populator controller future
pub fn build_populator_controller(
    client: Client,
    ctx: Arc<PopulatorContext>,
    concurrency: u16,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let watcher_config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let index = Arc::new(ClaimIndex::new());

    let claims: Api<PersistentVolumeClaim> = Api::all(client.clone());
    let (reader, writer) = reflector::store();
    let observer = index.clone();
    let claim_stream = watcher(claims.clone(), watcher_config.clone())
        .default_backoff()
        .reflect(writer)
        .inspect_ok(move |event| observer.observe(event))
        .applied_objects();

    let shadow_stream = watcher(claims, watcher_config.clone().labels(CREATED_BY_SELECTOR))
        .default_backoff()
        .applied_objects();

    let classes: Api<StorageClass> = Api::all(client.clone());
    let class_stream = watcher(classes, watcher_config.clone())
        .default_backoff()
        .applied_objects();
    let class_index = index.clone();

    let destinations: Api<ReplicationDestination> = Api::all(client);
    let destination_stream = watcher(destinations, watcher_config)
        .default_backoff()
        .applied_objects();
    let destination_index = index;

    let controller = Controller::for_stream(claim_stream, reader)
        .owns_stream(shadow_stream)
        .watches_stream(class_stream, move |class: StorageClass| {
            class_index.map_storage_class(&class)
        })
        .watches_stream(destination_stream, move |rd: ReplicationDestination| {
            destination_index.map_replication_destination(&rd)
        })
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Populator"));

    Box::pin(controller)
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
