//! CRD installation using server-side apply

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use volsync_common::crd::ReplicationDestination;
use volsync_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn volsync_crds() -> Vec<CrdDef> {
    vec![CrdDef {
        name: "replicationdestinations.volsync.backube",
        crd: ReplicationDestination::crd_preserving_unknown_fields(),
    }]
}

/// Install or update the CRDs owned by VolSync
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in volsync_crds() {
        tracing::info!(crd = def.name, "installing CRD");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    Ok(())
}
