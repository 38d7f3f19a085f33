//! VolSync operator - provisions claims from ReplicationDestination snapshots

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};

use volsync_common::crd::ReplicationDestination;
use volsync_common::kube_utils::create_client;
use volsync_common::telemetry::{init_telemetry, TelemetryConfig};
use volsync_operator::controller_runner::{build_populator_controller, DEFAULT_CONCURRENCY};
use volsync_operator::startup::{ensure_crds, ensure_volume_populator_registered};
use volsync_populator::PopulatorContext;

/// VolSync - asynchronous volume replication for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "volsync", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Path to a kubeconfig; in-cluster or default config when unset
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Maximum number of claims reconciled concurrently
    #[arg(long, env = "VOLSYNC_POPULATOR_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY, global = true)]
    concurrency: u16,

    /// Do not register ReplicationDestination as a VolumePopulator source
    #[arg(long, global = true)]
    skip_populator_registration: bool,

    /// Do not install or update the VolSync CRDs
    #[arg(long, global = true)]
    skip_crd_install: bool,

    /// Emit JSON logs (set to false for human-readable output)
    #[arg(long, env = "VOLSYNC_LOG_JSON", default_value_t = true, action = ArgAction::Set, global = true)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ReplicationDestination::crd_preserving_unknown_fields())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: cli.controller.log_json,
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = create_client(args.kubeconfig.as_deref()).await?;

    if !args.skip_crd_install {
        ensure_crds(&client).await?;
    }
    if !args.skip_populator_registration {
        ensure_volume_populator_registered(&client).await;
    }

    let ctx = Arc::new(PopulatorContext::new(client.clone()));
    tracing::info!(concurrency = args.concurrency, "starting populator controller");
    build_populator_controller(client, ctx, args.concurrency).await;

    tracing::info!("VolSync controller shutting down");
    Ok(())
}
