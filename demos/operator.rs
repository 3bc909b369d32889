//! Cluster operator backed by in-memory clouds
//!
//! Provisioning progresses as it would against real clouds, one state per pass, but
//! nothing is created outside the management cluster. With `--bootstrap log` the
//! bootstrap step only logs, since simulated clusters have no API server to talk to.
use async_trait::async_trait;
use futures::FutureExt;
use kluster::{
    provider::SimulatedClouds,
    runtime::{
        bootstrap::{self, BootCluster, Bootstrap, Bootstrapper, ClusterAccess},
        controller, Context, OperatorConfig,
    },
    Cluster,
};
use kube::{Client, ResourceExt};
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BootstrapMode {
    /// Log instead of connecting
    Log,
    /// Connect and apply the system manifests
    Manifests,
}

#[derive(clap::Parser)]
struct App {
    /// Clusters reconciled in parallel
    #[arg(long, env = "KLUSTER_CONCURRENCY", default_value_t = 8)]
    concurrency: u16,
    /// Finalizer marker put on every `Cluster`
    #[arg(long, env = "KLUSTER_FINALIZER", default_value = "kluster.dev/cleanup")]
    finalizer: String,
    /// Field manager for status patches and server-side apply
    #[arg(long, env = "KLUSTER_FIELD_MANAGER", default_value = "kluster")]
    field_manager: String,
    /// Seconds between passes over converged clusters
    #[arg(long, env = "KLUSTER_RESYNC_SECS", default_value_t = 300)]
    resync_secs: u64,
    /// Seconds to wait on a blocked dependency
    #[arg(long, env = "KLUSTER_DEPENDENCY_REQUEUE_SECS", default_value_t = 10)]
    dependency_requeue_secs: u64,
    #[arg(long, value_enum, default_value_t = BootstrapMode::Log)]
    bootstrap: BootstrapMode,
}

struct LogBootstrap {
    boot: BootCluster,
    owner: Cluster,
}

#[async_trait]
impl Bootstrap for LogBootstrap {
    async fn run(&self, _management: Client) -> kluster::Result<()> {
        info!(provider = %self.owner.spec.provider, "cluster is up, skipping bootstrap");
        Ok(())
    }

    fn cluster(&self) -> &BootCluster {
        &self.boot
    }

    fn cluster_obj(&self) -> &Cluster {
        &self.owner
    }
}

/// Bootstrapper that records the endpoint against the management client
fn log_only(management: Client) -> Bootstrapper {
    Arc::new(move |owner: Cluster, access: ClusterAccess| {
        let boot = BootCluster {
            endpoint: access.endpoint,
            name: owner.name_any(),
            namespace: owner.namespace().unwrap_or_default(),
            client: management.clone(),
        };
        async move { Ok(Box::new(LogBootstrap { boot, owner }) as Box<dyn Bootstrap>) }.boxed()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let app: App = clap::Parser::parse();
    let client = Client::try_default().await?;

    let config = OperatorConfig::default()
        .concurrency(app.concurrency)
        .finalizer(app.finalizer)
        .field_manager(app.field_manager)
        .resync(Duration::from_secs(app.resync_secs))
        .dependency_requeue(Duration::from_secs(app.dependency_requeue_secs));
    let bootstrapper = match app.bootstrap {
        BootstrapMode::Log => log_only(client.clone()),
        BootstrapMode::Manifests => bootstrap::manifests(&config.field_manager),
    };
    let registry = SimulatedClouds::new().registry(bootstrapper)?;
    info!(providers = ?registry.types(), "starting operator");

    let ctx = Arc::new(Context::new(client, registry, config));
    controller::run(ctx).await?;
    Ok(())
}
