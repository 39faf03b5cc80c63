#[macro_use]
extern crate tracing;

use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use helper::init::init_subscriber;
#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;
use prometheus::Registry;

use crate::config::{Cli, Config};
use crate::lifecycle::{termination_signal, wait_for_signal, Group};
use crate::prom_metrics::ResourceMetrics;
use crate::repository::k8s::{ClusterState, K8s};
use crate::server::MetricsServer;
use crate::service::sampling::Sampler;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod config;
mod handler;
mod lifecycle;
mod prom_metrics;
mod repository;
mod server;
mod service;

/// Wire the three actors: the signal listener, the `/metrics` server and
/// the sampling loop. The listener is bound before returning.
fn build_group<F>(
    config: &Config,
    cluster: Arc<dyn ClusterState>,
    termination: F,
) -> anyhow::Result<Group>
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let registry = Registry::new();
    let metrics = Arc::new(
        ResourceMetrics::new(&registry, &config.node_labels)
            .context("Failed to register the resource gauges")?,
    );
    let sampler = Arc::new(Sampler::new(
        cluster,
        metrics,
        config.resources.clone().into(),
        config.node_labels.clone().into(),
        config.node_concurrency,
    ));
    let server =
        MetricsServer::bind(config.listen_addr, registry, config.grace_period)?;
    let period = config.interval();

    let mut group = Group::new(config.grace_period);
    group.add("signal", move |shutdown| wait_for_signal(termination, shutdown));
    group.add("metrics server", move |shutdown| server.serve(shutdown));
    group.add("sampling loop", move |shutdown| async move {
        sampler.run(period, shutdown).await
    });
    Ok(group)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::try_from(cli)?;
    if config.resources.is_empty() {
        warn!("No resource to track, the gauges will stay empty");
    }
    info!(
        "Tracking resources {:?} with node labels {:?}, every {:?}",
        config.resources,
        config.node_labels,
        config.interval()
    );

    let cluster = Arc::new(K8s::new().await?);
    let group = build_group(&config, cluster, termination_signal())?;
    group.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard =
        match init_subscriber("node_resource_exporter.log", "info") {
            Ok(guard) => guard,
            Err(err) => {
                eprintln!("{:?}", err);
                return ExitCode::FAILURE;
            }
        };

    debug!("Tracing initialized.");

    match run(cli).await {
        Ok(()) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:?}", err);
            ExitCode::FAILURE
        }
    }
}
