use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use model::ResourceName;
use nutype::nutype;

#[nutype(derive(Debug, Clone, Copy, PartialEq), validate(greater_or_equal = 1))]
pub struct SamplingInterval(u64);

#[nutype(derive(Debug, Clone, Copy, PartialEq), validate(greater_or_equal = 1))]
pub struct NodeConcurrency(usize);

/// Export the resource requests, limits and occupancy of every node of the
/// cluster as Prometheus gauges.
#[derive(Parser, Debug)]
#[command(name = "node_resource_exporter", version, about)]
pub struct Cli {
    /// Port the /metrics endpoint listens on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Resource names to track (comma-separated), e.g. "cpu,memory"
    #[arg(short, long, env = "RESOURCES", value_delimiter = ',')]
    pub resources: Vec<String>,

    /// Node label keys to attach to every series (comma-separated)
    #[arg(short = 'l', long, env = "NODE_LABELS", value_delimiter = ',')]
    pub node_labels: Vec<String>,

    /// Seconds between two sampling passes
    #[arg(long, env = "SAMPLING_INTERVAL", default_value_t = 10)]
    pub interval: u64,

    /// Seconds given to the components to stop once shutdown starts
    #[arg(long, env = "GRACE_PERIOD", default_value_t = 300)]
    pub grace_period: u64,

    /// Nodes whose pods are listed at the same time during a pass
    #[arg(long, env = "NODE_CONCURRENCY", default_value_t = 1)]
    pub node_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr:      SocketAddr,
    pub resources:        Vec<ResourceName>,
    pub node_labels:      Vec<String>,
    pub interval:         SamplingInterval,
    pub grace_period:     Duration,
    pub node_concurrency: NodeConcurrency,
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.into_inner())
    }
}

/// Trim the entries of a list, dropping blanks and repeated entries while
/// keeping the first-seen order.
pub fn distinct(raw: &[String]) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in raw.iter().map(|item| item.trim()).filter(|item| !item.is_empty())
    {
        if !items.iter().any(|seen| seen == item) {
            items.push(item.to_string());
        }
    }
    items
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let resources = distinct(&cli.resources)
            .iter()
            .map(|name| name.parse::<ResourceName>())
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to parse the resource names")?;

        let interval = SamplingInterval::new(cli.interval)
            .map_err(|err| anyhow!("Invalid sampling interval: {:?}", err))?;
        let node_concurrency = NodeConcurrency::new(cli.node_concurrency)
            .map_err(|err| anyhow!("Invalid node concurrency: {:?}", err))?;

        Ok(Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port)),
            resources,
            node_labels: distinct(&cli.node_labels),
            interval,
            grace_period: Duration::from_secs(cli.grace_period),
            node_concurrency,
        })
    }
}
