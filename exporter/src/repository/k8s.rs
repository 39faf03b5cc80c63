use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use helper::quantity::parse_quantity;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ListParams;
use kube::{Api, Client};
use model::dto::k8s::{
    ContainerResources, NodeSnapshot, PodPhase, ResourceList, Workload,
};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to list the nodes: {0}")]
    ListNodes(#[source] kube::Error),
    #[error("Failed to get pods for node {0}: {1}")]
    ListPods(String, #[source] kube::Error),
}

/// Read side of the cluster the sampling loop needs.
#[async_trait]
pub trait ClusterState: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, Error>;

    /// Every pod scheduled on `node`, whatever its phase.
    async fn list_workloads(&self, node: &str) -> Result<Vec<Workload>, Error>;
}

pub struct K8s {
    client: Client,
}

impl K8s {
    /// Infer the configuration in-cluster first, then from the local
    /// kubeconfig.
    pub async fn new() -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create the K8S client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClusterState for K8s {
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, Error> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let nodes = nodes
            .list(&ListParams::default())
            .await
            .map_err(Error::ListNodes)?;

        Ok(nodes.into_iter().filter_map(node_snapshot).collect())
    }

    async fn list_workloads(&self, node: &str) -> Result<Vec<Workload>, Error> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params =
            ListParams::default().fields(&format!("spec.nodeName={node}"));
        let pods = pods
            .list(&params)
            .await
            .map_err(|err| Error::ListPods(node.to_string(), err))?;

        Ok(pods.into_iter().map(workload).collect())
    }
}

/// Quantities that cannot be parsed are dropped, the resource is then
/// treated as absent.
fn resource_list(
    quantities: Option<&BTreeMap<String, Quantity>>,
) -> ResourceList {
    quantities
        .into_iter()
        .flatten()
        .filter_map(|(name, quantity)| match parse_quantity(&quantity.0) {
            Ok(value) => Some((name.clone(), value)),
            Err(err) => {
                warn!("Ignoring resource {}: {}", name, err);
                None
            }
        })
        .collect()
}

fn node_snapshot(node: Node) -> Option<NodeSnapshot> {
    let Some(name) = node.metadata.name else {
        warn!("Skipping a node without 'metadata:name'");
        return None;
    };

    Some(NodeSnapshot {
        allocatable: resource_list(
            node.status.as_ref().and_then(|status| status.allocatable.as_ref()),
        ),
        labels: node.metadata.labels.unwrap_or_default(),
        name,
    })
}

fn workload(pod: Pod) -> Workload {
    let phase = PodPhase::from(
        pod.status.as_ref().and_then(|status| status.phase.as_deref()),
    );
    let containers = pod
        .spec
        .map(|spec| {
            spec.containers
                .iter()
                .map(|container| {
                    let resources = container.resources.as_ref();
                    ContainerResources {
                        requests: resource_list(
                            resources.and_then(|r| r.requests.as_ref()),
                        ),
                        limits:   resource_list(
                            resources.and_then(|r| r.limits.as_ref()),
                        ),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Workload {
        name: pod.metadata.name.unwrap_or_default(),
        phase,
        containers,
    }
}
