use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use model::domain::aggregation::ResourceTotals;
use model::domain::occupancy::{occupancy, occupancy_fraction};
use model::domain::score::ScoreTracker;
use model::dto::k8s::{NodeSnapshot, Workload};
use model::ResourceName;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::NodeConcurrency;
use crate::lifecycle::Shutdown;
use crate::prom_metrics::ResourceMetrics;
use crate::repository::k8s::{ClusterState, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    pub nodes_sampled: usize,
    pub nodes_failed:  usize,
}

/// Drives the sampling passes: one pass lists every node, sums the
/// requests and limits of its running pods and publishes them along with
/// the occupancy and the long-run score of each tracked resource.
pub struct Sampler {
    cluster:          Arc<dyn ClusterState>,
    metrics:          Arc<ResourceMetrics>,
    scores:           ScoreTracker,
    resources:        Arc<[ResourceName]>,
    node_labels:      Arc<[String]>,
    node_concurrency: NodeConcurrency,
}

impl Sampler {
    pub fn new(
        cluster: Arc<dyn ClusterState>,
        metrics: Arc<ResourceMetrics>,
        resources: Arc<[ResourceName]>,
        node_labels: Arc<[String]>,
        node_concurrency: NodeConcurrency,
    ) -> Self {
        Self {
            cluster,
            metrics,
            scores: ScoreTracker::new(),
            resources,
            node_labels,
            node_concurrency,
        }
    }

    pub fn scores(&self) -> &ScoreTracker { &self.scores }

    /// Tick every `period` until `shutdown` fires. A pass still running when
    /// it fires is abandoned.
    pub async fn run(
        &self,
        period: Duration,
        mut shutdown: Shutdown,
    ) -> anyhow::Result<()> {
        info!("Starting sampling loop");
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            tokio::select! {
                _ = self.sample() => {}
                _ = shutdown.cancelled() => {
                    warn!("Abandoning the sampling pass in progress");
                    break;
                }
            }
        }

        info!("Exited sampling loop");
        Ok(())
    }

    async fn sample(&self) {
        match self.run_pass().await {
            Ok(summary) => debug!(
                "Sampling pass done: {} nodes sampled, {} failed",
                summary.nodes_sampled, summary.nodes_failed
            ),
            Err(err) => error!("{}", err),
        }
    }

    /// One pass over the cluster. Only failing to list the nodes fails the
    /// pass; a node whose pods cannot be listed is skipped.
    pub async fn run_pass(&self) -> Result<PassSummary, Error> {
        let nodes = self.cluster.list_nodes().await?;

        let outcomes: Vec<bool> = stream::iter(nodes.iter())
            .map(|node| async move {
                match self.sample_node(node).await {
                    Ok(()) => true,
                    Err(err) => {
                        error!("{}", err);
                        false
                    }
                }
            })
            .boxed()
            .buffer_unordered(self.node_concurrency.into_inner())
            .collect()
            .await;

        let nodes_sampled = outcomes.iter().filter(|ok| **ok).count();
        Ok(PassSummary {
            nodes_sampled,
            nodes_failed: outcomes.len() - nodes_sampled,
        })
    }

    #[instrument(level = "trace", skip_all, fields(node = %node.name))]
    async fn sample_node(&self, node: &NodeSnapshot) -> Result<(), Error> {
        let label_values = node.label_values(&self.node_labels);
        let workloads = self.cluster.list_workloads(&node.name).await?;

        let (running, idle): (Vec<&Workload>, Vec<&Workload>) =
            workloads.iter().partition(|workload| workload.is_running());
        for workload in idle {
            trace!(
                "Not counting pod {} on node {}: {}",
                workload.name,
                node.name,
                workload.phase
            );
        }

        let requests = ResourceTotals::aggregate(
            running.iter().copied().flat_map(Workload::requests),
        );
        let limits = ResourceTotals::aggregate(
            running.iter().copied().flat_map(Workload::limits),
        );

        info!("Total requests on node {}: {}", node.name, requests);
        info!("Total limits on node {}: {}", node.name, limits);

        self.publish(node, &label_values, &requests, &limits);
        Ok(())
    }

    fn publish(
        &self,
        node: &NodeSnapshot,
        label_values: &[String],
        requests: &ResourceTotals,
        limits: &ResourceTotals,
    ) {
        for resource in self.resources.iter() {
            let requested = requests.get_or_zero(resource);
            self.metrics.set_requests(
                &node.name,
                resource,
                label_values,
                requested,
            );
            self.metrics.set_limits(
                &node.name,
                resource,
                label_values,
                limits.get_or_zero(resource),
            );

            let Some(&allocatable) = node.allocatable.get(resource.as_str())
            else {
                continue;
            };
            let (Some(percent), Some(fraction)) = (
                occupancy(requested, allocatable),
                occupancy_fraction(requested, allocatable),
            ) else {
                continue;
            };

            debug!("{} occupancy on node {}: {}", resource, node.name, fraction);
            self.metrics.set_occupancy(
                &node.name,
                resource,
                label_values,
                percent,
            );
            let score = self.scores.score(resource, fraction);
            self.metrics.set_score(resource, label_values, score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown_channel;
    use async_trait::async_trait;
    use model::dto::k8s::{ContainerResources, PodPhase, ResourceList};
    use prometheus::Registry;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Schedule = (Vec<NodeSnapshot>, HashMap<String, Vec<Workload>>);

    #[derive(Default)]
    struct FakeCluster {
        nodes:              Vec<NodeSnapshot>,
        workloads:          HashMap<String, Vec<Workload>>,
        failing_nodes:      HashSet<String>,
        node_list_failures: AtomicUsize,
        node_list_calls:    AtomicUsize,
        /// Replaces `nodes` and `workloads` once set
        rescheduled:        Mutex<Option<Schedule>>,
    }

    impl FakeCluster {
        fn reschedule(
            &self,
            nodes: Vec<NodeSnapshot>,
            workloads: HashMap<String, Vec<Workload>>,
        ) {
            *self.rescheduled.lock().expect("fake cluster lock") =
                Some((nodes, workloads));
        }
    }

    fn api_error() -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status:  "Failure".to_string(),
            message: "etcdserver: request timed out".to_string(),
            reason:  "InternalError".to_string(),
            code:    500,
        })
    }

    #[async_trait]
    impl ClusterState for FakeCluster {
        async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, Error> {
            self.node_list_calls.fetch_add(1, Ordering::SeqCst);
            let failures_left = self.node_list_failures.load(Ordering::SeqCst);
            if failures_left > 0 {
                self.node_list_failures
                    .store(failures_left - 1, Ordering::SeqCst);
                return Err(Error::ListNodes(api_error()));
            }
            let rescheduled = self.rescheduled.lock().expect("fake cluster lock");
            Ok(match rescheduled.as_ref() {
                Some((nodes, _)) => nodes.clone(),
                None => self.nodes.clone(),
            })
        }

        async fn list_workloads(
            &self,
            node: &str,
        ) -> Result<Vec<Workload>, Error> {
            if self.failing_nodes.contains(node) {
                return Err(Error::ListPods(node.to_string(), api_error()));
            }
            let rescheduled = self.rescheduled.lock().expect("fake cluster lock");
            let workloads = match rescheduled.as_ref() {
                Some((_, workloads)) => workloads,
                None => &self.workloads,
            };
            Ok(workloads.get(node).cloned().unwrap_or_default())
        }
    }

    fn list(entries: &[(&str, f64)]) -> ResourceList {
        entries.iter().map(|(name, qty)| (name.to_string(), *qty)).collect()
    }

    fn node(name: &str, allocatable: &[(&str, f64)]) -> NodeSnapshot {
        NodeSnapshot {
            name: name.to_string(),
            labels: BTreeMap::new(),
            allocatable: list(allocatable),
        }
    }

    fn pod(
        phase: PodPhase,
        requests: &[(&str, f64)],
        limits: &[(&str, f64)],
    ) -> Workload {
        Workload {
            name: "pod".to_string(),
            phase,
            containers: vec![ContainerResources {
                requests: list(requests),
                limits:   list(limits),
            }],
        }
    }

    struct Fixture {
        cluster:  Arc<FakeCluster>,
        registry: Registry,
        sampler:  Sampler,
    }

    fn fixture(
        cluster: FakeCluster,
        resources: &[&str],
        node_labels: &[&str],
        concurrency: usize,
    ) -> anyhow::Result<Fixture> {
        let cluster = Arc::new(cluster);
        let registry = Registry::new();
        let node_labels: Vec<String> =
            node_labels.iter().map(|label| label.to_string()).collect();
        let metrics = Arc::new(ResourceMetrics::new(&registry, &node_labels)?);
        let resources = resources
            .iter()
            .map(|name| name.parse::<ResourceName>())
            .collect::<Result<Vec<_>, _>>()?;
        let concurrency = NodeConcurrency::new(concurrency)
            .map_err(|err| anyhow::anyhow!("{:?}", err))?;

        let sampler = Sampler::new(
            cluster.clone(),
            metrics,
            resources.into(),
            node_labels.into(),
            concurrency,
        );
        Ok(Fixture { cluster, registry, sampler })
    }

    /// Value of the gauge `name` carrying exactly `labels`, if it was ever
    /// set.
    fn gauge(registry: &Registry, name: &str, labels: &[&str]) -> Option<f64> {
        registry
            .gather()
            .into_iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().to_vec())
            .find(|metric| {
                let mut values: Vec<&str> = metric
                    .get_label()
                    .iter()
                    .map(|pair| pair.get_value())
                    .collect();
                let mut expected = labels.to_vec();
                values.sort();
                expected.sort();
                values == expected
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    fn single_node_cluster() -> FakeCluster {
        FakeCluster {
            nodes: vec![node("n1", &[("cpu", 4.0)])],
            workloads: HashMap::from([(
                "n1".to_string(),
                vec![pod(PodPhase::Running, &[("cpu", 1.0)], &[("cpu", 2.0)])],
            )]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_node_two_passes() -> anyhow::Result<()> {
        let f = fixture(single_node_cluster(), &["cpu"], &[], 1)?;

        let summary = f.sampler.run_pass().await?;
        assert_eq!(summary, PassSummary { nodes_sampled: 1, nodes_failed: 0 });
        let r = &f.registry;
        assert_eq!(gauge(r, "node_resource_requests", &["n1", "cpu"]), Some(1.0));
        assert_eq!(gauge(r, "node_resource_limits", &["n1", "cpu"]), Some(2.0));
        assert_eq!(
            gauge(r, "node_resource_occupancy", &["n1", "cpu"]),
            Some(25.0)
        );
        assert_eq!(gauge(r, "node_resource_score", &["cpu"]), Some(25.0));

        f.sampler.run_pass().await?;
        assert_eq!(
            gauge(r, "node_resource_occupancy", &["n1", "cpu"]),
            Some(25.0)
        );
        assert_eq!(gauge(r, "node_resource_score", &["cpu"]), Some(25.0));
        assert_eq!(
            f.sampler.scores().get("cpu").map(|s| s.observation_count()),
            Some(2)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_only_running_pods_count() -> anyhow::Result<()> {
        let cluster = FakeCluster {
            nodes: vec![node("n1", &[("cpu", 8.0)])],
            workloads: HashMap::from([("n1".to_string(), vec![
                pod(PodPhase::Running, &[("cpu", 1.0)], &[]),
                pod(PodPhase::Running, &[("cpu", 1.0)], &[("cpu", 3.0)]),
                pod(PodPhase::Pending, &[("cpu", 4.0)], &[("cpu", 4.0)]),
                pod(PodPhase::Succeeded, &[("cpu", 4.0)], &[]),
            ])]),
            ..Default::default()
        };
        let f = fixture(cluster, &["cpu"], &[], 1)?;

        f.sampler.run_pass().await?;

        let r = &f.registry;
        assert_eq!(gauge(r, "node_resource_requests", &["n1", "cpu"]), Some(2.0));
        assert_eq!(gauge(r, "node_resource_limits", &["n1", "cpu"]), Some(3.0));
        assert_eq!(
            gauge(r, "node_resource_occupancy", &["n1", "cpu"]),
            Some(25.0)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_data_is_not_an_error() -> anyhow::Result<()> {
        let cluster = FakeCluster {
            nodes: vec![node("n1", &[("cpu", 4.0), ("nvidia.com/gpu", 0.0)])],
            workloads: HashMap::from([(
                "n1".to_string(),
                vec![pod(PodPhase::Running, &[("cpu", 1.0)], &[])],
            )]),
            ..Default::default()
        };
        let f = fixture(cluster, &["cpu", "memory", "nvidia.com/gpu"], &[], 1)?;

        let summary = f.sampler.run_pass().await?;

        assert_eq!(summary.nodes_failed, 0);
        let r = &f.registry;
        // absent from totals: published as zero
        assert_eq!(
            gauge(r, "node_resource_requests", &["n1", "memory"]),
            Some(0.0)
        );
        assert_eq!(gauge(r, "node_resource_limits", &["n1", "cpu"]), Some(0.0));
        // no allocatable, or none to speak of: no occupancy nor score
        assert_eq!(gauge(r, "node_resource_occupancy", &["n1", "memory"]), None);
        assert_eq!(gauge(r, "node_resource_score", &["memory"]), None);
        assert_eq!(
            gauge(r, "node_resource_occupancy", &["n1", "nvidia.com/gpu"]),
            None
        );
        assert_eq!(gauge(r, "node_resource_score", &["nvidia.com/gpu"]), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_undefined_occupancy_keeps_last_values() -> anyhow::Result<()> {
        for allocatable in [vec![], vec![("cpu", 0.0)]] {
            let f = fixture(single_node_cluster(), &["cpu"], &[], 1)?;
            let r = &f.registry;

            f.sampler.run_pass().await?;
            assert_eq!(
                gauge(r, "node_resource_occupancy", &["n1", "cpu"]),
                Some(25.0)
            );
            assert_eq!(gauge(r, "node_resource_score", &["cpu"]), Some(25.0));

            f.cluster.reschedule(
                vec![node("n1", &allocatable)],
                HashMap::from([(
                    "n1".to_string(),
                    vec![pod(PodPhase::Running, &[("cpu", 3.0)], &[])],
                )]),
            );
            f.sampler.run_pass().await?;

            assert_eq!(
                gauge(r, "node_resource_requests", &["n1", "cpu"]),
                Some(3.0)
            );
            assert_eq!(
                gauge(r, "node_resource_occupancy", &["n1", "cpu"]),
                Some(25.0)
            );
            assert_eq!(gauge(r, "node_resource_score", &["cpu"]), Some(25.0));
            assert_eq!(
                f.sampler.scores().get("cpu").map(|s| s.observation_count()),
                Some(1)
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_node_does_not_stop_the_pass() -> anyhow::Result<()> {
        let mut cluster = single_node_cluster();
        cluster.nodes.insert(0, node("broken", &[("cpu", 4.0)]));
        cluster.failing_nodes.insert("broken".to_string());
        let f = fixture(cluster, &["cpu"], &[], 1)?;

        let summary = f.sampler.run_pass().await?;

        assert_eq!(summary, PassSummary { nodes_sampled: 1, nodes_failed: 1 });
        let r = &f.registry;
        assert_eq!(gauge(r, "node_resource_requests", &["n1", "cpu"]), Some(1.0));
        assert_eq!(gauge(r, "node_resource_requests", &["broken", "cpu"]), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_node_listing_failure_fails_the_pass() -> anyhow::Result<()> {
        let cluster = single_node_cluster();
        cluster.node_list_failures.store(1, Ordering::SeqCst);
        let f = fixture(cluster, &["cpu"], &[], 1)?;

        assert!(matches!(f.sampler.run_pass().await, Err(Error::ListNodes(_))));
        assert_eq!(gauge(&f.registry, "node_resource_requests", &["n1", "cpu"]), None);

        f.sampler.run_pass().await?;
        assert_eq!(
            gauge(&f.registry, "node_resource_requests", &["n1", "cpu"]),
            Some(1.0)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_score_is_fleet_wide() -> anyhow::Result<()> {
        let cluster = FakeCluster {
            nodes: vec![
                NodeSnapshot {
                    labels: BTreeMap::from([(
                        "zone".to_string(),
                        "a".to_string(),
                    )]),
                    ..node("n1", &[("cpu", 4.0)])
                },
                NodeSnapshot {
                    labels: BTreeMap::from([(
                        "zone".to_string(),
                        "a".to_string(),
                    )]),
                    ..node("n2", &[("cpu", 4.0)])
                },
            ],
            workloads: HashMap::from([
                (
                    "n1".to_string(),
                    vec![pod(PodPhase::Running, &[("cpu", 1.0)], &[])],
                ),
                (
                    "n2".to_string(),
                    vec![pod(PodPhase::Running, &[("cpu", 3.0)], &[])],
                ),
            ]),
            ..Default::default()
        };
        let f = fixture(cluster, &["cpu"], &["zone"], 2)?;

        f.sampler.run_pass().await?;

        let r = &f.registry;
        assert_eq!(
            gauge(r, "node_resource_occupancy", &["n1", "cpu", "a"]),
            Some(25.0)
        );
        assert_eq!(
            gauge(r, "node_resource_occupancy", &["n2", "cpu", "a"]),
            Some(75.0)
        );
        assert_eq!(gauge(r, "node_resource_score", &["cpu", "a"]), Some(50.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_label_projects_to_empty() -> anyhow::Result<()> {
        let f = fixture(single_node_cluster(), &["cpu"], &["zone"], 1)?;

        f.sampler.run_pass().await?;

        assert_eq!(
            gauge(&f.registry, "node_resource_requests", &["n1", "cpu", ""]),
            Some(1.0)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_nodes() -> anyhow::Result<()> {
        let nodes: Vec<NodeSnapshot> = (0..16)
            .map(|ii| node(&format!("n{ii}"), &[("cpu", 4.0)]))
            .collect();
        let workloads = nodes
            .iter()
            .map(|node| {
                (
                    node.name.clone(),
                    vec![pod(PodPhase::Running, &[("cpu", 2.0)], &[])],
                )
            })
            .collect();
        let cluster = FakeCluster { nodes, workloads, ..Default::default() };
        let f = fixture(cluster, &["cpu"], &[], 4)?;

        let summary = f.sampler.run_pass().await?;

        assert_eq!(summary.nodes_sampled, 16);
        let state = f.sampler.scores().get("cpu").expect("cpu is scored");
        assert_eq!(state.observation_count(), 16);
        assert_eq!(gauge(&f.registry, "node_resource_score", &["cpu"]), Some(50.0));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_listing_failure() -> anyhow::Result<()> {
        let cluster = single_node_cluster();
        cluster.node_list_failures.store(1, Ordering::SeqCst);
        let f = Arc::new(fixture(cluster, &["cpu"], &[], 1)?);
        let (trigger, shutdown) = shutdown_channel();

        let looping = {
            let f = f.clone();
            tokio::spawn(async move {
                f.sampler.run(Duration::from_secs(10), shutdown).await
            })
        };

        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(f.cluster.node_list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            gauge(&f.registry, "node_resource_requests", &["n1", "cpu"]),
            Some(1.0)
        );

        trigger.trigger();
        looping.await??;
        Ok(())
    }
}
