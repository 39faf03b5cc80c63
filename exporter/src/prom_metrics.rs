use model::ResourceName;
use prometheus::{GaugeVec, Opts, Registry};

macro_rules! PREFIX {
    () => {
        "node_resource_"
    };
}

/// Gauges published by the sampling loop. Node dimensions come first, then
/// the configured node labels, in their configured order.
#[derive(Debug, Clone)]
pub struct ResourceMetrics {
    /// ["node", "resource", ...node labels]
    requests:  GaugeVec,
    /// ["node", "resource", ...node labels]
    limits:    GaugeVec,
    /// ["node", "resource", ...node labels]
    occupancy: GaugeVec,
    /// ["resource", ...node labels]
    score:     GaugeVec,
}

/// Turn a Kubernetes label key (`topology.kubernetes.io/zone`) into a valid
/// Prometheus label name (`topology_kubernetes_io_zone`).
pub fn sanitize_label_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Prometheus label names for the configured node label keys, in order.
/// Two keys mapping to the same name, or to a name taken by the node or
/// resource dimension, are rejected.
fn node_label_names(keys: &[String]) -> prometheus::Result<Vec<String>> {
    let mut names: Vec<String> = Vec::with_capacity(keys.len());
    for (ii, key) in keys.iter().enumerate() {
        let name = sanitize_label_name(key);
        if name == "node" || name == "resource" {
            return Err(prometheus::Error::Msg(format!(
                "Node label '{key}' clashes with the '{name}' label"
            )));
        }
        if let Some(seen) = names.iter().position(|seen| *seen == name) {
            return Err(prometheus::Error::Msg(format!(
                "Node labels '{}' and '{}' both map to the label '{}'",
                keys[seen], keys[ii], name
            )));
        }
        names.push(name);
    }
    Ok(names)
}

fn register_gauge_vec(
    registry: &Registry,
    opts: Opts,
    labels: &[String],
) -> prometheus::Result<GaugeVec> {
    let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    let gauge = GaugeVec::new(opts, &labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl ResourceMetrics {
    pub fn new(
        registry: &Registry,
        node_label_keys: &[String],
    ) -> prometheus::Result<Self> {
        let node_labels = node_label_names(node_label_keys)?;

        let score_labels: Vec<String> = std::iter::once("resource".to_string())
            .chain(node_labels.iter().cloned())
            .collect();
        let labels: Vec<String> = std::iter::once("node".to_string())
            .chain(score_labels.iter().cloned())
            .collect();

        Ok(Self {
            requests:  register_gauge_vec(
                registry,
                Opts::new(
                    concat!(PREFIX!(), "requests"),
                    "Gauge of node resource requests.",
                ),
                &labels,
            )?,
            limits:    register_gauge_vec(
                registry,
                Opts::new(
                    concat!(PREFIX!(), "limits"),
                    "Gauge of node resource limits.",
                ),
                &labels,
            )?,
            occupancy: register_gauge_vec(
                registry,
                Opts::new(
                    concat!(PREFIX!(), "occupancy"),
                    "Occupancy percentage of node resource.",
                ),
                &labels,
            )?,
            score:     register_gauge_vec(
                registry,
                Opts::new(
                    concat!(PREFIX!(), "score"),
                    "Mean occupancy percentage of the resource since the \
                     exporter started, across every node.",
                ),
                &score_labels,
            )?,
        })
    }

    pub fn set_requests(
        &self,
        node: &str,
        resource: &ResourceName,
        label_values: &[String],
        value: f64,
    ) {
        self.requests
            .with_label_values(&node_labels(node, resource, label_values))
            .set(value);
    }

    pub fn set_limits(
        &self,
        node: &str,
        resource: &ResourceName,
        label_values: &[String],
        value: f64,
    ) {
        self.limits
            .with_label_values(&node_labels(node, resource, label_values))
            .set(value);
    }

    pub fn set_occupancy(
        &self,
        node: &str,
        resource: &ResourceName,
        label_values: &[String],
        value: f64,
    ) {
        self.occupancy
            .with_label_values(&node_labels(node, resource, label_values))
            .set(value);
    }

    pub fn set_score(
        &self,
        resource: &ResourceName,
        label_values: &[String],
        value: f64,
    ) {
        let labels: Vec<&str> = std::iter::once(resource.as_str())
            .chain(label_values.iter().map(String::as_str))
            .collect();
        self.score.with_label_values(&labels).set(value);
    }
}

fn node_labels<'a>(
    node: &'a str,
    resource: &'a ResourceName,
    label_values: &'a [String],
) -> Vec<&'a str> {
    [node, resource.as_str()]
        .into_iter()
        .chain(label_values.iter().map(String::as_str))
        .collect()
}
