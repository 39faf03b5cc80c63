use std::collections::BTreeMap;
use std::fmt;

/// Resource name to approximate quantity, as declared by one container or
/// reported by one node.
pub type ResourceList = BTreeMap<String, f64>;

/// A node as seen at the start of a sampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshot {
    pub name:        String,
    pub labels:      BTreeMap<String, String>,
    pub allocatable: ResourceList,
}

impl NodeSnapshot {
    /// Values of the configured label names, in the same order. A label the
    /// node does not carry projects to an empty string.
    pub fn label_values(&self, label_names: &[String]) -> Vec<String> {
        label_names
            .iter()
            .map(|name| self.labels.get(name).cloned().unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl From<Option<&str>> for PodPhase {
    fn from(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerResources {
    pub requests: ResourceList,
    pub limits:   ResourceList,
}

/// A pod scheduled on a node, reduced to what the aggregation needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workload {
    pub name:       String,
    pub phase:      PodPhase,
    pub containers: Vec<ContainerResources>,
}

impl Workload {
    pub fn is_running(&self) -> bool { self.phase == PodPhase::Running }

    pub fn requests(&self) -> impl Iterator<Item = &ResourceList> {
        self.containers.iter().map(|container| &container.requests)
    }

    pub fn limits(&self) -> impl Iterator<Item = &ResourceList> {
        self.containers.iter().map(|container| &container.limits)
    }
}
