use std::collections::HashMap;
use std::fmt;

use crate::dto::k8s::ResourceList;
use crate::ResourceName;

/// Per-resource sums over a set of containers. Built fresh for every node
/// on every pass, requests and limits each get their own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceTotals {
    totals: HashMap<String, f64>,
}

impl ResourceTotals {
    /// Sum every quantity of every spec into its resource's total. Names
    /// that no spec mentions stay absent.
    pub fn aggregate<'a, I>(specs: I) -> Self
    where
        I: IntoIterator<Item = &'a ResourceList>,
    {
        let mut totals: HashMap<String, f64> = HashMap::new();
        for spec in specs {
            for (name, quantity) in spec {
                *totals.entry(name.clone()).or_insert(0.0) += quantity;
            }
        }
        Self { totals }
    }

    pub fn get(&self, name: &ResourceName) -> Option<f64> {
        self.totals.get(name.as_str()).copied()
    }

    pub fn get_or_zero(&self, name: &ResourceName) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize { self.totals.len() }

    pub fn is_empty(&self) -> bool { self.totals.is_empty() }
}

impl fmt::Display for ResourceTotals {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut entries: Vec<_> = self.totals.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        write!(f, "{{")?;
        for (ii, (name, quantity)) in entries.into_iter().enumerate() {
            if ii > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {quantity}")?;
        }
        write!(f, "}}")
    }
}
