use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::ResourceName;

/// Cumulative avg of the occupancy fractions observed for one resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreState {
    running_sum:       f64,
    observation_count: u64,
}

impl ScoreState {
    fn first(occupancy_fraction: f64) -> Self {
        Self { running_sum: occupancy_fraction, observation_count: 1 }
    }

    fn update(&mut self, occupancy_fraction: f64) {
        self.running_sum += occupancy_fraction;
        self.observation_count += 1;
    }

    /// Mean over every observation so far, as a percentage.
    pub fn score(&self) -> f64 {
        100.0 * self.running_sum / self.observation_count as f64
    }

    pub fn observation_count(&self) -> u64 { self.observation_count }
}

/// Long-run occupancy score per resource name, for the whole process
/// lifetime. One observation per (resource, node, pass): the mean mixes
/// every node of the fleet, it is not a per-node score.
///
/// Each update holds the map entry for the read-modify-write, nodes may be
/// processed concurrently.
#[derive(Debug, Default)]
pub struct ScoreTracker {
    states: DashMap<ResourceName, ScoreState>,
}

impl ScoreTracker {
    pub fn new() -> Self { Self::default() }

    /// Record `occupancy_fraction` (raw ratio, not a percentage) for
    /// `resource` and return the updated score.
    pub fn score(
        &self,
        resource: &ResourceName,
        occupancy_fraction: f64,
    ) -> f64 {
        match self.states.entry(resource.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().update(occupancy_fraction);
                entry.get().score()
            }
            Entry::Vacant(entry) => {
                let state = ScoreState::first(occupancy_fraction);
                entry.insert(state);
                state.score()
            }
        }
    }

    pub fn get(&self, resource: &str) -> Option<ScoreState> {
        self.states.get(resource).map(|state| *state)
    }
}
