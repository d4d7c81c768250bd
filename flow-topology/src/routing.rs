//! Pluggable routing collaborators
//!
//! The topology consumes two numeric black boxes: a per-edge routing cost and
//! a bandwidth-reliability score. The reconciler consumes a path oracle. All
//! three are traits so alternative algorithms can be dropped in; the default
//! implementations here are enough to run the simulator end to end.

use crate::topology::{Link, Topology};

/// Per-edge routing cost, evaluated over the operational adjacency.
pub trait RoutingCostProvider: Send + Sync {
    fn cost(&self, link: &Link) -> f64;
}

/// Maps a link's bandwidth usage ratio to a reliability score in [0, 1].
pub trait ReliabilityScorer: Send + Sync {
    fn score(&self, usage_ratio: f64) -> f64;
}

/// External path finder: returns the node sequence from `src` to `dst`, or
/// `None` when no operational path exists.
pub trait PathOracle: Send + Sync {
    fn find_path(&self, topology: &Topology, src: &str, dst: &str) -> Option<Vec<String>>;
}

/// Classic inverse-capacity edge weight: high-capacity links are cheap.
#[derive(Debug, Default)]
pub struct InverseCapacityCost;

impl RoutingCostProvider for InverseCapacityCost {
    fn cost(&self, link: &Link) -> f64 {
        1e6 / link.capacity_mbps()
    }
}

/// Identity scoring: a link is exactly as unreliable as it is loaded.
#[derive(Debug, Default)]
pub struct LinearLoadScorer;

impl ReliabilityScorer for LinearLoadScorer {
    fn score(&self, usage_ratio: f64) -> f64 {
        usage_ratio.clamp(0.0, 1.0)
    }
}

/// Dijkstra over the topology's cost matrix.
///
/// Ties break towards the lower sorted node index, so results are
/// deterministic for a given topology.
pub struct MinCostPathOracle {
    cost: Box<dyn RoutingCostProvider>,
}

impl MinCostPathOracle {
    pub fn new(cost: Box<dyn RoutingCostProvider>) -> Self {
        Self { cost }
    }
}

impl PathOracle for MinCostPathOracle {
    fn find_path(&self, topology: &Topology, src: &str, dst: &str) -> Option<Vec<String>> {
        let costs = topology.cost_matrix(self.cost.as_ref());
        let n = costs.len();
        let src_idx = costs.index_of(src)?;
        let dst_idx = costs.index_of(dst)?;
        if src_idx == dst_idx {
            return Some(vec![src.to_string()]);
        }

        let mut dist = vec![f64::INFINITY; n];
        let mut prev = vec![usize::MAX; n];
        let mut visited = vec![false; n];
        dist[src_idx] = 0.0;

        for _ in 0..n {
            let mut current = usize::MAX;
            let mut best = f64::INFINITY;
            for (i, &d) in dist.iter().enumerate() {
                if !visited[i] && d < best {
                    best = d;
                    current = i;
                }
            }
            if current == usize::MAX {
                break;
            }
            if current == dst_idx {
                break;
            }
            visited[current] = true;

            for next in 0..n {
                let edge = *costs.get(current, next);
                if edge.is_infinite() || visited[next] {
                    continue;
                }
                let candidate = dist[current] + edge;
                if candidate < dist[next] {
                    dist[next] = candidate;
                    prev[next] = current;
                }
            }
        }

        if dist[dst_idx].is_infinite() {
            return None;
        }

        let mut path = vec![dst_idx];
        let mut at = dst_idx;
        while at != src_idx {
            at = prev[at];
            path.push(at);
        }
        path.reverse();
        Some(
            path.into_iter()
                .map(|i| costs.names()[i].clone())
                .collect(),
        )
    }
}
