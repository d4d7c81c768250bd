//! Topology graph engine
//!
//! Owns every node and link, keeps static and operational adjacency views in
//! sync with link switching, and applies/removes flows along paths as one
//! logical transaction.

mod flow;
mod link;
mod matrix;
mod node;
mod snapshot;
mod spec;

pub use flow::{ServiceClass, ServiceFlow};
pub use link::{Link, LinkStatus, link_id};
pub use matrix::NodeMatrix;
pub use node::{Node, RelayRole};
pub use snapshot::{JsonSnapshotStore, LinkRecord, NodeRecord, NullSnapshotStore, SnapshotStore};
pub use spec::{LinkSpec, NodeSpec, TopologySpec};

use crate::error::TopologyError;
use crate::routing::{ReliabilityScorer, RoutingCostProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The sole mutable shared state of the simulation.
///
/// Nodes and links are created at construction or through `add_node`/`add_link`
/// and never destroyed; all later mutation goes through explicit operations
/// that keep both endpoints and the link consistent. A snapshot of the full
/// node/link state is persisted through the configured [`SnapshotStore`] after
/// every mutation.
pub struct Topology {
    name: String,
    nodes: HashMap<String, Node>,
    links: HashMap<String, Link>,
    node_order: Vec<String>,
    link_order: Vec<String>,
    store: Arc<dyn SnapshotStore>,
}

impl Topology {
    pub fn new(name: impl Into<String>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            links: HashMap::new(),
            node_order: Vec::new(),
            link_order: Vec::new(),
            store,
        }
    }

    /// Builds a topology from a spec: all nodes first, then all links.
    pub fn from_spec(spec: &TopologySpec, store: Arc<dyn SnapshotStore>) -> Result<Self, TopologyError> {
        let mut topology = Self::new(spec.name.clone(), store);
        for node in &spec.nodes {
            topology.add_node(node.clone())?;
        }
        for link in &spec.links {
            topology.add_link(link.clone())?;
        }
        Ok(topology)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Node names in lexicographic order; the index space of every matrix.
    pub fn sorted_node_names(&self) -> Vec<String> {
        let mut names = self.node_order.clone();
        names.sort_unstable();
        names
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<(), TopologyError> {
        let node = Node::new(spec.name, spec.pop);
        self.node_order.push(node.name().to_string());
        self.nodes.insert(node.name().to_string(), node);
        self.persist()
    }

    /// Registers a directed link. Both endpoints must already be present; the
    /// link id and the far endpoint are wired into the total and active sets
    /// of both nodes.
    pub fn add_link(&mut self, spec: LinkSpec) -> Result<(), TopologyError> {
        if !self.nodes.contains_key(&spec.node1) {
            return Err(TopologyError::NodeNotFound(spec.node1));
        }
        if !self.nodes.contains_key(&spec.node2) {
            return Err(TopologyError::NodeNotFound(spec.node2));
        }

        let link = Link::new(&spec);
        let id = link.id().to_string();
        for endpoint in [&spec.node1, &spec.node2] {
            let far = if endpoint == &spec.node1 { &spec.node2 } else { &spec.node1 };
            self.nodes
                .get_mut(endpoint)
                .expect("endpoint presence checked above")
                .register_link(&id, far);
        }
        self.link_order.push(id.clone());
        self.links.insert(id, link);
        self.persist()
    }

    pub fn node(&self, name: &str) -> Result<&Node, TopologyError> {
        self.nodes
            .get(name)
            .ok_or_else(|| TopologyError::NodeNotFound(name.to_string()))
    }

    pub fn link(&self, id: &str) -> Result<&Link, TopologyError> {
        self.links
            .get(id)
            .ok_or_else(|| TopologyError::LinkNotFound(id.to_string()))
    }

    /// Returns the directed link a→b after checking that the neighbor relation
    /// holds in both directions. An asymmetric claim (or mutual neighbors with
    /// no link object) means the graph is corrupt and is fatal to the caller.
    pub fn link_between(&self, a: &str, b: &str) -> Result<&Link, TopologyError> {
        let node_a = self.node(a)?;
        let node_b = self.node(b)?;

        let a_has_b = node_a.is_neighbor(b);
        let b_has_a = node_b.is_neighbor(a);
        if a_has_b != b_has_a {
            return Err(TopologyError::InvalidNeighborPair {
                a: a.to_string(),
                b: b.to_string(),
            });
        }
        if !a_has_b {
            return Err(TopologyError::LinkNotFound(link_id(a, b)));
        }

        self.links
            .get(&link_id(a, b))
            .ok_or_else(|| TopologyError::InvalidNeighborPair {
                a: a.to_string(),
                b: b.to_string(),
            })
    }

    /// Static connectivity, independent of link status.
    pub fn adjacency_matrix(&self) -> NodeMatrix<u8> {
        self.matrix_where(|_| true)
    }

    /// Connectivity restricted to links currently switched on. Reflects the
    /// latest `switch_link` calls immediately.
    pub fn operational_adjacency_matrix(&self) -> NodeMatrix<u8> {
        self.matrix_where(|link| link.status().is_on())
    }

    fn matrix_where(&self, include: impl Fn(&Link) -> bool) -> NodeMatrix<u8> {
        let names = self.sorted_node_names();
        let mut matrix = NodeMatrix::filled(names.clone(), 0u8);
        for (i, from) in names.iter().enumerate() {
            for (j, to) in names.iter().enumerate() {
                if let Some(link) = self.links.get(&link_id(from, to)) {
                    if include(link) {
                        matrix.set(i, j, 1);
                    }
                }
            }
        }
        matrix
    }

    /// Per-edge routing cost over operational edges; non-edges are +infinity.
    /// Costs are directed, symmetry is not assumed.
    pub fn cost_matrix(&self, provider: &dyn RoutingCostProvider) -> NodeMatrix<f64> {
        let names = self.sorted_node_names();
        let mut matrix = NodeMatrix::filled(names.clone(), f64::INFINITY);
        for (i, from) in names.iter().enumerate() {
            for (j, to) in names.iter().enumerate() {
                if let Some(link) = self.links.get(&link_id(from, to)) {
                    if link.status().is_on() {
                        matrix.set(i, j, provider.cost(link));
                    }
                }
            }
        }
        matrix
    }

    /// Applies a flow along `path`, one hop at a time.
    ///
    /// The whole application is one logical transaction: if any hop fails, the
    /// bandwidth and carried-flow changes on previously-touched hops are
    /// rolled back in reverse order before the error is surfaced.
    pub fn apply_flow(&mut self, flow: &ServiceFlow, path: &[String]) -> Result<(), TopologyError> {
        let mut touched: Vec<String> = Vec::with_capacity(path.len().saturating_sub(1));
        for hop in path.windows(2) {
            match self.resolve_hop(&hop[0], &hop[1]) {
                Ok(id) => {
                    self.links
                        .get_mut(&id)
                        .expect("resolve_hop returns ids of existing links")
                        .attach_flow(flow);
                    touched.push(id);
                }
                Err(err) => {
                    self.rollback_attach(flow, &touched);
                    return Err(TopologyError::PartialApply {
                        hop: link_id(&hop[0], &hop[1]),
                        source: Box::new(err),
                    });
                }
            }
        }
        debug!(flow = flow.id(), hops = touched.len(), "flow applied");
        self.persist()
    }

    /// Symmetric rollback of [`Topology::apply_flow`]. Removing a flow that a
    /// hop never carried is a programming error and fails with `FlowNotOnLink`
    /// after restoring the hops already detached.
    pub fn remove_flow(&mut self, flow: &ServiceFlow, path: &[String]) -> Result<(), TopologyError> {
        let mut touched: Vec<String> = Vec::with_capacity(path.len().saturating_sub(1));
        for hop in path.windows(2) {
            let result = self.resolve_hop(&hop[0], &hop[1]).and_then(|id| {
                self.links
                    .get_mut(&id)
                    .expect("resolve_hop returns ids of existing links")
                    .detach_flow(flow)
                    .map(|()| id)
            });
            match result {
                Ok(id) => touched.push(id),
                Err(err) => {
                    // undo the detaches so the graph stays where it was
                    for id in touched.iter().rev() {
                        self.links
                            .get_mut(id)
                            .expect("touched ids exist")
                            .attach_flow(flow);
                    }
                    return Err(TopologyError::PartialApply {
                        hop: link_id(&hop[0], &hop[1]),
                        source: Box::new(err),
                    });
                }
            }
        }
        debug!(flow = flow.id(), hops = touched.len(), "flow removed");
        self.persist()
    }

    /// Validates a hop like [`Topology::link_between`] but returns the id, so
    /// the caller can take a mutable borrow afterwards.
    fn resolve_hop(&self, a: &str, b: &str) -> Result<String, TopologyError> {
        self.link_between(a, b).map(|link| link.id().to_string())
    }

    fn rollback_attach(&mut self, flow: &ServiceFlow, touched: &[String]) {
        for id in touched.iter().rev() {
            let link = self.links.get_mut(id).expect("touched ids exist");
            // detach cannot fail here, the flow was just attached
            let _ = link.detach_flow(flow);
        }
    }

    /// Every consecutive hop exists and is switched on.
    pub fn is_path_operational(&self, path: &[String]) -> bool {
        path.windows(2).all(|hop| {
            self.links
                .get(&link_id(&hop[0], &hop[1]))
                .is_some_and(|link| link.status().is_on())
        })
    }

    /// Switches a link on or off, updating the active sets of both endpoints
    /// symmetrically. A no-op when the link already has the requested status,
    /// so one endpoint can never end up updated without the other.
    pub fn switch_link(&mut self, id: &str, status: LinkStatus) -> Result<(), TopologyError> {
        let link = self.link(id)?;
        if link.status() == status {
            return Ok(());
        }
        let (node1, node2) = (link.node1().to_string(), link.node2().to_string());

        // Both endpoints must resolve before anything is touched, so a failure
        // can never leave one endpoint updated and the other not.
        self.node(&node1)?;
        self.node(&node2)?;

        self.links
            .get_mut(id)
            .expect("looked up above")
            .set_status(status);
        for endpoint in [&node1, &node2] {
            let node = self
                .nodes
                .get_mut(endpoint)
                .expect("endpoint presence checked above");
            let updated = match status {
                LinkStatus::On => node.startup_link(id),
                LinkStatus::Off => node.shutdown_link(id),
            };
            updated.expect("registration wired this link into both endpoints");
        }
        debug!(link = id, %status, "link switched");
        self.persist()
    }

    /// Switches off every link touching `name`, in both directions. Used when
    /// a node fails. A node with no active links is a no-op.
    pub fn shutdown_node(&mut self, name: &str) -> Result<(), TopologyError> {
        let ids: Vec<String> = self.node(name)?.links().keys().cloned().collect();
        for id in ids {
            self.switch_link(&id, LinkStatus::Off)?;
        }
        Ok(())
    }

    pub fn set_role(&mut self, name: &str, role: RelayRole) -> Result<(), TopologyError> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| TopologyError::NodeNotFound(name.to_string()))?
            .set_role(role);
        self.persist()
    }

    /// Maximum and mean of the reliability score over all links' bandwidth
    /// usage ratios. Returns (0, 0) for a topology without links.
    pub fn reliability_score(&self, scorer: &dyn ReliabilityScorer) -> (f64, f64) {
        if self.links.is_empty() {
            return (0.0, 0.0);
        }
        let mut max = f64::MIN;
        let mut sum = 0.0;
        for id in &self.link_order {
            let score = scorer.score(self.links[id].usage_ratio());
            max = max.max(score);
            sum += score;
        }
        (max, sum / self.link_order.len() as f64)
    }

    /// Sum of every link's derived power value, in watts.
    pub fn power_consumption(&self) -> f64 {
        self.links.values().map(Link::power_w).sum()
    }

    /// Snapshot records in registration order.
    pub fn records(&self) -> (Vec<NodeRecord>, Vec<LinkRecord>) {
        let nodes = self
            .node_order
            .iter()
            .map(|name| NodeRecord::of(&self.nodes[name]))
            .collect();
        let links = self
            .link_order
            .iter()
            .map(|id| LinkRecord::of(&self.links[id]))
            .collect();
        (nodes, links)
    }

    fn persist(&self) -> Result<(), TopologyError> {
        let (nodes, links) = self.records();
        self.store.persist(&nodes, &links)?;
        Ok(())
    }
}
