use crate::error::TopologyError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Classification of a node's function in the topology.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRole {
    #[serde(rename = "NR")]
    NotRelay,
    #[serde(rename = "ER")]
    EdgeRelay,
    #[serde(rename = "IR")]
    InteriorRelay,
}

impl RelayRole {
    pub fn tag(self) -> &'static str {
        match self {
            RelayRole::NotRelay => "NR",
            RelayRole::EdgeRelay => "ER",
            RelayRole::InteriorRelay => "IR",
        }
    }
}

impl fmt::Display for RelayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RelayRole {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NR" => Ok(RelayRole::NotRelay),
            "ER" => Ok(RelayRole::EdgeRelay),
            "IR" => Ok(RelayRole::InteriorRelay),
            other => Err(TopologyError::InvalidRole(other.to_string())),
        }
    }
}

/// A topology endpoint.
///
/// `links` maps every link id touching this node to its far endpoint; the
/// active sets track which of those links are currently switched on. A
/// neighbor stays active as long as at least one active link reaches it, so
/// switching off one direction of a bidirectional connection leaves the
/// neighbor active through the other. The active sets are only ever mutated
/// through [`Node::shutdown_link`] and [`Node::startup_link`] so they can
/// never contain entries missing from the link registry.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    pop: String,
    links: BTreeMap<String, String>,
    active_links: BTreeSet<String>,
    active_neighbors: BTreeSet<String>,
    role: RelayRole,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>, pop: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pop: pop.into(),
            links: BTreeMap::new(),
            active_links: BTreeSet::new(),
            active_neighbors: BTreeSet::new(),
            role: RelayRole::NotRelay,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pop(&self) -> &str {
        &self.pop
    }

    pub fn role(&self) -> RelayRole {
        self.role
    }

    /// Link ids touching this node, each with its far endpoint.
    pub fn links(&self) -> &BTreeMap<String, String> {
        &self.links
    }

    pub fn neighbors(&self) -> BTreeSet<String> {
        self.links.values().cloned().collect()
    }

    pub fn active_links(&self) -> &BTreeSet<String> {
        &self.active_links
    }

    pub fn active_neighbors(&self) -> &BTreeSet<String> {
        &self.active_neighbors
    }

    pub fn is_neighbor(&self, name: &str) -> bool {
        self.links.values().any(|far| far == name)
    }

    pub(crate) fn set_role(&mut self, role: RelayRole) {
        self.role = role;
    }

    /// Wires a link touching this node into the total and active sets.
    pub(crate) fn register_link(&mut self, link_id: &str, neighbor: &str) {
        self.links.insert(link_id.to_string(), neighbor.to_string());
        self.active_links.insert(link_id.to_string());
        self.active_neighbors.insert(neighbor.to_string());
    }

    /// Removes a link from the active set. The far endpoint leaves the active
    /// neighbors only when no other active link reaches it. Fails with
    /// `LinkNotOwned` when the link does not touch this node.
    pub(crate) fn shutdown_link(&mut self, link_id: &str) -> Result<(), TopologyError> {
        let neighbor = self.far_endpoint(link_id)?.to_string();
        self.active_links.remove(link_id);
        let still_reached = self
            .links
            .iter()
            .any(|(id, far)| *far == neighbor && self.active_links.contains(id));
        if !still_reached {
            self.active_neighbors.remove(&neighbor);
        }
        Ok(())
    }

    /// Restores a link and its far endpoint into the active sets.
    pub(crate) fn startup_link(&mut self, link_id: &str) -> Result<(), TopologyError> {
        let neighbor = self.far_endpoint(link_id)?.to_string();
        self.active_links.insert(link_id.to_string());
        self.active_neighbors.insert(neighbor);
        Ok(())
    }

    /// Drops one direction of the neighbor relation, simulating the graph
    /// corruption that `link_between` must detect.
    #[cfg(test)]
    pub(crate) fn forget_neighbor_for_tests(&mut self, name: &str) {
        self.links.retain(|_, far| far != name);
        let links = &self.links;
        self.active_links.retain(|id| links.contains_key(id));
        self.active_neighbors.remove(name);
    }

    fn far_endpoint(&self, link_id: &str) -> Result<&str, TopologyError> {
        self.links
            .get(link_id)
            .map(String::as_str)
            .ok_or_else(|| TopologyError::LinkNotOwned {
                link: link_id.to_string(),
                node: self.name.clone(),
            })
    }
}
