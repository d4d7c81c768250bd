use thiserror::Error;

/// Errors surfaced by topology lookups and mutations.
///
/// Lookup and validation failures are recoverable: the caller decides whether to
/// retry with a different path or drop the flow. `InvalidNeighborPair` is not
/// recoverable: it means the graph itself is inconsistent and every downstream
/// computation (adjacency, costs, paths) is suspect.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("node {0} is not in this topology")]
    NodeNotFound(String),

    #[error("link {0} is not in this topology")]
    LinkNotFound(String),

    /// The neighbor relation between two nodes is asymmetric, or two nodes
    /// claim to be neighbors without a link between them. This signals graph
    /// corruption and must be treated as fatal by the caller.
    #[error("nodes {a} and {b} disagree about being neighbors")]
    InvalidNeighborPair { a: String, b: String },

    #[error("{0} is not a valid relay role")]
    InvalidRole(String),

    #[error("{0} is not a valid link status")]
    InvalidStatus(String),

    #[error("link {link} does not touch node {node}")]
    LinkNotOwned { link: String, node: String },

    /// Attempted to remove a flow from a link that never carried it.
    #[error("flow {flow} is not carried by link {link}")]
    FlowNotOnLink { flow: String, link: String },

    /// A hop failed while applying or removing a flow along a path. Bandwidth
    /// changes on previously-touched hops have already been rolled back.
    #[error("flow application failed at hop {hop} (touched hops were rolled back)")]
    PartialApply {
        hop: String,
        #[source]
        source: Box<TopologyError>,
    },

    #[error("failed to persist topology snapshot")]
    Snapshot(#[from] std::io::Error),
}

impl TopologyError {
    /// Whether this error indicates a corrupted graph rather than a bad call.
    pub fn is_corruption(&self) -> bool {
        match self {
            TopologyError::InvalidNeighborPair { .. } => true,
            TopologyError::PartialApply { source, .. } => source.is_corruption(),
            _ => false,
        }
    }
}
