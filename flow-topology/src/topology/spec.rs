/// Plain description of a topology, decoupled from any on-disk format.
///
/// The CLI deserializes its JSON into DTOs and converts them into these
/// structs; tests build them directly.
#[derive(Debug, Clone)]
pub struct TopologySpec {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    /// Point-of-presence tag.
    pub pop: String,
}

/// One direction of a connection. Bidirectional connectivity is expressed as
/// two specs with swapped endpoints.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub node1: String,
    pub node2: String,
    pub capacity_mbps: f64,
    pub length_km: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_pct: f64,
}
