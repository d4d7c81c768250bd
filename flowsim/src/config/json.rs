use flow_topology::topology::{LinkSpec, NodeSpec, TopologySpec};
use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct TopologyJson {
    #[serde(default = "default_topology_name")]
    name: String,
    nodes: Vec<NodeJson>,
    links: Vec<LinkJson>,
}

fn default_topology_name() -> String {
    "topology".to_string()
}

#[derive(Deserialize, Clone)]
struct NodeJson {
    id: String,
    pop: String,
}

/// One direction of a connection; bidirectional connectivity needs two
/// entries with swapped endpoints.
#[derive(Deserialize, Clone)]
struct LinkJson {
    node1: String,
    node2: String,
    /// Capacity in Mbps
    bw: f64,
    /// Length in km
    len: f64,
    /// Latency in milliseconds
    delay: f64,
    /// Jitter in milliseconds
    #[serde(default)]
    jitter: f64,
    /// Packet loss in percent
    #[serde(default)]
    loss: f64,
}

impl From<TopologyJson> for TopologySpec {
    fn from(json: TopologyJson) -> Self {
        TopologySpec {
            name: json.name,
            nodes: json
                .nodes
                .into_iter()
                .map(|n| NodeSpec {
                    name: n.id,
                    pop: n.pop,
                })
                .collect(),
            links: json
                .links
                .into_iter()
                .map(|l| LinkSpec {
                    node1: l.node1,
                    node2: l.node2,
                    capacity_mbps: l.bw,
                    length_km: l.len,
                    latency_ms: l.delay,
                    jitter_ms: l.jitter,
                    loss_pct: l.loss,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_json_converts_to_spec() {
        let json: TopologyJson = serde_json::from_str(
            r#"{
                "nodes": [
                    {"id": "A", "pop": "pop-1"},
                    {"id": "B", "pop": "pop-2"}
                ],
                "links": [
                    {"node1": "A", "node2": "B", "bw": 1000.0, "len": 5.0, "delay": 10.0},
                    {"node1": "B", "node2": "A", "bw": 1000.0, "len": 5.0, "delay": 10.0}
                ]
            }"#,
        )
        .unwrap();

        let spec: TopologySpec = json.into();
        assert_eq!(spec.name, "topology");
        assert_eq!(spec.nodes.len(), 2);
        assert_eq!(spec.links.len(), 2);
        assert_eq!(spec.links[0].capacity_mbps, 1000.0);
        assert_eq!(spec.links[0].jitter_ms, 0.0);
    }
}
