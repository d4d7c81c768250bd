use crate::topology::link::{Link, LinkStatus};
use crate::topology::node::{Node, RelayRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Immutable view of a [`Node`], generated on demand for persistence and
/// inspection. Never a second source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub pop: String,
    pub links: Vec<String>,
    pub active_links: Vec<String>,
    pub neighbors: Vec<String>,
    pub active_neighbors: Vec<String>,
    pub role: RelayRole,
}

impl NodeRecord {
    pub(crate) fn of(node: &Node) -> Self {
        Self {
            id: node.name().to_string(),
            pop: node.pop().to_string(),
            links: node.links().keys().cloned().collect(),
            active_links: node.active_links().iter().cloned().collect(),
            neighbors: node.neighbors().into_iter().collect(),
            active_neighbors: node.active_neighbors().iter().cloned().collect(),
            role: node.role(),
        }
    }
}

/// Immutable view of a [`Link`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub node1: String,
    pub node2: String,
    pub bw: f64,
    pub len: f64,
    pub delay: f64,
    pub jitter: f64,
    pub loss: f64,
    pub status: LinkStatus,
    pub bw_usage: f64,
    pub consumed_bw: f64,
    pub service_flows: Vec<String>,
    pub power_consumption: f64,
}

impl LinkRecord {
    pub(crate) fn of(link: &Link) -> Self {
        Self {
            id: link.id().to_string(),
            node1: link.node1().to_string(),
            node2: link.node2().to_string(),
            bw: link.capacity_mbps(),
            len: link.length_km(),
            delay: link.latency_ms(),
            jitter: link.jitter_ms(),
            loss: link.loss_pct(),
            status: link.status(),
            bw_usage: link.usage_ratio(),
            consumed_bw: link.consumed_mbps(),
            service_flows: link.carried_flows().iter().cloned().collect(),
            power_consumption: link.power_w(),
        }
    }
}

/// Destination for topology snapshots, written after every mutation.
///
/// Records arrive in registration order; the ordinal key (`node1`, `node2`,
/// ...) is derived from the position in the slice, never from map iteration.
pub trait SnapshotStore: Send + Sync {
    fn persist(&self, nodes: &[NodeRecord], links: &[LinkRecord]) -> io::Result<()>;
}

/// Drops snapshots on the floor. Used by tests and when persistence is
/// disabled on the CLI.
#[derive(Debug, Default)]
pub struct NullSnapshotStore;

impl SnapshotStore for NullSnapshotStore {
    fn persist(&self, _nodes: &[NodeRecord], _links: &[LinkRecord]) -> io::Result<()> {
        Ok(())
    }
}

/// Writes `nodes.json` and `links.json` into a database directory.
#[derive(Debug)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_keyed<T: Serialize>(&self, file: &str, prefix: &str, records: &[T]) -> io::Result<()> {
        let keyed: BTreeMap<String, &T> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (format!("{prefix}{}", i + 1), r))
            .collect();
        let json = serde_json::to_string_pretty(&keyed)?;
        fs::write(self.dir.join(file), json)
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn persist(&self, nodes: &[NodeRecord], links: &[LinkRecord]) -> io::Result<()> {
        self.write_keyed("nodes.json", "node", nodes)?;
        self.write_keyed("links.json", "link", links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::spec::LinkSpec;

    #[test]
    fn link_record_reflects_operational_state() {
        let mut link = Link::new(&LinkSpec {
            node1: "A".to_string(),
            node2: "B".to_string(),
            capacity_mbps: 1000.0,
            length_km: 1.0,
            latency_ms: 10.0,
            jitter_ms: 0.5,
            loss_pct: 0.1,
        });
        link.consume_bandwidth(100.0);

        let record = LinkRecord::of(&link);
        assert_eq!(record.id, "AB");
        assert_eq!(record.bw, 1000.0);
        assert_eq!(record.consumed_bw, 100.0);
        assert_eq!(record.bw_usage, 0.1);
        assert_eq!(record.status, LinkStatus::On);
    }

    #[test]
    fn json_store_writes_ordinal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("topologyDB")).unwrap();

        let node = Node::new("A", "pop-1");
        let link = Link::new(&LinkSpec {
            node1: "A".to_string(),
            node2: "B".to_string(),
            capacity_mbps: 1000.0,
            length_km: 1.0,
            latency_ms: 10.0,
            jitter_ms: 0.0,
            loss_pct: 0.0,
        });
        store
            .persist(&[NodeRecord::of(&node)], &[LinkRecord::of(&link)])
            .unwrap();

        let nodes: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.dir().join("nodes.json")).unwrap())
                .unwrap();
        assert_eq!(nodes["node1"]["_id"], "A");
        assert_eq!(nodes["node1"]["role"], "NR");

        let links: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.dir().join("links.json")).unwrap())
                .unwrap();
        assert_eq!(links["link1"]["_id"], "AB");
        assert_eq!(links["link1"]["status"], "on");
    }
}
