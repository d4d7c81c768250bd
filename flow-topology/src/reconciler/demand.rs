use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One traffic-demand snapshot: source node → destination node → demand rate
/// in bytes per second.
pub type DemandSnapshot = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Error)]
pub enum DemandError {
    /// Not an error: the ordered snapshot sequence is over and the
    /// reconciliation loop stops cleanly.
    #[error("no demand snapshot left for tick {0}")]
    Exhausted(usize),

    /// A snapshot exists for this tick but could not be loaded. Fails the
    /// tick; the scheduler carries on with the next one.
    #[error("demand snapshot for tick {tick} could not be loaded: {reason}")]
    Invalid { tick: usize, reason: String },
}

/// Ordered sequence of demand snapshots, consumed one per reconciliation tick.
pub trait DemandSource: Send {
    fn load(&mut self, tick: usize) -> Result<DemandSnapshot, DemandError>;

    /// Number of snapshots available, when known up front.
    fn snapshot_count(&self) -> usize;
}

/// Reads `*.json` snapshot files from a directory, one file per tick, in
/// case-insensitive file-name sort order.
pub struct DirDemandSource {
    files: Vec<PathBuf>,
}

impl DirDemandSource {
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort_by_key(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        });
        Ok(Self { files })
    }
}

impl DemandSource for DirDemandSource {
    fn load(&mut self, tick: usize) -> Result<DemandSnapshot, DemandError> {
        let path = self.files.get(tick).ok_or(DemandError::Exhausted(tick))?;
        let contents = fs::read_to_string(path).map_err(|err| DemandError::Invalid {
            tick,
            reason: format!("{}: {err}", path.display()),
        })?;
        serde_json::from_str(&contents).map_err(|err| DemandError::Invalid {
            tick,
            reason: format!("{}: {err}", path.display()),
        })
    }

    fn snapshot_count(&self) -> usize {
        self.files.len()
    }
}

/// Canned snapshots for tests and programmatic runs.
pub struct InMemoryDemandSource {
    snapshots: Vec<DemandSnapshot>,
}

impl InMemoryDemandSource {
    pub fn new(snapshots: Vec<DemandSnapshot>) -> Self {
        Self { snapshots }
    }
}

impl DemandSource for InMemoryDemandSource {
    fn load(&mut self, tick: usize) -> Result<DemandSnapshot, DemandError> {
        self.snapshots
            .get(tick)
            .cloned()
            .ok_or(DemandError::Exhausted(tick))
    }

    fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}
