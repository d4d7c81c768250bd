use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct CliOpt {
    /// Path to the JSON file describing the topology (nodes and links)
    #[arg(long)]
    pub topology: PathBuf,

    /// Directory containing the traffic-demand snapshots, one JSON file per
    /// tick, consumed in file-name sort order
    #[arg(long)]
    pub traffic_dir: PathBuf,

    /// Interval between reconciliation ticks
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Number of random node faults to inject over the run
    #[arg(long, default_value_t = 0)]
    pub faults: usize,

    /// Seed for the fault schedule, so runs are reproducible
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Draw the fault schedule from a non-constant seed
    #[arg(long)]
    pub non_deterministic: bool,

    /// Label for the routing algorithm, recorded with every statistics row
    #[arg(long, default_value = "min-cost")]
    pub routing: String,

    /// Directory for the persisted topology database (nodes.json/links.json).
    /// Persistence is disabled when omitted.
    #[arg(long)]
    pub db_dir: Option<PathBuf>,

    /// CSV file receiving one statistics row per tick
    #[arg(long, default_value = "stats.csv")]
    pub stats_out: PathBuf,
}
