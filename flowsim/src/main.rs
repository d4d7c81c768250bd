mod config;

use crate::config::cli::CliOpt;
use crate::config::json::TopologyJson;
use anyhow::Context;
use clap::Parser;
use fastrand::Rng;
use flow_topology::reconciler::{
    CsvStatsSink, DemandSource, DirDemandSource, FaultSchedule, Reconciler,
};
use flow_topology::routing::{InverseCapacityCost, LinearLoadScorer, MinCostPathOracle};
use flow_topology::topology::{
    JsonSnapshotStore, NullSnapshotStore, SnapshotStore, Topology, TopologySpec,
};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = CliOpt::parse();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to initialize tokio");
    rt.block_on(run(options))
}

async fn run(options: CliOpt) -> anyhow::Result<()> {
    let topology_json: TopologyJson = serde_json::from_str(
        &fs::read_to_string(&options.topology)
            .with_context(|| format!("reading {}", options.topology.display()))?,
    )
    .context("parsing topology JSON")?;
    let spec: TopologySpec = topology_json.into();

    let store: Arc<dyn SnapshotStore> = match &options.db_dir {
        Some(dir) => Arc::new(
            JsonSnapshotStore::new(dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?,
        ),
        None => Arc::new(NullSnapshotStore),
    };
    let topology = Topology::from_spec(&spec, store).context("building topology")?;

    let demand = DirDemandSource::new(&options.traffic_dir)
        .with_context(|| format!("reading {}", options.traffic_dir.display()))?;

    let seed = if options.non_deterministic {
        Rng::new().u64(..)
    } else {
        options.seed
    };
    let faults = FaultSchedule::random(
        options.faults,
        demand.snapshot_count(),
        &topology.sorted_node_names(),
        &mut Rng::with_seed(seed),
    );

    println!("--- Params ---");
    println!("* Topology: {} ({} nodes, {} links)", topology.name(), topology.node_count(), topology.link_count());
    println!("* Demand snapshots: {}", demand.snapshot_count());
    println!("* Tick interval: {} ms", options.interval_ms);
    println!("* Routing: {}", options.routing);
    println!("* Fault seed: {seed} ({} faults)", faults.entries().len());
    println!("--- Adjacency ---");
    print!("{}", topology.adjacency_matrix());

    let sink = CsvStatsSink::create(&options.stats_out)
        .with_context(|| format!("creating {}", options.stats_out.display()))?;
    let reconciler = Reconciler::new(
        Arc::new(Mutex::new(topology)),
        Box::new(demand),
        Box::new(MinCostPathOracle::new(Box::new(InverseCapacityCost))),
        Box::new(LinearLoadScorer),
        Box::new(sink),
        faults,
        options.routing.clone(),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let summary = reconciler
        .run(Duration::from_millis(options.interval_ms), cancel)
        .await
        .context("reconciliation loop failed")?;

    println!("--- Run summary ---");
    println!(
        "* Ticks completed: {}{}",
        summary.ticks_completed,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    if let Some(report) = &summary.last_report {
        println!("* Power consumption: {:.2} W", report.power_w);
        println!(
            "* Reliability: max {:.4}, mean {:.4}",
            report.reliability_max, report.reliability_mean
        );
        for (label, stats) in [
            ("premium", &report.premium),
            ("assured", &report.assured),
            ("best effort", &report.best_effort),
        ] {
            match stats.mean_latency_ms {
                Some(latency) => println!(
                    "* {label}: mean latency {latency:.2} ms, {} SLA violations",
                    stats.violations
                ),
                None => println!("* {label}: no routed flows"),
            }
        }
    }
    println!("* Statistics written to {}", options.stats_out.display());

    Ok(())
}
