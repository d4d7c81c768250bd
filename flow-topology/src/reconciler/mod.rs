//! Flow reconciliation loop
//!
//! Drives the topology from successive traffic-demand snapshots: expands each
//! snapshot into service flows, diffs them against the previously committed
//! flow set, and issues apply/remove calls so that bandwidth accounting
//! happens exactly once per change.

mod demand;
mod faults;
mod stats;

pub use demand::{DemandError, DemandSnapshot, DemandSource, DirDemandSource, InMemoryDemandSource};
pub use faults::{FaultEntry, FaultSchedule};
pub use stats::{ClassStats, CsvStatsSink, MemoryStatsSink, StatsSink, TickReport};

use crate::error::TopologyError;
use crate::routing::{PathOracle, ReliabilityScorer};
use crate::topology::{ServiceClass, ServiceFlow, Topology};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Two flows with the same identity whose demand differs by no more than this
/// keep the previously assigned path, to avoid reroute churn from small
/// demand jitter.
pub const BW_DELTA_THRESHOLD_MBPS: f64 = 100.0;

/// A flow together with the path it is committed on.
#[derive(Debug, Clone)]
pub struct RoutedFlow {
    pub flow: ServiceFlow,
    pub path: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The snapshot for this tick could not be loaded; only this tick failed.
    #[error(transparent)]
    Demand(#[from] DemandError),

    /// The graph is corrupt; the whole loop must stop.
    #[error("topology corruption detected")]
    Corrupt(#[source] TopologyError),
}

/// What a single tick produced.
#[derive(Debug)]
pub enum TickOutcome {
    Completed(TickReport),
    /// The demand sequence is over; the loop stops cleanly.
    Exhausted,
}

/// How a full run ended.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ticks_completed: usize,
    pub last_report: Option<TickReport>,
    pub cancelled: bool,
}

pub struct Reconciler {
    topology: Arc<Mutex<Topology>>,
    demand: Box<dyn DemandSource>,
    oracle: Box<dyn PathOracle>,
    scorer: Box<dyn ReliabilityScorer>,
    sink: Box<dyn StatsSink>,
    faults: FaultSchedule,
    faulty: HashSet<String>,
    active: Vec<RoutedFlow>,
    routing_label: String,
    tick: usize,
}

impl Reconciler {
    pub fn new(
        topology: Arc<Mutex<Topology>>,
        demand: Box<dyn DemandSource>,
        oracle: Box<dyn PathOracle>,
        scorer: Box<dyn ReliabilityScorer>,
        sink: Box<dyn StatsSink>,
        faults: FaultSchedule,
        routing_label: impl Into<String>,
    ) -> Self {
        Self {
            topology,
            demand,
            oracle,
            scorer,
            sink,
            faults,
            faulty: HashSet::new(),
            active: Vec::new(),
            routing_label: routing_label.into(),
            tick: 0,
        }
    }

    pub fn topology(&self) -> Arc<Mutex<Topology>> {
        self.topology.clone()
    }

    /// Flows currently committed on the topology.
    pub fn active_flows(&self) -> &[RoutedFlow] {
        &self.active
    }

    pub fn next_tick(&self) -> usize {
        self.tick
    }

    /// Runs the loop at a fixed interval until the demand source is exhausted,
    /// the stop signal fires, or the graph turns out to be corrupt.
    ///
    /// This task is the only writer of the topology; concurrent readers take
    /// the same mutex and therefore never observe a half-applied path.
    pub async fn run(
        mut self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<RunSummary, ReconcileError> {
        let mut ticker = tokio::time::interval(interval);
        let mut last_report = None;
        let mut ticks_completed = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(ticks_completed, "reconciler stopped by cancellation");
                    return Ok(RunSummary { ticks_completed, last_report, cancelled: true });
                }
                _ = ticker.tick() => {}
            }

            match self.run_tick() {
                Ok(TickOutcome::Completed(report)) => {
                    ticks_completed += 1;
                    last_report = Some(report);
                }
                Ok(TickOutcome::Exhausted) => {
                    info!(ticks_completed, "demand source exhausted, reconciler done");
                    return Ok(RunSummary { ticks_completed, last_report, cancelled: false });
                }
                Err(ReconcileError::Demand(err)) => {
                    // one bad snapshot must not halt the scheduler
                    warn!(%err, "skipping tick with invalid demand snapshot");
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    /// Processes exactly one tick. Deterministic and synchronous, so tests
    /// drive it directly without a scheduler.
    pub fn run_tick(&mut self) -> Result<TickOutcome, ReconcileError> {
        let tick = self.tick;

        // 1. Scheduled node failures take effect before the snapshot is read.
        let failing: Vec<String> = self
            .faults
            .nodes_failing_at(tick)
            .map(str::to_string)
            .collect();
        for node in failing {
            info!(tick, node = node.as_str(), "injecting node fault");
            match self.topology.lock().shutdown_node(&node) {
                Ok(()) => {}
                Err(err) if err.is_corruption() => return Err(ReconcileError::Corrupt(err)),
                Err(err) => warn!(tick, node = node.as_str(), %err, "node fault failed"),
            }
            self.faulty.insert(node);
        }

        // 2. Load and expand the snapshot.
        let snapshot = match self.demand.load(tick) {
            Ok(snapshot) => snapshot,
            Err(DemandError::Exhausted(_)) => return Ok(TickOutcome::Exhausted),
            Err(err) => {
                self.tick += 1;
                return Err(err.into());
            }
        };
        let flows = expand_snapshot(&snapshot);

        // 3. Diff against the committed registry and reconcile.
        self.reconcile(flows)?;

        // 4. Per-tick statistics over the new registry.
        let report = self.report(tick);
        if let Err(err) = self.sink.record(&report) {
            warn!(tick, %err, "failed to record tick statistics");
        }

        self.tick += 1;
        Ok(TickOutcome::Completed(report))
    }

    fn reconcile(&mut self, flows: Vec<ServiceFlow>) -> Result<(), ReconcileError> {
        let mut old = std::mem::take(&mut self.active);
        let mut next: Vec<RoutedFlow> = Vec::with_capacity(flows.len());

        for flow in flows {
            if self.faulty.contains(flow.src()) || self.faulty.contains(flow.dst()) {
                // dropped entirely: neither applied nor kept
                continue;
            }

            let existing = old
                .iter()
                .position(|routed| routed.flow.id() == flow.id())
                .map(|idx| old.remove(idx));

            match existing {
                Some(routed) => {
                    let delta = (routed.flow.bandwidth_mbps() - flow.bandwidth_mbps()).abs();
                    let path_still_up = self.topology.lock().is_path_operational(&routed.path);
                    if delta > BW_DELTA_THRESHOLD_MBPS || !path_still_up {
                        // replacement: tear the old one down, route afresh
                        self.remove(&routed)?;
                        self.route_and_apply(flow, &mut next)?;
                    } else {
                        // stability policy: keep the committed entry as-is,
                        // including its recorded bandwidth
                        next.push(routed);
                    }
                }
                None => self.route_and_apply(flow, &mut next)?,
            }
        }

        // Everything left in the old registry is no longer demanded.
        for routed in old {
            self.remove(&routed)?;
        }

        self.active = next;
        Ok(())
    }

    fn route_and_apply(
        &mut self,
        flow: ServiceFlow,
        next: &mut Vec<RoutedFlow>,
    ) -> Result<(), ReconcileError> {
        let path = {
            let topology = self.topology.lock();
            self.oracle.find_path(&topology, flow.src(), flow.dst())
        };
        let Some(path) = path else {
            warn!(flow = flow.id(), "no operational path, dropping flow");
            return Ok(());
        };

        match self.topology.lock().apply_flow(&flow, &path) {
            Ok(()) => {
                next.push(RoutedFlow { flow, path });
                Ok(())
            }
            Err(err) if err.is_corruption() => Err(ReconcileError::Corrupt(err)),
            Err(err) => {
                // the failed apply already rolled itself back
                warn!(flow = flow.id(), %err, "failed to apply flow, skipping it");
                Ok(())
            }
        }
    }

    fn remove(&mut self, routed: &RoutedFlow) -> Result<(), ReconcileError> {
        match self.topology.lock().remove_flow(&routed.flow, &routed.path) {
            Ok(()) => Ok(()),
            Err(err) if err.is_corruption() => Err(ReconcileError::Corrupt(err)),
            Err(err) => {
                warn!(flow = routed.flow.id(), %err, "failed to remove flow");
                Ok(())
            }
        }
    }

    fn report(&self, tick: usize) -> TickReport {
        let topology = self.topology.lock();
        let (reliability_max, reliability_mean) =
            topology.reliability_score(self.scorer.as_ref());
        let mut report = TickReport {
            tick,
            routing_label: self.routing_label.clone(),
            power_w: topology.power_consumption(),
            reliability_max,
            reliability_mean,
            premium: ClassStats::default(),
            assured: ClassStats::default(),
            best_effort: ClassStats::default(),
        };

        let mut latencies: [Vec<f64>; 3] = Default::default();
        let mut overshoots: [Vec<f64>; 3] = Default::default();
        for routed in &self.active {
            let Some(latency) = mean_path_latency(&topology, &routed.path) else {
                continue;
            };
            let idx = class_index(routed.flow.class());
            latencies[idx].push(latency);
            let ceiling = routed.flow.class().latency_ceiling_ms();
            if latency > ceiling {
                overshoots[idx].push(latency - ceiling);
            }
        }

        for class in ServiceClass::ALL {
            let idx = class_index(class);
            let stats = report.class_mut(class);
            stats.mean_latency_ms = mean(&latencies[idx]);
            stats.violations = overshoots[idx].len();
            stats.mean_violation_ms = mean(&overshoots[idx]);
        }
        report
    }
}

fn class_index(class: ServiceClass) -> usize {
    match class {
        ServiceClass::Premium => 0,
        ServiceClass::Assured => 1,
        ServiceClass::BestEffort => 2,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean per-hop latency along a committed path. `None` for paths without hops
/// or paths that no longer resolve (the flow is skipped in the statistics).
fn mean_path_latency(topology: &Topology, path: &[String]) -> Option<f64> {
    let mut hops = 0usize;
    let mut total = 0.0;
    for hop in path.windows(2) {
        let link = topology.link_between(&hop[0], &hop[1]).ok()?;
        total += link.latency_ms();
        hops += 1;
    }
    (hops > 0).then(|| total / hops as f64)
}

/// Expands a demand snapshot into service flows: the demand rate is converted
/// to Mbps and split across the three classes by their fixed ratios, each
/// share rounded to three decimals.
fn expand_snapshot(snapshot: &DemandSnapshot) -> Vec<ServiceFlow> {
    let mut flows = Vec::new();
    for (src, destinations) in snapshot {
        for (dst, rate) in destinations {
            let mbps = (rate / 1e6).round();
            if mbps <= 0.0 {
                continue;
            }
            for class in ServiceClass::ALL {
                let bandwidth = round3(class.split_ratio() * mbps);
                flows.push(ServiceFlow::new(src.clone(), dst.clone(), class, bandwidth));
            }
        }
    }
    flows
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{InverseCapacityCost, LinearLoadScorer, MinCostPathOracle};
    use crate::topology::{LinkSpec, LinkStatus, NodeSpec, NullSnapshotStore, TopologySpec};
    use std::collections::BTreeMap;

    fn ring_topology() -> Arc<Mutex<Topology>> {
        let mut links = Vec::new();
        for (a, b) in [("A", "B"), ("B", "C"), ("C", "A")] {
            for (n1, n2) in [(a, b), (b, a)] {
                links.push(LinkSpec {
                    node1: n1.to_string(),
                    node2: n2.to_string(),
                    capacity_mbps: 1000.0,
                    length_km: 5.0,
                    latency_ms: 10.0,
                    jitter_ms: 0.0,
                    loss_pct: 0.0,
                });
            }
        }
        let spec = TopologySpec {
            name: "ring".to_string(),
            nodes: ["A", "B", "C"]
                .into_iter()
                .map(|n| NodeSpec {
                    name: n.to_string(),
                    pop: format!("pop-{n}"),
                })
                .collect(),
            links,
        };
        Arc::new(Mutex::new(
            Topology::from_spec(&spec, Arc::new(NullSnapshotStore)).unwrap(),
        ))
    }

    fn demand(src: &str, dst: &str, bytes_per_sec: f64) -> DemandSnapshot {
        let mut snapshot = DemandSnapshot::new();
        snapshot
            .entry(src.to_string())
            .or_insert_with(BTreeMap::new)
            .insert(dst.to_string(), bytes_per_sec);
        snapshot
    }

    /// Demand source whose configured ticks fail to load.
    struct FlakyDemandSource {
        inner: InMemoryDemandSource,
        bad_ticks: HashSet<usize>,
    }

    impl DemandSource for FlakyDemandSource {
        fn load(&mut self, tick: usize) -> Result<DemandSnapshot, DemandError> {
            if self.bad_ticks.contains(&tick) {
                return Err(DemandError::Invalid {
                    tick,
                    reason: "unreadable snapshot".to_string(),
                });
            }
            self.inner.load(tick)
        }

        fn snapshot_count(&self) -> usize {
            self.inner.snapshot_count()
        }
    }

    /// Path oracle wrapper that counts path requests, to observe rerouting.
    struct CountingOracle {
        inner: MinCostPathOracle,
        calls: Arc<Mutex<usize>>,
    }

    impl PathOracle for CountingOracle {
        fn find_path(&self, topology: &Topology, src: &str, dst: &str) -> Option<Vec<String>> {
            *self.calls.lock() += 1;
            self.inner.find_path(topology, src, dst)
        }
    }

    fn reconciler_with(
        topology: Arc<Mutex<Topology>>,
        snapshots: Vec<DemandSnapshot>,
        faults: FaultSchedule,
    ) -> (Reconciler, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let oracle = CountingOracle {
            inner: MinCostPathOracle::new(Box::new(InverseCapacityCost)),
            calls: calls.clone(),
        };
        let reconciler = Reconciler::new(
            topology,
            Box::new(InMemoryDemandSource::new(snapshots)),
            Box::new(oracle),
            Box::new(LinearLoadScorer),
            Box::new(MemoryStatsSink::default()),
            faults,
            "min-cost",
        );
        (reconciler, calls)
    }

    #[test]
    fn expansion_splits_demand_into_three_classes() {
        let snapshot = demand("A", "C", 100e6);
        let flows = expand_snapshot(&snapshot);
        assert_eq!(flows.len(), 3);
        assert_eq!(flows[0].id(), "ACpremium");
        assert_eq!(flows[0].bandwidth_mbps(), 16.0);
        assert_eq!(flows[1].bandwidth_mbps(), 67.0);
        assert_eq!(flows[2].bandwidth_mbps(), 17.0);
    }

    #[test]
    fn zero_demand_expands_to_nothing() {
        let flows = expand_snapshot(&demand("A", "C", 0.4e6));
        assert!(flows.is_empty());
    }

    #[test]
    fn first_tick_applies_all_flows() {
        let topology = ring_topology();
        let (mut reconciler, _) =
            reconciler_with(topology.clone(), vec![demand("A", "C", 100e6)], FaultSchedule::empty());

        let outcome = reconciler.run_tick().unwrap();
        let TickOutcome::Completed(report) = outcome else {
            panic!("expected a completed tick");
        };
        assert_eq!(reconciler.active_flows().len(), 3);
        // All three flows ride the direct A->C link
        let consumed = topology.lock().link("AC").unwrap().consumed_mbps();
        assert_eq!(consumed, 100.0);
        assert_eq!(report.premium.mean_latency_ms, Some(10.0));
        assert_eq!(report.premium.violations, 0);
    }

    #[test]
    fn small_bandwidth_jitter_keeps_the_old_path() {
        let topology = ring_topology();
        let (mut reconciler, calls) = reconciler_with(
            topology,
            vec![demand("A", "C", 1000e6), demand("A", "C", 1050e6)],
            FaultSchedule::empty(),
        );

        reconciler.run_tick().unwrap();
        let calls_after_first = *calls.lock();
        let paths_before: Vec<Vec<String>> = reconciler
            .active_flows()
            .iter()
            .map(|r| r.path.clone())
            .collect();

        reconciler.run_tick().unwrap();
        // per-class deltas are below 100 Mbps, so no new path requests
        assert_eq!(*calls.lock(), calls_after_first);
        let paths_after: Vec<Vec<String>> = reconciler
            .active_flows()
            .iter()
            .map(|r| r.path.clone())
            .collect();
        assert_eq!(paths_before, paths_after);
        // stability policy: the registry still records the old bandwidth
        assert_eq!(reconciler.active_flows()[0].flow.bandwidth_mbps(), 160.0);
    }

    #[test]
    fn large_bandwidth_jump_reroutes() {
        let topology = ring_topology();
        let (mut reconciler, calls) = reconciler_with(
            topology.clone(),
            vec![demand("A", "C", 100e6), demand("A", "C", 1100e6)],
            FaultSchedule::empty(),
        );

        reconciler.run_tick().unwrap();
        let calls_after_first = *calls.lock();
        reconciler.run_tick().unwrap();
        // assured delta is 670 Mbps > threshold; premium (160) and best effort
        // (170) also exceed it
        assert_eq!(*calls.lock(), calls_after_first + 3);
        let consumed = topology.lock().link("AC").unwrap().consumed_mbps();
        assert_eq!(consumed, 1100.0);
    }

    #[test]
    fn vanished_demand_tears_flows_down() {
        let topology = ring_topology();
        let (mut reconciler, _) = reconciler_with(
            topology.clone(),
            vec![demand("A", "C", 100e6), DemandSnapshot::new()],
            FaultSchedule::empty(),
        );

        reconciler.run_tick().unwrap();
        reconciler.run_tick().unwrap();
        assert!(reconciler.active_flows().is_empty());
        assert_eq!(topology.lock().link("AC").unwrap().consumed_mbps(), 0.0);
    }

    #[test]
    fn faulty_endpoint_flows_never_survive() {
        let topology = ring_topology();
        let faults = FaultSchedule::from_entries(vec![FaultEntry {
            tick: 1,
            node: "C".to_string(),
        }]);
        let (mut reconciler, _) = reconciler_with(
            topology.clone(),
            vec![demand("A", "C", 100e6), demand("A", "C", 100e6)],
            faults,
        );

        reconciler.run_tick().unwrap();
        assert_eq!(reconciler.active_flows().len(), 3);

        reconciler.run_tick().unwrap();
        assert!(reconciler.active_flows().is_empty());
        // the old flows were removed from the links too
        assert_eq!(topology.lock().link("AC").unwrap().consumed_mbps(), 0.0);
    }

    #[test]
    fn downed_link_forces_a_reroute_of_kept_flows() {
        let topology = ring_topology();
        let (mut reconciler, calls) = reconciler_with(
            topology.clone(),
            vec![demand("A", "C", 100e6), demand("A", "C", 100e6)],
            FaultSchedule::empty(),
        );

        reconciler.run_tick().unwrap();
        for routed in reconciler.active_flows() {
            assert_eq!(routed.path, ["A", "C"]);
        }
        let calls_after_first = *calls.lock();

        // the committed path goes down between ticks
        topology.lock().switch_link("AC", LinkStatus::Off).unwrap();

        reconciler.run_tick().unwrap();
        assert_eq!(*calls.lock(), calls_after_first + 3);
        for routed in reconciler.active_flows() {
            assert_eq!(routed.path, ["A", "B", "C"]);
        }
        // no flow silently references the downed link
        assert!(topology.lock().link("AC").unwrap().carried_flows().is_empty());
        assert_eq!(topology.lock().link("AB").unwrap().consumed_mbps(), 100.0);
    }

    #[test]
    fn exhausted_demand_ends_the_loop() {
        let topology = ring_topology();
        let (mut reconciler, _) =
            reconciler_with(topology, vec![demand("A", "C", 100e6)], FaultSchedule::empty());

        assert!(matches!(
            reconciler.run_tick().unwrap(),
            TickOutcome::Completed(_)
        ));
        assert!(matches!(
            reconciler.run_tick().unwrap(),
            TickOutcome::Exhausted
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_processes_every_snapshot_and_stops() {
        let topology = ring_topology();
        let (reconciler, _) = reconciler_with(
            topology,
            vec![demand("A", "C", 100e6), demand("A", "B", 50e6)],
            FaultSchedule::empty(),
        );

        let summary = reconciler
            .run(Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.ticks_completed, 2);
        assert!(!summary.cancelled);
        assert_eq!(summary.last_report.unwrap().tick, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_snapshot_fails_only_its_tick() {
        let topology = ring_topology();
        let source = FlakyDemandSource {
            inner: InMemoryDemandSource::new(vec![
                DemandSnapshot::new(),
                demand("A", "C", 100e6),
            ]),
            bad_ticks: [0].into_iter().collect(),
        };
        let reconciler = Reconciler::new(
            topology.clone(),
            Box::new(source),
            Box::new(MinCostPathOracle::new(Box::new(InverseCapacityCost))),
            Box::new(LinearLoadScorer),
            Box::new(MemoryStatsSink::default()),
            FaultSchedule::empty(),
            "min-cost",
        );

        let summary = reconciler
            .run(Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap();
        // tick 0 failed to load, tick 1 still ran to completion
        assert_eq!(summary.ticks_completed, 1);
        assert_eq!(summary.last_report.unwrap().tick, 1);
        assert_eq!(topology.lock().link("AC").unwrap().consumed_mbps(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_before_the_next_tick() {
        let topology = ring_topology();
        let (reconciler, _) =
            reconciler_with(topology, vec![demand("A", "C", 100e6)], FaultSchedule::empty());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = reconciler
            .run(Duration::from_secs(1), cancel)
            .await
            .unwrap();
        assert_eq!(summary.ticks_completed, 0);
        assert!(summary.cancelled);
    }
}
