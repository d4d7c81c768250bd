use fastrand::Rng;

/// A node failure scheduled for a specific reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultEntry {
    pub tick: usize,
    pub node: String,
}

/// Node failures to inject over the course of a run.
///
/// Faults for tick *i* are applied before the demand snapshot for tick *i* is
/// processed. A fault on a node whose links are already all down is a no-op
/// beyond marking the node faulty.
#[derive(Debug, Clone, Default)]
pub struct FaultSchedule {
    entries: Vec<FaultEntry>,
}

impl FaultSchedule {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<FaultEntry>) -> Self {
        Self { entries }
    }

    /// Draws `count` faults at distinct ticks on distinct nodes.
    pub fn random(count: usize, tick_count: usize, node_names: &[String], rng: &mut Rng) -> Self {
        let count = count.min(tick_count).min(node_names.len());

        let mut ticks: Vec<usize> = (0..tick_count).collect();
        rng.shuffle(&mut ticks);
        let mut nodes: Vec<&String> = node_names.iter().collect();
        rng.shuffle(&mut nodes);

        let entries = ticks
            .into_iter()
            .zip(nodes)
            .take(count)
            .map(|(tick, node)| FaultEntry {
                tick,
                node: node.clone(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[FaultEntry] {
        &self.entries
    }

    pub fn nodes_failing_at(&self, tick: usize) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |entry| entry.tick == tick)
            .map(|entry| entry.node.as_str())
    }
}
