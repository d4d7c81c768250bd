use crate::topology::ServiceClass;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Per-service-class aggregates for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassStats {
    /// Mean over the class's flows of each flow's mean per-hop latency.
    /// `None` when the class has no routed flows this tick.
    pub mean_latency_ms: Option<f64>,
    /// Flows whose mean path latency exceeds the class SLA ceiling.
    pub violations: usize,
    /// Mean overshoot above the ceiling, over violating flows only.
    pub mean_violation_ms: Option<f64>,
}

/// Everything the statistics sink receives for one reconciliation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: usize,
    pub routing_label: String,
    pub power_w: f64,
    pub reliability_max: f64,
    pub reliability_mean: f64,
    pub premium: ClassStats,
    pub assured: ClassStats,
    pub best_effort: ClassStats,
}

impl TickReport {
    pub fn class(&self, class: ServiceClass) -> &ClassStats {
        match class {
            ServiceClass::Premium => &self.premium,
            ServiceClass::Assured => &self.assured,
            ServiceClass::BestEffort => &self.best_effort,
        }
    }

    pub(crate) fn class_mut(&mut self, class: ServiceClass) -> &mut ClassStats {
        match class {
            ServiceClass::Premium => &mut self.premium,
            ServiceClass::Assured => &mut self.assured,
            ServiceClass::BestEffort => &mut self.best_effort,
        }
    }
}

/// Receives one record per tick.
pub trait StatsSink: Send {
    fn record(&mut self, report: &TickReport) -> io::Result<()>;
}

/// Appends one CSV row per tick, writing the header when the file is created.
pub struct CsvStatsSink {
    writer: BufWriter<File>,
}

const CSV_HEADER: &str = "tick,routing_algorithm,power_w,reliability_max,reliability_mean,\
mean_latency_premium_ms,mean_latency_assured_ms,mean_latency_besteffort_ms,\
premium_violations,assured_violations,besteffort_violations,\
mean_premium_violation_ms,mean_assured_violation_ms,mean_besteffort_violation_ms";

impl CsvStatsSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;
        Ok(Self { writer })
    }

    fn opt(value: Option<f64>) -> String {
        value.map(|v| format!("{v}")).unwrap_or_default()
    }
}

impl StatsSink for CsvStatsSink {
    fn record(&mut self, report: &TickReport) -> io::Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            report.tick,
            report.routing_label,
            report.power_w,
            report.reliability_max,
            report.reliability_mean,
            Self::opt(report.premium.mean_latency_ms),
            Self::opt(report.assured.mean_latency_ms),
            Self::opt(report.best_effort.mean_latency_ms),
            report.premium.violations,
            report.assured.violations,
            report.best_effort.violations,
            Self::opt(report.premium.mean_violation_ms),
            Self::opt(report.assured.mean_violation_ms),
            Self::opt(report.best_effort.mean_violation_ms),
        )?;
        self.writer.flush()
    }
}

/// Collects reports in memory; for tests and programmatic consumers.
#[derive(Debug, Default)]
pub struct MemoryStatsSink {
    pub reports: Vec<TickReport>,
}

impl StatsSink for MemoryStatsSink {
    fn record(&mut self, report: &TickReport) -> io::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn report() -> TickReport {
        TickReport {
            tick: 3,
            routing_label: "min-cost".to_string(),
            power_w: 2160.0,
            reliability_max: 0.5,
            reliability_mean: 0.25,
            premium: ClassStats {
                mean_latency_ms: Some(20.0),
                violations: 0,
                mean_violation_ms: None,
            },
            assured: ClassStats::default(),
            best_effort: ClassStats::default(),
        }
    }

    #[test]
    fn csv_sink_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let mut sink = CsvStatsSink::create(&path).unwrap();
        sink.record(&report()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with("tick,routing_algorithm"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("3,min-cost,2160,"));
        // empty cells for classes without flows
        assert!(row.ends_with(",,"));
    }
}
