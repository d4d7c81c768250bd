use serde::{Deserialize, Serialize};
use std::fmt;

/// Traffic priority tier, each with its own latency SLA ceiling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceClass {
    #[serde(rename = "premium")]
    Premium,
    #[serde(rename = "assured")]
    Assured,
    #[serde(rename = "besteffort")]
    BestEffort,
}

impl ServiceClass {
    pub const ALL: [ServiceClass; 3] = [
        ServiceClass::Premium,
        ServiceClass::Assured,
        ServiceClass::BestEffort,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ServiceClass::Premium => "premium",
            ServiceClass::Assured => "assured",
            ServiceClass::BestEffort => "besteffort",
        }
    }

    /// Share of a source/destination pair's demand assigned to this class.
    pub fn split_ratio(self) -> f64 {
        match self {
            ServiceClass::Premium => 0.16,
            ServiceClass::Assured => 0.67,
            ServiceClass::BestEffort => 0.17,
        }
    }

    /// Latency SLA ceiling in milliseconds. Best effort gets five minutes,
    /// which no path will ever exceed.
    pub fn latency_ceiling_ms(self) -> f64 {
        match self {
            ServiceClass::Premium => 150.0,
            ServiceClass::Assured => 400.0,
            ServiceClass::BestEffort => 300_000.0,
        }
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A unit of routed traffic demand between two nodes.
///
/// Identity is the concatenation of source, destination and class tag, so a
/// pair of nodes carries at most one flow per service class. Flows are owned
/// by the reconciler's active registry; links reference them by id only.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFlow {
    id: String,
    src: String,
    dst: String,
    class: ServiceClass,
    bandwidth_mbps: f64,
    max_latency_ms: f64,
    max_jitter_ms: f64,
    max_loss_pct: f64,
}

impl ServiceFlow {
    pub fn new(
        src: impl Into<String>,
        dst: impl Into<String>,
        class: ServiceClass,
        bandwidth_mbps: f64,
    ) -> Self {
        let src = src.into();
        let dst = dst.into();
        Self {
            id: format!("{src}{dst}{}", class.tag()),
            src,
            dst,
            class,
            bandwidth_mbps,
            max_latency_ms: class.latency_ceiling_ms(),
            max_jitter_ms: 0.0,
            max_loss_pct: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn dst(&self) -> &str {
        &self.dst
    }

    pub fn class(&self) -> ServiceClass {
        self.class
    }

    pub fn bandwidth_mbps(&self) -> f64 {
        self.bandwidth_mbps
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.max_latency_ms
    }

    pub fn max_jitter_ms(&self) -> f64 {
        self.max_jitter_ms
    }

    pub fn max_loss_pct(&self) -> f64 {
        self.max_loss_pct
    }
}
