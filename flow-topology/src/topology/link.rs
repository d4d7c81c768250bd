use crate::error::TopologyError;
use crate::topology::flow::ServiceFlow;
use crate::topology::spec::LinkSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// Link energy model constants, from "A Hop-by-Hop Routing Mechanism for Green
// Internet". Kept bit-identical to the reference measurements.
const POWER_DELTA: f64 = 180.0;
const POWER_RHO: f64 = 5e-4;
const POWER_MU: f64 = 1e-3;
const POWER_ALPHA: f64 = 1.4;
const LINE_CARDS: f64 = 1.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    #[serde(rename = "on")]
    On,
    #[serde(rename = "off")]
    Off,
}

impl LinkStatus {
    pub fn tag(self) -> &'static str {
        match self {
            LinkStatus::On => "on",
            LinkStatus::Off => "off",
        }
    }

    pub fn is_on(self) -> bool {
        self == LinkStatus::On
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LinkStatus {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(LinkStatus::On),
            "off" => Ok(LinkStatus::Off),
            other => Err(TopologyError::InvalidStatus(other.to_string())),
        }
    }
}

/// A directed capacity edge from `node1` to `node2`.
///
/// Physical attributes are fixed at construction; the operational state
/// (status, consumed bandwidth, carried flows) changes as flows are applied
/// and links are switched. Switching a link off removes it from operational
/// adjacency but the object and its attributes persist.
#[derive(Debug, Clone)]
pub struct Link {
    id: String,
    node1: String,
    node2: String,
    capacity_mbps: f64,
    length_km: f64,
    latency_ms: f64,
    jitter_ms: f64,
    loss_pct: f64,
    status: LinkStatus,
    consumed_mbps: f64,
    flows: BTreeSet<String>,
}

/// Link ids are the ordered concatenation of the endpoint names.
pub fn link_id(node1: &str, node2: &str) -> String {
    format!("{node1}{node2}")
}

impl Link {
    pub(crate) fn new(spec: &LinkSpec) -> Self {
        Self {
            id: link_id(&spec.node1, &spec.node2),
            node1: spec.node1.clone(),
            node2: spec.node2.clone(),
            capacity_mbps: spec.capacity_mbps,
            length_km: spec.length_km,
            latency_ms: spec.latency_ms,
            jitter_ms: spec.jitter_ms,
            loss_pct: spec.loss_pct,
            status: LinkStatus::On,
            consumed_mbps: 0.0,
            flows: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node1(&self) -> &str {
        &self.node1
    }

    pub fn node2(&self) -> &str {
        &self.node2
    }

    pub fn capacity_mbps(&self) -> f64 {
        self.capacity_mbps
    }

    pub fn length_km(&self) -> f64 {
        self.length_km
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }

    pub fn loss_pct(&self) -> f64 {
        self.loss_pct
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn consumed_mbps(&self) -> f64 {
        self.consumed_mbps
    }

    pub fn carried_flows(&self) -> &BTreeSet<String> {
        &self.flows
    }

    pub(crate) fn set_status(&mut self, status: LinkStatus) {
        self.status = status;
    }

    /// Share of capacity in use, saturating at 1.0.
    ///
    /// Oversubscription is recorded as 100% usage rather than rejected: this
    /// layer never blocks admission, that is a caller concern.
    pub fn usage_ratio(&self) -> f64 {
        if self.consumed_mbps > self.capacity_mbps {
            1.0
        } else {
            self.consumed_mbps / self.capacity_mbps
        }
    }

    /// Power draw in watts as a pure function of consumed bandwidth.
    pub fn power_w(&self) -> f64 {
        let x = self.consumed_mbps;
        2.0 * LINE_CARDS
            * (POWER_DELTA
                + POWER_RHO * (x / LINE_CARDS)
                + POWER_MU * (x / LINE_CARDS).powf(POWER_ALPHA))
    }

    /// Adjusts consumed bandwidth; `delta_mbps` is negative on flow removal.
    pub(crate) fn consume_bandwidth(&mut self, delta_mbps: f64) {
        self.consumed_mbps += delta_mbps;
    }

    pub(crate) fn attach_flow(&mut self, flow: &ServiceFlow) {
        self.flows.insert(flow.id().to_string());
        self.consume_bandwidth(flow.bandwidth_mbps());
    }

    pub(crate) fn detach_flow(&mut self, flow: &ServiceFlow) -> Result<(), TopologyError> {
        if !self.flows.remove(flow.id()) {
            return Err(TopologyError::FlowNotOnLink {
                flow: flow.id().to_string(),
                link: self.id.clone(),
            });
        }
        self.consume_bandwidth(-flow.bandwidth_mbps());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::flow::ServiceClass;

    fn test_link() -> Link {
        Link::new(&LinkSpec {
            node1: "A".to_string(),
            node2: "B".to_string(),
            capacity_mbps: 1000.0,
            length_km: 5.0,
            latency_ms: 10.0,
            jitter_ms: 0.0,
            loss_pct: 0.0,
        })
    }

    #[test]
    fn usage_saturates_at_one() {
        let mut link = test_link();
        link.consume_bandwidth(500.0);
        assert_eq!(link.usage_ratio(), 0.5);
        link.consume_bandwidth(1500.0);
        assert_eq!(link.usage_ratio(), 1.0);
        assert_eq!(link.consumed_mbps(), 2000.0);
    }

    #[test]
    fn power_model_matches_reference_values() {
        let mut link = test_link();
        // Idle link: 2 * (180 + 0 + 0)
        assert_eq!(link.power_w(), 360.0);

        link.consume_bandwidth(1000.0);
        let x: f64 = 1000.0;
        let expected = 2.0 * (180.0 + 5e-4 * x + 1e-3 * x.powf(1.4));
        assert!((link.power_w() - expected).abs() < 1e-12);
    }

    #[test]
    fn attach_then_detach_restores_bandwidth() {
        let mut link = test_link();
        let flow = ServiceFlow::new("A", "B", ServiceClass::Assured, 123.456);
        link.attach_flow(&flow);
        assert_eq!(link.consumed_mbps(), 123.456);
        assert!(link.carried_flows().contains(flow.id()));
        link.detach_flow(&flow).unwrap();
        assert_eq!(link.consumed_mbps(), 0.0);
        assert!(link.carried_flows().is_empty());
    }

    #[test]
    fn detaching_unknown_flow_fails() {
        let mut link = test_link();
        let flow = ServiceFlow::new("A", "B", ServiceClass::Premium, 10.0);
        let err = link.detach_flow(&flow).unwrap_err();
        assert!(matches!(err, TopologyError::FlowNotOnLink { .. }));
    }

    #[test]
    fn status_round_trips_through_wire_tags() {
        assert_eq!("on".parse::<LinkStatus>().unwrap(), LinkStatus::On);
        assert_eq!("off".parse::<LinkStatus>().unwrap(), LinkStatus::Off);
        assert!(matches!(
            "standby".parse::<LinkStatus>(),
            Err(TopologyError::InvalidStatus(_))
        ));
    }
}
