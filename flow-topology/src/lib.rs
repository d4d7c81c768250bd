//! Flow-topology simulator
//!
//! Models a packet-network topology (nodes, directed capacity links) and
//! reconciles routed traffic flows against it over discrete ticks, tracking
//! energy consumption, link utilization and per-class latency SLA violations
//! under pluggable routing and reliability algorithms.

pub mod error;
pub mod reconciler;
pub mod routing;
pub mod topology;
