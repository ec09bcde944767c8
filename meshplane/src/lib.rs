#![deny(missing_docs)]

//! # meshplane
//!
//! The control plane of a hierarchical multipoint-connectivity network: an
//! **aggregator** composed of inferior networks linked by **trunks**. A caller asks
//! for a tree connecting a set of endpoints with per-edge bandwidth guarantees
//! described by a **bandwidth function**; the aggregator plans a spanning tree across
//! its trunks, reduces the bandwidth function to the endpoint grouping visible at each
//! inferior, and drives the resulting per-inferior requests through a service
//! lifecycle.
//!
//! ## Structure
//!
//! - **[`goalset`]** — the bit-packed set primitive endpoint partitions are expressed
//!   as.
//! - **[`bandwidth`]** — the bandwidth-function algebra ([`bandwidth::BandwidthFunction`])
//!   and its interval arithmetic ([`bandwidth::BandwidthRange`]).
//! - **[`trunk`]** — capacitated, labelled edges between inferior-network terminals
//!   ([`trunk::Trunk`]).
//! - **[`topology`]** — the weighted edge graph the planner searches
//!   ([`topology::Topology`]).
//! - **[`planner`]** — tree selection and per-inferior delegation
//!   ([`planner::TreePlanner`]).
//! - **[`service`]** — the request lifecycle state machine ([`service::Service`]).
//! - **[`aggregator`]** — the top-level owner of terminals, trunks, and services
//!   ([`aggregator::Aggregator`]).
//! - **[`stability`]** — the signal-stability predicate used to stop iterative
//!   pruning ([`stability::StabilityDetector`]).
//! - **[`config`]** — in-process tunables ([`config::AggregatorConfig`]).
//!
//! ## Usage
//!
//! ```
//! use meshplane::aggregator::Aggregator;
//! use meshplane::config::AggregatorConfig;
//! use meshplane::bandwidth::{BandwidthFunction, Flat, BandwidthRange};
//! use meshplane::topology::GlobalTerminal;
//!
//! let agg = Aggregator::new(AggregatorConfig::default());
//! let a = GlobalTerminal::new(1, 0);
//! let b = GlobalTerminal::new(2, 0);
//! let trunk = agg.add_trunk(a, b).unwrap();
//! trunk.provide(10.0, 10.0);
//! trunk.define_label_range(0, 1, 0).unwrap();
//! agg.rebuild_topology(&[]);
//!
//! let f = BandwidthFunction::Flat(Flat::new(2, BandwidthRange::new(1.0, Some(2.0))));
//! let plan = agg.plan(&[a, b], &f).unwrap();
//! assert_eq!(plan.labels.len(), 1);
//! ```

/// The top-level owner of terminals, trunks, and services.
pub mod aggregator;
/// The bandwidth-function algebra and its interval arithmetic.
pub mod bandwidth;
/// In-process tunables for an [`aggregator::Aggregator`].
pub mod config;
mod error;
/// The bit-packed set primitive endpoint partitions are expressed as.
pub mod goalset;
/// Tree selection and per-inferior delegation.
pub mod planner;
/// The request lifecycle state machine.
pub mod service;
/// The signal-stability predicate used to stop iterative pruning.
pub mod stability;
mod test;
/// The weighted edge graph the planner searches.
pub mod topology;
/// Capacitated, labelled edges between inferior-network terminals.
pub mod trunk;

pub use error::{Error, ErrorKind};
