//! Reusable fixture identifiers for planner and aggregator tests: three inferior
//! networks joined by two trunks.
//!
//! Trunks carry mutable interior state (capacity, in-use labels), so the topology
//! itself is rebuilt fresh by [`three_inferior_topology`] on every call rather than
//! shared as a `lazy_static` value; only the fixed endpoint identifiers and default
//! tunables are shared statics.

use crate::stability::StabilityProfile;
use crate::topology::{GlobalTerminal, InferiorEdges, Topology, TrunkEdge};
use crate::trunk::Trunk;
use lazy_static::lazy_static;

lazy_static! {
    /// N1's two terminals.
    pub static ref N1_T0: GlobalTerminal = GlobalTerminal::new(1, 0);
    pub static ref N1_T1: GlobalTerminal = GlobalTerminal::new(1, 1);
    /// N2's sole terminal, trunked to N1.
    pub static ref N2_T0: GlobalTerminal = GlobalTerminal::new(2, 0);
    /// N3's sole terminal, trunked to N1.
    pub static ref N3_T0: GlobalTerminal = GlobalTerminal::new(3, 0);
    /// A stability profile loose enough to converge in a handful of passes.
    pub static ref DEFAULT_STABILITY_PROFILES: Vec<StabilityProfile> =
        vec![StabilityProfile::new(0.5, 1)];
}

/// Three inferior networks joined by two trunks: N1 (terminals 0 and 1, internally
/// connected), trunked to N2 at N1's terminal 1, and to N3 at N1's terminal 1 as well
/// (so N1's terminal 1 is the hub both trunks attach to). Both trunks are provisioned
/// with `capacity` units each way and have one label pair predefined.
pub fn three_inferior_topology(capacity: f64) -> (Topology, Vec<GlobalTerminal>) {
    let n1 = InferiorEdges { inferior: 1, edges: vec![(0, 1, 1.0)] };

    let to_n2 = Trunk::new();
    to_n2.provide(capacity, capacity);
    to_n2.define_label_range(0, 4, 0).expect("fresh trunk accepts its label range");

    let to_n3 = Trunk::new();
    to_n3.provide(capacity, capacity);
    to_n3.define_label_range(0, 4, 0).expect("fresh trunk accepts its label range");

    let trunks = vec![
        TrunkEdge { a: *N1_T1, b: *N2_T0, trunk: to_n2 },
        TrunkEdge { a: *N1_T1, b: *N3_T0, trunk: to_n3 },
    ];

    let topology = Topology::build(&[n1], &trunks);
    let endpoints = vec![*N1_T0, *N1_T1, *N2_T0, *N3_T0];
    (topology, endpoints)
}
