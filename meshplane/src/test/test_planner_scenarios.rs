//! End-to-end planner scenarios over the shared fixture topology: three inferior
//! networks, two trunks, four endpoints.

use super::fixtures::{self, DEFAULT_STABILITY_PROFILES, N1_T0, N1_T1, N2_T0, N3_T0};
use crate::bandwidth::{BandwidthFunction, Flat, Matrix, Pair};
use crate::bandwidth::range::{BandwidthPair, BandwidthRange};
use crate::planner::{PlannerError, TreePlanner};

#[test]
fn flat_request_delegates_to_all_three_inferiors() {
    let (topology, endpoints) = fixtures::three_inferior_topology(10.0);
    let f = BandwidthFunction::Flat(Flat::new(4, BandwidthRange::new(1.0, Some(2.0))));
    let result = TreePlanner::plan(
        &topology,
        &endpoints,
        &f,
        1000,
        DEFAULT_STABILITY_PROFILES.clone(),
        0.5,
    )
    .unwrap();

    assert_eq!(result.labels.len(), 2, "two trunk edges cross the tree");
    let inferiors: Vec<_> = result.delegated.iter().map(|d| d.inferior).collect();
    assert_eq!(inferiors, vec![1, 2, 3]);

    let n1 = result.delegated.iter().find(|d| d.inferior == 1).unwrap();
    assert_eq!(n1.function.degree(), 2, "N1 contributes both of its terminals");
    let n2 = result.delegated.iter().find(|d| d.inferior == 2).unwrap();
    assert_eq!(n2.function.degree(), 1);
}

#[test]
fn matrix_request_reduces_consistently_per_inferior() {
    let (topology, endpoints) = fixtures::three_inferior_topology(10.0);
    let f = BandwidthFunction::Matrix(Matrix::uniform(4, BandwidthRange::new(0.5, Some(1.0))).unwrap());
    let result = TreePlanner::plan(
        &topology,
        &endpoints,
        &f,
        1000,
        DEFAULT_STABILITY_PROFILES.clone(),
        0.5,
    )
    .unwrap();
    assert_eq!(result.labels.len(), 2);
    for d in &result.delegated {
        assert!(d.function.degree() >= 1);
    }
}

#[test]
fn pair_request_respects_endpoint_order() {
    let (topology, endpoints) = fixtures::three_inferior_topology(10.0);
    let pairs = vec![
        BandwidthPair::new(BandwidthRange::exact(1.0), BandwidthRange::exact(1.0)),
        BandwidthPair::new(BandwidthRange::exact(1.0), BandwidthRange::exact(1.0)),
        BandwidthPair::new(BandwidthRange::exact(1.0), BandwidthRange::exact(1.0)),
        BandwidthPair::new(BandwidthRange::exact(1.0), BandwidthRange::exact(1.0)),
    ];
    let f = BandwidthFunction::Pair(Pair::new(pairs).unwrap());
    let result = TreePlanner::plan(
        &topology,
        &endpoints,
        &f,
        1000,
        DEFAULT_STABILITY_PROFILES.clone(),
        0.5,
    )
    .unwrap();
    assert_eq!(result.labels.len(), 2);
}

#[test]
fn undersized_trunk_is_pruned_out_of_the_tree() {
    let (topology, endpoints) = fixtures::three_inferior_topology(0.1);
    let f = BandwidthFunction::Flat(Flat::new(4, BandwidthRange::new(5.0, Some(5.0))));
    let err = TreePlanner::plan(
        &topology,
        &endpoints,
        &f,
        1000,
        DEFAULT_STABILITY_PROFILES.clone(),
        0.5,
    )
    .unwrap_err();
    assert!(matches!(err, PlannerError::NoTreeFound { .. }));
}

#[test]
fn fixture_endpoint_identifiers_are_stable_across_calls() {
    let (_, endpoints) = fixtures::three_inferior_topology(1.0);
    assert_eq!(endpoints, vec![*N1_T0, *N1_T1, *N2_T0, *N3_T0]);
}
