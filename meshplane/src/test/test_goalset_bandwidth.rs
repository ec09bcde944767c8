//! Cross-module checks that the goal-set algebra and the bandwidth-function algebra
//! agree with each other: complement swaps forward/reverse, and reduction commutes
//! with direct evaluation regardless of which concrete function is reduced.

use crate::bandwidth::{BandwidthFunction, BandwidthPair, BandwidthRange, Flat, Matrix, Pair};
use crate::goalset::GoalSet;

#[test]
fn get_pair_matches_get_of_complement_for_every_function_shape() {
    let degree = 4;
    let flat = BandwidthFunction::Flat(Flat::new(degree, BandwidthRange::new(1.0, Some(3.0))));
    let matrix = BandwidthFunction::Matrix(
        Matrix::uniform(degree, BandwidthRange::new(0.5, Some(2.0))).unwrap(),
    );
    let pairs = (0..degree)
        .map(|i| BandwidthPair::new(BandwidthRange::exact(i as f64 + 1.0), BandwidthRange::exact(i as f64 + 2.0)))
        .collect();
    let pair = BandwidthFunction::Pair(Pair::new(pairs).unwrap());

    for f in [flat, matrix, pair] {
        for s in GoalSet::all_valid_sets(degree) {
            let (forward, reverse) = f.get_pair(&s).unwrap();
            assert_eq!(forward, f.get(&s).unwrap());
            assert_eq!(reverse, f.get(&s.complement()).unwrap());
        }
    }
}

#[test]
fn reducing_by_singletons_is_the_identity_across_shapes() {
    let degree = 4;
    let singletons: Vec<GoalSet> =
        (0..degree).map(|i| GoalSet::from_indices(degree, vec![i]).unwrap()).collect();

    let flat = BandwidthFunction::Flat(Flat::new(degree, BandwidthRange::new(2.0, None)));
    let reduced = flat.reduce(singletons.clone()).unwrap();
    for s in GoalSet::all_valid_sets(degree) {
        assert_eq!(flat.get(&s).unwrap(), reduced.get(&s).unwrap());
    }

    let matrix = BandwidthFunction::Matrix(
        Matrix::uniform(degree, BandwidthRange::new(1.0, Some(4.0))).unwrap(),
    );
    let reduced = matrix.reduce(singletons).unwrap();
    for s in GoalSet::all_valid_sets(degree) {
        assert_eq!(matrix.get(&s).unwrap(), reduced.get(&s).unwrap());
    }
}

#[test]
fn merging_two_groups_sums_the_cut_under_a_matrix_function() {
    // Merging endpoints 0 and 1 into one group should make the reduced function's
    // evaluation on {group01} equal the original matrix function's cut between {0,1}
    // and the rest, since a matrix function sums per-directed-pair cells across the
    // cut regardless of how the remaining endpoints are grouped.
    let degree = 4;
    let cell = BandwidthRange::new(1.0, Some(1.0));
    let matrix = BandwidthFunction::Matrix(Matrix::uniform(degree, cell).unwrap());
    let group01 = GoalSet::from_indices(degree, vec![0, 1]).unwrap();
    let group2 = GoalSet::from_indices(degree, vec![2]).unwrap();
    let group3 = GoalSet::from_indices(degree, vec![3]).unwrap();
    let reduced = matrix.reduce(vec![group01.clone(), group2, group3]).unwrap();

    let reduced_s = GoalSet::from_indices(3, vec![0]).unwrap();
    let direct = matrix.get(&group01).unwrap();
    assert_eq!(reduced.get(&reduced_s).unwrap(), direct);
}
