//! The bandwidth-function algebra: a self-describing, composable map from every
//! non-trivial endpoint partition to a [`BandwidthRange`].

use crate::bandwidth::range::{BandwidthPair, BandwidthRange};
use crate::bandwidth::script::{self, ScriptAst, ScriptError};
use crate::error::ErrorKind;
use crate::goalset::{GoalSet, GoalSetError};
use thiserror::Error;

/// Errors raised while constructing or evaluating a [`BandwidthFunction`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BandwidthError {
    /// The goal set passed to `get`/`get_pair` is invalid for this function's degree.
    #[error("goal set error: {0}")]
    GoalSet(#[from] GoalSetError),
    /// A reduction's groups left a base-degree bit unassigned to any group twice.
    #[error("group {0} in a reduction overlaps a previous group")]
    OverlappingGroups(usize),
    /// A reduction was given more groups than the base degree allows.
    #[error("reduction has {given} groups but the base degree is only {base_degree}")]
    TooManyGroups {
        /// Number of groups supplied
        given: usize,
        /// Degree of the base function
        base_degree: usize,
    },
    /// A `Matrix` function was built with the wrong number of cells.
    #[error("matrix of degree {degree} needs {expected} cells, got {got}")]
    MatrixCellCount {
        /// Declared degree
        degree: usize,
        /// Required cell count, `degree * (degree - 1)`
        expected: usize,
        /// Cells actually supplied
        got: usize,
    },
    /// A `Pair` function was built with zero endpoints.
    #[error("pair function needs at least one endpoint")]
    EmptyPair,
    /// Failed to parse a script.
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

impl BandwidthError {
    /// Map this error into its coarse, caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BandwidthError::GoalSet(e) => e.kind(),
            BandwidthError::OverlappingGroups(_) => ErrorKind::InvalidArgument,
            BandwidthError::TooManyGroups { .. } => ErrorKind::InvalidArgument,
            BandwidthError::MatrixCellCount { .. } => ErrorKind::InvalidArgument,
            BandwidthError::EmptyPair => ErrorKind::InvalidArgument,
            BandwidthError::Script(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// A constant range for every edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Flat {
    degree: usize,
    range: BandwidthRange,
}

impl Flat {
    /// Build a flat function of the given degree.
    pub fn new(degree: usize, range: BandwidthRange) -> Self {
        Flat { degree, range }
    }
}

/// Per-endpoint ingress/egress traffic, combined as
/// `f(S) = min(sum ingress in S, sum egress outside S)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pairs: Vec<BandwidthPair>,
}

impl Pair {
    /// Build a pair function, one [`BandwidthPair`] per endpoint, ordered by index.
    pub fn new(pairs: Vec<BandwidthPair>) -> Result<Self, BandwidthError> {
        if pairs.is_empty() {
            return Err(BandwidthError::EmptyPair);
        }
        Ok(Pair { pairs })
    }
}

/// `degree * (degree - 1)` cells of [`BandwidthRange`], indexed by `(from, to)` with
/// `from != to`. `f(S) = sum_{i in S, j not in S} cell(i, j)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    degree: usize,
    cells: Vec<BandwidthRange>,
}

impl Matrix {
    /// Cell index for `(from, to)`, `from != to`, within a `degree * (degree - 1)`
    /// table (row-major, zero-indexed against the endpoint ordering).
    fn cell_index(degree: usize, from: usize, to: usize) -> usize {
        let to_compact = if to < from { to } else { to - 1 };
        from * (degree - 1) + to_compact
    }

    /// Build a matrix function from `degree * (degree - 1)` cells in `(from, to)`
    /// row-major order, `to` skipping `from`.
    pub fn new(degree: usize, cells: Vec<BandwidthRange>) -> Result<Self, BandwidthError> {
        let expected = degree.saturating_mul(degree.saturating_sub(1));
        if cells.len() != expected {
            return Err(BandwidthError::MatrixCellCount { degree, expected, got: cells.len() });
        }
        Ok(Matrix { degree, cells })
    }

    /// Build a matrix function where every cell has the same range.
    pub fn uniform(degree: usize, range: BandwidthRange) -> Result<Self, BandwidthError> {
        let expected = degree.saturating_mul(degree.saturating_sub(1));
        Self::new(degree, vec![range; expected])
    }

    /// The cell for `(from, to)`, `from != to`.
    pub fn cell(&self, from: usize, to: usize) -> BandwidthRange {
        self.cells[Self::cell_index(self.degree, from, to)]
    }
}

/// Wraps a base function and projects it onto coarser endpoint groupings.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    base: Box<BandwidthFunction>,
    /// `groups[i]` is the base-degree set backing reduced index `i`. Always
    /// partitions the base domain: overlap is rejected at construction, and a gap is
    /// closed by an implicit appended complement group.
    groups: Vec<GoalSet>,
}

impl Reduced {
    /// Wrap `base` with an ordered list of disjoint groups over its degree. If the
    /// groups don't cover the whole base domain, the remainder is appended as a final
    /// group. Fails if any base-degree bit is claimed by two groups.
    pub fn new(base: BandwidthFunction, groups: Vec<GoalSet>) -> Result<Self, BandwidthError> {
        let base_degree = base.degree();
        if groups.len() > base_degree {
            return Err(BandwidthError::TooManyGroups { given: groups.len(), base_degree });
        }
        let mut seen = GoalSet::empty(base_degree);
        for (i, g) in groups.iter().enumerate() {
            let overlap = seen.intersection(g).map_err(BandwidthError::GoalSet)?;
            if !overlap.is_empty() {
                return Err(BandwidthError::OverlappingGroups(i));
            }
            seen = seen.union(g).map_err(BandwidthError::GoalSet)?;
        }
        let mut groups = groups;
        if seen.len() < base_degree {
            let remainder = GoalSet::universe(base_degree)
                .difference(&seen)
                .map_err(BandwidthError::GoalSet)?;
            groups.push(remainder);
        }
        Ok(Reduced { base: Box::new(base), groups })
    }

    /// Project a reduced-degree set onto the base degree by unioning the groups it
    /// selects.
    fn lift(&self, s: &GoalSet) -> Result<GoalSet, BandwidthError> {
        let base_degree = self.base.degree();
        let mut acc = GoalSet::empty(base_degree);
        for (i, group) in self.groups.iter().enumerate() {
            if s.contains(i).map_err(BandwidthError::GoalSet)? {
                acc = acc.union(group).map_err(BandwidthError::GoalSet)?;
            }
        }
        Ok(acc)
    }
}

/// Materialises every valid input into a lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct Tabulated {
    degree: usize,
    table: Vec<BandwidthRange>,
}

impl Tabulated {
    fn index_of(s: &GoalSet) -> usize {
        let words = s.to_words();
        let bits = words.first().copied().unwrap_or(0) as u128
            | (words.get(1).copied().unwrap_or(0) as u128) << 64;
        (bits - 1) as usize
    }
}

/// A function parsed from a received script; holds an AST and evaluates it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Scripted {
    degree: usize,
    ast: ScriptAst,
}

impl Scripted {
    /// Parse a script into a [`Scripted`] function.
    pub fn parse(text: &str) -> Result<Self, BandwidthError> {
        let (degree, ast) = script::parse(text).map_err(BandwidthError::Script)?;
        Ok(Scripted { degree, ast })
    }
}

/// The count of non-trivial subsets for a given degree, i.e. `2^degree - 2`, saturating
/// to `None` if it would overflow what this crate is willing to enumerate.
pub fn non_trivial_count(degree: usize) -> Option<u128> {
    if degree == 0 || degree >= 127 {
        return None;
    }
    Some((1u128 << degree) - 2)
}

/// A bandwidth-function algebra value: a deterministic, self-describing map from
/// non-trivial endpoint partitions to [`BandwidthRange`]s.
///
/// Represented as a tagged union of concrete representations rather than a trait
/// object, so that reduction and tabulation can pattern-match and specialise instead
/// of relying on dynamic dispatch or reflection.
#[derive(Debug, Clone, PartialEq)]
pub enum BandwidthFunction {
    /// See [`Flat`].
    Flat(Flat),
    /// See [`Pair`].
    Pair(Pair),
    /// See [`Matrix`].
    Matrix(Matrix),
    /// See [`Reduced`].
    Reduced(Reduced),
    /// See [`Tabulated`].
    Tabulated(Tabulated),
    /// See [`Scripted`].
    Scripted(Scripted),
}

impl BandwidthFunction {
    /// This function's degree.
    pub fn degree(&self) -> usize {
        match self {
            BandwidthFunction::Flat(f) => f.degree,
            BandwidthFunction::Pair(p) => p.pairs.len(),
            BandwidthFunction::Matrix(m) => m.degree,
            BandwidthFunction::Reduced(r) => r.groups.len(),
            BandwidthFunction::Tabulated(t) => t.degree,
            BandwidthFunction::Scripted(s) => s.degree,
        }
    }

    /// Evaluate this function on a non-trivial subset `s`.
    pub fn get(&self, s: &GoalSet) -> Result<BandwidthRange, BandwidthError> {
        s.require_valid_partition().map_err(BandwidthError::GoalSet)?;
        match self {
            BandwidthFunction::Flat(f) => Ok(f.range),
            BandwidthFunction::Pair(p) => {
                let mut ingress_in = BandwidthRange::zero();
                let mut egress_out = BandwidthRange::zero();
                for (i, pair) in p.pairs.iter().enumerate() {
                    if s.contains(i).map_err(BandwidthError::GoalSet)? {
                        ingress_in = ingress_in.add(&pair.ingress);
                    } else {
                        egress_out = egress_out.add(&pair.egress);
                    }
                }
                Ok(ingress_in.min_with(&egress_out))
            }
            BandwidthFunction::Matrix(m) => {
                let mut total = BandwidthRange::zero();
                for from in s.iter() {
                    for to in s.complement().iter() {
                        total = total.add(&m.cell(from, to));
                    }
                }
                Ok(total)
            }
            BandwidthFunction::Reduced(r) => {
                let lifted = r.lift(s)?;
                r.base.get(&lifted)
            }
            BandwidthFunction::Tabulated(t) => {
                let idx = Tabulated::index_of(s);
                t.table.get(idx).copied().ok_or_else(|| {
                    BandwidthError::Script(ScriptError::UnexpectedToken {
                        line: 0,
                        content: "table index out of range".into(),
                    })
                })
            }
            BandwidthFunction::Scripted(sc) => {
                script::eval(sc.degree, &sc.ast, s).map_err(BandwidthError::Script)
            }
        }
    }

    /// Evaluate the forward (`get(s)`) and reverse (`get(not s)`) ranges together. The
    /// `Pair` variant computes both in a single pass over its endpoints.
    pub fn get_pair(&self, s: &GoalSet) -> Result<(BandwidthRange, BandwidthRange), BandwidthError> {
        s.require_valid_partition().map_err(BandwidthError::GoalSet)?;
        if let BandwidthFunction::Pair(p) = self {
            let mut ingress_in = BandwidthRange::zero();
            let mut egress_out = BandwidthRange::zero();
            let mut ingress_out = BandwidthRange::zero();
            let mut egress_in = BandwidthRange::zero();
            for (i, pair) in p.pairs.iter().enumerate() {
                if s.contains(i).map_err(BandwidthError::GoalSet)? {
                    ingress_in = ingress_in.add(&pair.ingress);
                    egress_in = egress_in.add(&pair.egress);
                } else {
                    ingress_out = ingress_out.add(&pair.ingress);
                    egress_out = egress_out.add(&pair.egress);
                }
            }
            let forward = ingress_in.min_with(&egress_out);
            let reverse = ingress_out.min_with(&egress_in);
            return Ok((forward, reverse));
        }
        let forward = self.get(s)?;
        let reverse = self.get(&s.complement())?;
        Ok((forward, reverse))
    }

    /// Emit a self-contained script that re-implements this function's `get`
    /// semantics.
    pub fn as_script(&self) -> String {
        script::serialize(self.degree(), &self.to_ast())
    }

    fn to_ast(&self) -> ScriptAst {
        match self {
            BandwidthFunction::Flat(f) => ScriptAst::Flat(f.range),
            BandwidthFunction::Pair(p) => ScriptAst::Pair(p.pairs.clone()),
            BandwidthFunction::Matrix(m) => {
                let mut cells = Vec::with_capacity(m.cells.len());
                for from in 0..m.degree {
                    for to in 0..m.degree {
                        if from != to {
                            cells.push(((from, to), m.cell(from, to)));
                        }
                    }
                }
                ScriptAst::Matrix(cells)
            }
            BandwidthFunction::Tabulated(t) => ScriptAst::Table(t.table.clone()),
            BandwidthFunction::Scripted(sc) => sc.ast.clone(),
            BandwidthFunction::Reduced(r) => ScriptAst::Reduced {
                groups: r.groups.clone(),
                base_degree: r.base.degree(),
                base: Box::new(r.base.to_ast()),
            },
        }
    }

    /// Project this function onto coarser endpoint groupings. `groups` is an ordered
    /// list of disjoint sets over this function's degree; if they don't cover the
    /// whole domain the remainder is appended as a final group. Fails if any bit is
    /// claimed by two groups.
    pub fn reduce(&self, groups: Vec<GoalSet>) -> Result<BandwidthFunction, BandwidthError> {
        Ok(BandwidthFunction::Reduced(Reduced::new(self.clone(), groups)?))
    }

    /// If `2^degree - 2` is at or below `threshold`, return a dense table-backed
    /// equivalent of this function; otherwise return a clone of `self`.
    pub fn tabulate(&self, threshold: usize) -> Result<BandwidthFunction, BandwidthError> {
        let degree = self.degree();
        let count = match non_trivial_count(degree) {
            Some(c) if c <= threshold as u128 => c as usize,
            _ => return Ok(self.clone()),
        };
        let mut table = Vec::with_capacity(count);
        for s in GoalSet::all_valid_sets(degree) {
            table.push(self.get(&s)?);
        }
        Ok(BandwidthFunction::Tabulated(Tabulated { degree, table }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matrix_scenario() {
        let cell = BandwidthRange::new(1.0, Some(2.0));
        let m = Matrix::uniform(3, cell).unwrap();
        let f = BandwidthFunction::Matrix(m);
        let expected = BandwidthRange::new(2.0, Some(4.0));
        let s0 = GoalSet::from_indices(3, vec![0]).unwrap();
        assert_eq!(f.get(&s0).unwrap(), expected, "cell(0,1) + cell(0,2)");
        let s01 = GoalSet::from_indices(3, vec![0, 1]).unwrap();
        assert_eq!(f.get(&s01).unwrap(), expected, "cell(0,2) + cell(1,2)");
    }

    #[test]
    fn matrix_reduce_preserves_singleton_group() {
        let cell = BandwidthRange::new(1.0, Some(2.0));
        let m = Matrix::uniform(3, cell).unwrap();
        let f = BandwidthFunction::Matrix(m);
        let g0 = GoalSet::from_indices(3, vec![0]).unwrap();
        let g12 = GoalSet::from_indices(3, vec![1, 2]).unwrap();
        let reduced = f.reduce(vec![g0.clone(), g12]).unwrap();
        let s0 = GoalSet::from_indices(2, vec![0]).unwrap();
        let expected = f.get(&g0).unwrap();
        assert_eq!(reduced.get(&s0).unwrap(), expected);
    }

    #[test]
    fn pair_scenario() {
        let pairs = vec![
            BandwidthPair::new(BandwidthRange::exact(4.0), BandwidthRange::exact(1.0)),
            BandwidthPair::new(BandwidthRange::exact(2.0), BandwidthRange::exact(2.0)),
            BandwidthPair::new(BandwidthRange::exact(3.0), BandwidthRange::exact(5.0)),
            BandwidthPair::new(BandwidthRange::exact(5.0), BandwidthRange::exact(2.0)),
        ];
        let f = BandwidthFunction::Pair(Pair::new(pairs).unwrap());
        let s = GoalSet::from_indices(4, vec![0, 1]).unwrap();
        assert_eq!(f.get(&s).unwrap(), BandwidthRange::exact(6.0));
    }

    #[test]
    fn tabulate_agrees_with_source() {
        let f = BandwidthFunction::Flat(Flat::new(4, BandwidthRange::new(1.0, Some(2.0))));
        let tabulated = f.tabulate(1000).unwrap();
        for s in GoalSet::all_valid_sets(4) {
            assert_eq!(f.get(&s).unwrap(), tabulated.get(&s).unwrap());
        }
    }

    #[test]
    fn reduce_identity_singletons_matches_source() {
        let f = BandwidthFunction::Flat(Flat::new(3, BandwidthRange::new(1.0, Some(2.0))));
        let groups: Vec<GoalSet> =
            (0..3).map(|i| GoalSet::from_indices(3, vec![i]).unwrap()).collect();
        let reduced = f.reduce(groups).unwrap();
        for s in GoalSet::all_valid_sets(3) {
            assert_eq!(f.get(&s).unwrap(), reduced.get(&s).unwrap());
        }
    }

    #[test]
    fn reduce_rejects_overlap() {
        let f = BandwidthFunction::Flat(Flat::new(3, BandwidthRange::zero()));
        let a = GoalSet::from_indices(3, vec![0, 1]).unwrap();
        let b = GoalSet::from_indices(3, vec![1, 2]).unwrap();
        assert!(matches!(
            f.reduce(vec![a, b]),
            Err(BandwidthError::OverlappingGroups(_))
        ));
    }

    #[test]
    fn script_roundtrip_matrix() {
        let m = Matrix::uniform(3, BandwidthRange::new(1.0, Some(2.0))).unwrap();
        let f = BandwidthFunction::Matrix(m);
        let text = f.as_script();
        let scripted = BandwidthFunction::Scripted(Scripted::parse(&text).unwrap());
        for s in GoalSet::all_valid_sets(3) {
            assert_eq!(f.get(&s).unwrap(), scripted.get(&s).unwrap());
        }
    }
}
