//! Interval arithmetic over bandwidth quantities.

use std::fmt;

/// A bandwidth interval `(min, max)`. `min` is a finite non-negative real; `max` is
/// optional, with `None` denoting unbounded. The invariant `min <= max` (when `max` is
/// bounded) is enforced at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthRange {
    min: f64,
    max: Option<f64>,
}

impl BandwidthRange {
    /// Build a range, clamping `max` up to `min` if it was given smaller.
    pub fn new(min: f64, max: Option<f64>) -> Self {
        let min = min.max(0.0);
        let max = max.map(|m| m.max(min));
        BandwidthRange { min, max }
    }

    /// A bounded range with identical min and max.
    pub fn exact(value: f64) -> Self {
        BandwidthRange::new(value, Some(value))
    }

    /// An unbounded range `[min, infinity)`.
    pub fn at_least(min: f64) -> Self {
        BandwidthRange::new(min, None)
    }

    /// The additive identity, `(0, 0)`.
    pub fn zero() -> Self {
        BandwidthRange::new(0.0, Some(0.0))
    }

    /// The minimum of the range.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// The maximum of the range, or `None` if unbounded.
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Componentwise addition; an unbounded operand makes the sum unbounded.
    pub fn add(&self, other: &BandwidthRange) -> BandwidthRange {
        let min = self.min + other.min;
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        BandwidthRange { min, max }
    }

    /// Elementwise minimum: minimum of the two mins, and minimum of the two maxes
    /// where both are bounded, else whichever is bounded, else unbounded.
    pub fn min_with(&self, other: &BandwidthRange) -> BandwidthRange {
        let min = self.min.min(other.min);
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        BandwidthRange { min, max }
    }
}

impl Default for BandwidthRange {
    fn default() -> Self {
        BandwidthRange::zero()
    }
}

impl fmt::Display for BandwidthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "({}, {})", self.min, max),
            None => write!(f, "({}, inf)", self.min),
        }
    }
}

/// Traffic into and out of a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthPair {
    /// Bandwidth flowing into the endpoint.
    pub ingress: BandwidthRange,
    /// Bandwidth flowing out of the endpoint.
    pub egress: BandwidthRange,
}

impl BandwidthPair {
    /// Build a pair from its ingress and egress ranges.
    pub fn new(ingress: BandwidthRange, egress: BandwidthRange) -> Self {
        BandwidthPair { ingress, egress }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn add_is_commutative_and_associative() {
        let a = BandwidthRange::new(1.0, Some(3.0));
        let b = BandwidthRange::new(2.0, Some(4.0));
        let c = BandwidthRange::new(0.5, None);
        assert_eq!(a.add(&b), b.add(&a));
        let lhs = a.add(&b).add(&c);
        let rhs = a.add(&b.add(&c));
        assert_approx_eq!(lhs.min(), rhs.min());
        assert_eq!(lhs.max(), rhs.max());
    }

    #[test]
    fn zero_is_identity() {
        let a = BandwidthRange::new(2.0, Some(5.0));
        assert_eq!(a.add(&BandwidthRange::zero()), a);
    }

    #[test]
    fn min_idempotent_and_commutative() {
        let a = BandwidthRange::new(2.0, Some(5.0));
        let b = BandwidthRange::new(1.0, None);
        assert_eq!(a.min_with(&a), a);
        assert_eq!(a.min_with(&b), b.min_with(&a));
    }

    #[test]
    fn unbounded_saturates_add() {
        let a = BandwidthRange::new(1.0, None);
        let b = BandwidthRange::new(2.0, Some(3.0));
        assert_eq!(a.add(&b).max(), None);
    }
}
