//! Capacitated, labelled edges between two inferior-network terminals.

use crate::error::ErrorKind;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised by [`Trunk`] operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrunkError {
    /// `define_label_range` was given a range that overlaps an already-defined label
    /// on either side.
    #[error("label range already defined on this trunk")]
    LabelRangeAlreadyDefined,
    /// A revoke/allocate operation referenced a label that isn't defined.
    #[error("label {0} is not defined on this trunk")]
    LabelNotDefined(u32),
    /// A revoke targeted a label that is currently in use by a circuit.
    #[error("label {0} is in use and cannot be revoked")]
    LabelInUse(u32),
    /// `withdraw` would deduct more bandwidth than is currently available.
    #[error("cannot withdraw {requested} from available {available}")]
    CapacityExhausted {
        /// Bandwidth requested for withdrawal
        requested: f64,
        /// Bandwidth actually available
        available: f64,
    },
    /// No free label pair remains to assign to a new circuit.
    #[error("no free label available on this trunk")]
    NoFreeLabel,
    /// The trunk has been decommissioned and cannot accept new circuits.
    #[error("trunk is decommissioned")]
    Decommissioned,
}

impl TrunkError {
    /// Map this error into its coarse, caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrunkError::LabelRangeAlreadyDefined => ErrorKind::Conflict,
            TrunkError::LabelNotDefined(_) => ErrorKind::NotFound,
            TrunkError::LabelInUse(_) => ErrorKind::Conflict,
            TrunkError::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            TrunkError::NoFreeLabel => ErrorKind::CapacityExhausted,
            TrunkError::Decommissioned => ErrorKind::InvalidState,
        }
    }
}

/// A pair of labels bound together by a trunk's mapping, in the order they were
/// defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LabelBinding {
    a: u32,
    b: u32,
}

#[derive(Debug)]
struct TrunkData {
    delay: f64,
    capacity_a_to_b: f64,
    capacity_b_to_a: f64,
    bindings: Vec<LabelBinding>,
    a_labels: BTreeSet<u32>,
    b_labels: BTreeSet<u32>,
    a_in_use: HashSet<u32>,
    b_in_use: HashSet<u32>,
    commissioned: bool,
}

impl TrunkData {
    fn new() -> Self {
        TrunkData {
            delay: 0.0,
            capacity_a_to_b: 0.0,
            capacity_b_to_a: 0.0,
            bindings: Vec::new(),
            a_labels: BTreeSet::new(),
            b_labels: BTreeSet::new(),
            a_in_use: HashSet::new(),
            b_in_use: HashSet::new(),
            commissioned: true,
        }
    }
}

/// A trunk between two inferior-network terminals, `a` and `b`.
///
/// A [`Trunk`] value is a handle (an `Arc<Mutex<..>>` plus a `reversed` flag) rather
/// than an owner of unique storage; [`Trunk::reverse`] flips the flag instead of
/// allocating a delegating wrapper, so `t.reverse().reverse()` observes exactly the
/// same state as `t` without ever constructing a cyclic reference.
#[derive(Debug, Clone)]
pub struct Trunk {
    inner: Arc<Mutex<TrunkData>>,
    reversed: bool,
}

impl Trunk {
    /// A new trunk between two terminals, with zero capacity and no labels defined.
    pub fn new() -> Self {
        Trunk { inner: Arc::new(Mutex::new(TrunkData::new())), reversed: false }
    }

    /// A view of this trunk with `a` and `b` swapped: capacities, label sides, and
    /// the label mapping direction are all transposed. Reversing twice yields a view
    /// observationally identical to the original.
    pub fn reverse(&self) -> Trunk {
        Trunk { inner: self.inner.clone(), reversed: !self.reversed }
    }

    /// Whether this handle refers to the same underlying trunk as `other`
    /// (regardless of reversal).
    pub fn same_trunk(&self, other: &Trunk) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrunkData> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Propagation delay.
    pub fn delay(&self) -> f64 {
        self.lock().delay
    }

    /// Set the propagation delay.
    pub fn set_delay(&self, delay: f64) {
        self.lock().delay = delay.max(0.0);
    }

    /// Capacity available from `a` to `b` (from this view's perspective).
    pub fn upstream_capacity(&self) -> f64 {
        let data = self.lock();
        if self.reversed {
            data.capacity_b_to_a
        } else {
            data.capacity_a_to_b
        }
    }

    /// Capacity available from `b` to `a` (from this view's perspective).
    pub fn downstream_capacity(&self) -> f64 {
        let data = self.lock();
        if self.reversed {
            data.capacity_a_to_b
        } else {
            data.capacity_b_to_a
        }
    }

    /// Add capacity in both directions.
    pub fn provide(&self, up: f64, down: f64) {
        let mut data = self.lock();
        let (u, d) = if self.reversed { (down, up) } else { (up, down) };
        data.capacity_a_to_b += u.max(0.0);
        data.capacity_b_to_a += d.max(0.0);
    }

    /// Remove capacity in both directions. Fails without mutating anything if either
    /// deduction would exceed what's available.
    pub fn withdraw(&self, up: f64, down: f64) -> Result<(), TrunkError> {
        let mut data = self.lock();
        let (u, d) = if self.reversed { (down, up) } else { (up, down) };
        if u > data.capacity_a_to_b {
            return Err(TrunkError::CapacityExhausted { requested: u, available: data.capacity_a_to_b });
        }
        if d > data.capacity_b_to_a {
            return Err(TrunkError::CapacityExhausted { requested: d, available: data.capacity_b_to_a });
        }
        data.capacity_a_to_b -= u;
        data.capacity_b_to_a -= d;
        Ok(())
    }

    /// Labels currently defined on the `start` (local, `a`) side of this view.
    pub fn start_labels(&self) -> BTreeSet<u32> {
        let data = self.lock();
        if self.reversed { data.b_labels.clone() } else { data.a_labels.clone() }
    }

    /// Labels currently defined on the `end` (remote, `b`) side of this view.
    pub fn end_labels(&self) -> BTreeSet<u32> {
        let data = self.lock();
        if self.reversed { data.a_labels.clone() } else { data.b_labels.clone() }
    }

    /// Labels on the start side currently bound to an active circuit.
    pub fn start_labels_in_use(&self) -> HashSet<u32> {
        let data = self.lock();
        if self.reversed { data.b_in_use.clone() } else { data.a_in_use.clone() }
    }

    /// Whether new circuits may be assigned to this trunk.
    pub fn is_commissioned(&self) -> bool {
        self.lock().commissioned
    }

    /// Prevent new circuits from being assigned, without affecting any already
    /// established.
    pub fn decommission(&self) {
        self.lock().commissioned = false;
    }

    /// Allow new circuits to be assigned again.
    pub fn recommission(&self) {
        self.lock().commissioned = true;
    }

    /// Allocate `count` consecutive labels on both sides, starting at `start_base` on
    /// the start side and `end_base` on the end side, bound together in definition
    /// order. Fails if any label in either range is already defined on its side.
    pub fn define_label_range(
        &self,
        start_base: u32,
        count: u32,
        end_base: u32,
    ) -> Result<(), TrunkError> {
        let mut data = self.lock();
        let (a_base, b_base) = if self.reversed { (end_base, start_base) } else { (start_base, end_base) };
        for i in 0..count {
            if data.a_labels.contains(&(a_base + i)) || data.b_labels.contains(&(b_base + i)) {
                return Err(TrunkError::LabelRangeAlreadyDefined);
            }
        }
        for i in 0..count {
            let a = a_base + i;
            let b = b_base + i;
            data.a_labels.insert(a);
            data.b_labels.insert(b);
            data.bindings.push(LabelBinding { a, b });
        }
        Ok(())
    }

    fn revoke_range(
        &self,
        base: u32,
        count: u32,
        side_is_start: bool,
    ) -> Result<(), TrunkError> {
        let mut data = self.lock();
        let revoke_a_side = side_is_start != self.reversed;
        for i in 0..count {
            let label = base + i;
            let in_use = if revoke_a_side { data.a_in_use.contains(&label) } else { data.b_in_use.contains(&label) };
            if in_use {
                return Err(TrunkError::LabelInUse(label));
            }
            let defined = if revoke_a_side { data.a_labels.contains(&label) } else { data.b_labels.contains(&label) };
            if !defined {
                return Err(TrunkError::LabelNotDefined(label));
            }
        }
        for i in 0..count {
            let label = base + i;
            if revoke_a_side {
                data.a_labels.remove(&label);
                data.bindings.retain(|b| b.a != label);
            } else {
                data.b_labels.remove(&label);
                data.bindings.retain(|b| b.b != label);
            }
        }
        Ok(())
    }

    /// Revoke `count` labels starting at `start_base` on the start side. Fails if any
    /// are in use.
    pub fn revoke_start_label_range(&self, start_base: u32, count: u32) -> Result<(), TrunkError> {
        self.revoke_range(start_base, count, true)
    }

    /// Revoke `count` labels starting at `end_base` on the end side. Fails if any are
    /// in use.
    pub fn revoke_end_label_range(&self, end_base: u32, count: u32) -> Result<(), TrunkError> {
        self.revoke_range(end_base, count, false)
    }

    /// Allocate the next free `(start_label, end_label)` pair for a new circuit,
    /// marking both labels in use. Fails if the trunk is decommissioned or no free
    /// label pair remains.
    pub fn allocate_label(&self) -> Result<(u32, u32), TrunkError> {
        let mut data = self.lock();
        if !data.commissioned {
            return Err(TrunkError::Decommissioned);
        }
        let binding = data
            .bindings
            .iter()
            .find(|b| !data.a_in_use.contains(&b.a) && !data.b_in_use.contains(&b.b))
            .copied()
            .ok_or(TrunkError::NoFreeLabel)?;
        data.a_in_use.insert(binding.a);
        data.b_in_use.insert(binding.b);
        if self.reversed {
            Ok((binding.b, binding.a))
        } else {
            Ok((binding.a, binding.b))
        }
    }

    /// Release a previously allocated start-side label back to the free pool.
    pub fn release_label(&self, start_label: u32) {
        let mut data = self.lock();
        if self.reversed {
            data.b_in_use.remove(&start_label);
        } else {
            data.a_in_use.remove(&start_label);
        }
    }
}

impl Default for Trunk {
    fn default() -> Self {
        Trunk::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn define_then_revoke_is_identity() {
        let t = Trunk::new();
        let before = (t.start_labels(), t.end_labels());
        t.define_label_range(10, 3, 100).unwrap();
        t.revoke_start_label_range(10, 3).unwrap();
        // end side labels are independent of start-side revocation by design: revoke
        // only removes the side it targets.
        t.revoke_end_label_range(100, 3).unwrap();
        assert_eq!((t.start_labels(), t.end_labels()), before);
    }

    #[test]
    fn provide_then_withdraw_is_identity() {
        let t = Trunk::new();
        let before = (t.upstream_capacity(), t.downstream_capacity());
        t.provide(5.0, 7.0);
        t.withdraw(5.0, 7.0).unwrap();
        assert_eq!((t.upstream_capacity(), t.downstream_capacity()), before);
    }

    #[test]
    fn withdraw_beyond_available_fails_without_mutating() {
        let t = Trunk::new();
        t.provide(5.0, 5.0);
        let before = (t.upstream_capacity(), t.downstream_capacity());
        assert!(t.withdraw(10.0, 0.0).is_err());
        assert_eq!((t.upstream_capacity(), t.downstream_capacity()), before);
    }

    #[test]
    fn revoke_in_use_label_fails() {
        let t = Trunk::new();
        t.define_label_range(0, 1, 0).unwrap();
        let (start, _end) = t.allocate_label().unwrap();
        assert!(t.revoke_start_label_range(start, 1).is_err());
        t.release_label(start);
        assert!(t.revoke_start_label_range(start, 1).is_ok());
    }

    #[test]
    fn reverse_swaps_sides_and_is_its_own_inverse() {
        let t = Trunk::new();
        t.provide(10.0, 20.0);
        t.define_label_range(0, 2, 100).unwrap();
        let r = t.reverse();
        assert_eq!(r.upstream_capacity(), t.downstream_capacity());
        assert_eq!(r.downstream_capacity(), t.upstream_capacity());
        assert_eq!(r.start_labels(), t.end_labels());
        let rr = r.reverse();
        assert_eq!(rr.upstream_capacity(), t.upstream_capacity());
        assert_eq!(rr.start_labels(), t.start_labels());
        assert!(rr.same_trunk(&t));
    }

    #[test]
    fn decommission_blocks_new_labels_not_existing_ones() {
        let t = Trunk::new();
        t.define_label_range(0, 1, 0).unwrap();
        t.decommission();
        assert!(t.allocate_label().is_err());
        t.recommission();
        assert!(t.allocate_label().is_ok());
    }
}
