//! The bandwidth-function algebra (component C) and its supporting arithmetic
//! (component B).

/// `BandwidthFunction` and its concrete representations.
pub mod function;
/// `BandwidthRange` and `BandwidthPair` interval arithmetic.
pub mod range;
/// Serialisation/parsing for `Scripted` bandwidth functions.
pub mod script;

pub use function::{BandwidthError, BandwidthFunction, Flat, Matrix, Pair, Reduced, Scripted, Tabulated};
pub use range::{BandwidthPair, BandwidthRange};
