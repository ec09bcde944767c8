//! Module containing all error types

use thiserror::Error;

/// Coarse-grained classification of an [`Error`], stable across crate-internal
/// restructuring. External adapters (REST/SSH, out of scope in this crate) map these
/// onto wire error tags instead of matching on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Out-of-range index, degree mismatch, malformed segment
    InvalidArgument,
    /// Operation not allowed in the current state
    InvalidState,
    /// Network, terminal, trunk, service, or circuit not found
    NotFound,
    /// Terminal/label busy, handle reused
    Conflict,
    /// Bandwidth or labels insufficient for planning
    CapacityExhausted,
    /// A child service reported failure
    InferiorFailure,
    /// Caller lacks authorization (external only)
    Unauthorized,
    /// Caller lacks the required privilege (external only)
    Unprivileged,
    /// Bug or invariant violation
    Internal,
}

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Error propagated from [`crate::goalset`]
    #[error("goal set error: {0}")]
    GoalSet(#[from] crate::goalset::GoalSetError),
    /// Error propagated from [`crate::bandwidth`]
    #[error("bandwidth function error: {0}")]
    Bandwidth(#[from] crate::bandwidth::BandwidthError),
    /// Error propagated from [`crate::trunk`]
    #[error("trunk error: {0}")]
    Trunk(#[from] crate::trunk::TrunkError),
    /// Error propagated from [`crate::planner`]
    #[error("planner error: {0}")]
    Planner(#[from] crate::planner::PlannerError),
    /// Error propagated from [`crate::service`]
    #[error("service error: {0}")]
    Service(#[from] crate::service::ServiceError),
    /// Error propagated from [`crate::aggregator`]
    #[error("aggregator error: {0}")]
    Aggregator(#[from] crate::aggregator::AggregatorError),
}

impl Error {
    /// Map this error into its coarse, caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::GoalSet(e) => e.kind(),
            Error::Bandwidth(e) => e.kind(),
            Error::Trunk(e) => e.kind(),
            Error::Planner(e) => e.kind(),
            Error::Service(e) => e.kind(),
            Error::Aggregator(e) => e.kind(),
        }
    }
}
