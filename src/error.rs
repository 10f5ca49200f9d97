//! Error type shared by the engine and its collaborators.

use thiserror::Error;

use crate::arg::NodeId;
use crate::cfa::{EdgeId, LocationId};

/// Errors raised while running an analysis.
///
/// Infeasible edges are *not* errors: a transfer relation reports them with an
/// empty successor set. Resource exhaustion is not an error either, it is a
/// regular [`AlgorithmStatus`][crate::algorithm::AlgorithmStatus].
#[derive(Debug, Error)]
pub enum CpaError {
    #[error("abstract state does not carry a program location")]
    MissingLocation,

    #[error("location {0} is not part of the program graph")]
    UnknownLocation(LocationId),

    #[error("transfer relation failed on edge {edge}: {message}")]
    Transfer { edge: EdgeId, message: String },

    #[error("feasibility check failed: {0}")]
    Feasibility(String),

    #[error("expected {expected} interpolants for a path with {expected} locations, got {actual}")]
    InterpolantCount { expected: usize, actual: usize },

    #[error("ARG node {0} does not exist or was removed")]
    NodeNotFound(NodeId),

    #[error("cannot extract a path from {0}: parent chain does not reach the root")]
    MalformedPath(NodeId),

    #[error("counterexample path is empty")]
    EmptyPath,

    #[error("reached set is empty, nothing to analyze")]
    EmptyReachedSet,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = CpaError> = std::result::Result<T, E>;
