//! Error types for the pattern engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned to callers of the run controller
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pattern graph cannot be run
    #[error("Invalid pattern: {}", join_validation_errors(.0))]
    InvalidGraph(Vec<ValidationError>),

    /// `start` was called while a run is in progress
    #[error("A run is already active")]
    RunActive,

    /// Speed factor outside the supported set
    #[error("Unsupported speed factor {0}; expected 0.5, 1 or 2")]
    InvalidSpeed(f64),

    /// Runs need a tokio runtime to drive their timers
    #[error("No async runtime available to drive the run")]
    NoRuntime,

    /// Pattern lookup failed
    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run-level failure, reported in the run outcome
///
/// These are the only errors a learner sees, so messages name nodes by
/// their label.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunError {
    /// A node failed and none of its edges lead to a failure handler
    #[error("{label} failed and no failure handler is connected: {reason}")]
    #[serde(rename_all = "camelCase")]
    UnhandledFailure {
        node_id: String,
        label: String,
        reason: String,
    },

    /// Traversal ran out of edges before any output node completed
    #[error("The run ended without reaching an output node")]
    NoOutputReached,

    /// The pattern has no input node to start from
    #[error("The pattern has no input node")]
    MissingInput,

    /// Too many node activations (runaway cycle)
    #[error("Stopped after {limit} node activations")]
    IterationLimit { limit: u32 },

    /// An edge points at a node missing from the pattern
    #[error("An edge leads to a node that is not part of this pattern")]
    #[serde(rename_all = "camelCase")]
    UnknownNode { node_id: String },
}

/// Failure of a single simulated work unit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// The router could not pick a route
    #[error("no suitable route found")]
    RouteRejected,

    /// Failure forced by an override
    #[error("forced failure")]
    Forced,

    /// The simulator itself broke down
    #[error("simulator error: {0}")]
    Internal(String),
}

impl SimulationError {
    /// Create an internal simulator error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
