//! Error types for the simulator.
//!
//! Configuration problems are fatal before any node starts. A node running
//! out of power is a lifecycle transition observed through the survival rate,
//! not an error.

use thiserror::Error;

use crate::simulation::types::NodeId;

/// Errors raised while setting up or running a simulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The same parameterized termination condition was supplied twice with
    /// different values.
    #[error("conflicting values for termination condition `{condition}`: {first} and {second}")]
    ConfigurationConflict {
        condition: &'static str,
        first: String,
        second: String,
    },

    /// A termination condition name the evaluator does not know.
    #[error("unsupported termination condition `{0}`")]
    UnsupportedCondition(String),

    /// A termination condition with an out-of-range parameter.
    #[error("invalid termination condition: {0}")]
    InvalidCondition(String),

    /// Random placement parameters that cannot form a radius distribution.
    #[error("invalid placement parameters: {0}")]
    InvalidPlacement(String),

    /// The observer or at least one node failed to enter the running state.
    #[error("failed to start {0}")]
    StartFailure(String),

    /// The user interrupted a run that has no user-driven termination condition.
    #[error("run interrupted by user")]
    Interrupted,

    #[error("node {0} not found")]
    NodeNotFound(NodeId),
}
