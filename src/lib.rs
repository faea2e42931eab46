//! Wireless sensor network flood-and-reply simulator.
//!
//! Nodes with limited power and a probabilistic radio range flood a message
//! through the network, pick a single primary return path out of many
//! redundant arrivals and relay acknowledgements back to the originator.

pub mod common;
pub mod error;
pub mod simulation;

pub use error::SimulationError;
