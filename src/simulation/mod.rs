//! Network simulation core module.
//!
//! This module provides the complete simulation infrastructure for a wireless
//! sensor network running a flood-and-reply protocol. It integrates:
//! - A probabilistic broadcast medium shared by every node
//! - The per-node protocol state machine with power-gated transmission
//! - A cooperative (single thread) and a concurrent (thread per node) driver
//! - Composable termination conditions
//! - Read-only observers fed with per-cycle frames
//!
//! ## Module Organization
//!
//! - `types`: Core value types (ids, positions, snapshots, frames, flags)
//! - `geometry`: Distance helpers
//! - `signal_calculations`: Link probability and radius sampling
//! - `message`: The message record and send queue entries
//! - `medium`: Inboxes and probabilistic delivery
//! - `node`: The protocol state machine
//! - `node_task`: Per-node worker threads
//! - `network`: Node collection, identities and bulk lifecycle
//! - `termination`: Conditions, plans and census rates
//! - `scheduler`: The run driver
//! - `observer`: Frame consumers
//!
//! ## Public API
//!
//! Build a [`Network`] (randomly with [`build_network`] or from a scene), give
//! the source node a payload, then hand it to a [`Scheduler`] together with an
//! [`Observer`].

pub mod geometry;
pub mod medium;
pub mod message;
pub mod network;
pub mod node;
pub mod node_task;
pub mod observer;
pub mod scheduler;
pub mod signal_calculations;
pub mod termination;
pub mod types;

pub use message::{GroupId, Message, Outgoing};
pub use network::{Network, PlacementParameters, build_network};
pub use node::{Activation, Node};
pub use observer::{FrameRecorder, NullObserver, Observer};
pub use scheduler::{Interrupt, RunReport, RunSettings, Scheduler};
pub use termination::{Discipline, TerminationCondition, TerminationReason};
pub use types::{Frame, NodeId, NodeSnapshot, NodeState, NodeStatus, Point};
