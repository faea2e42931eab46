//! Type definitions shared across the simulation.
//!
//! Contains the small value types used by every component:
//! - Node identifiers, positions and radio profiles
//! - Node lifecycle state and the read-only snapshot handed to observers
//! - The shared flag used for node-driven termination and user interrupts

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stable node identity. Assigned by the network starting at 1.
pub type NodeId = u32;

/// Simple 2D point in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Where a node sits and how far it can talk.
///
/// Both values are fixed for the lifetime of a node, so the medium keeps its
/// own copy and never has to lock a node to compute reachability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadioProfile {
    pub position: Point,
    /// Transmit radius in world units.
    pub radius: f64,
}

/// Node lifecycle.
///
/// `Dead` is terminal: a node that ran out of power never transmits again and
/// cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Stopped,
    Running,
    Dead,
}

/// Display classification of a node, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Out of power.
    Dead,
    /// Has an outbound message, queued payloads or replies to retransmit.
    Sending,
    /// Received at least one forward message.
    Received,
    /// Alive and idle.
    Alive,
}

/// Read-only view of one node, taken once per cycle or poll interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub position: Point,
    pub radius: f64,
    pub power: f64,
    pub total_power: f64,
    pub state: NodeState,
    /// Number of forward messages accepted past self-loop suppression.
    pub received: u64,
    /// Currently transmitting, queued to transmit, or holding replies.
    pub busy: bool,
    pub status: NodeStatus,
}

impl NodeSnapshot {
    pub(crate) fn classify(state: NodeState, busy: bool, received: u64) -> NodeStatus {
        if state == NodeState::Dead {
            NodeStatus::Dead
        } else if busy {
            NodeStatus::Sending
        } else if received > 0 {
            NodeStatus::Received
        } else {
            NodeStatus::Alive
        }
    }
}

/// One observer frame: every node's snapshot at a given cycle or poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub sequence: u64,
    pub nodes: Vec<NodeSnapshot>,
}

/// A set-once flag shared between threads.
///
/// Used for the node-driven termination signal (set by node threads, read by
/// the scheduler, cleared only at run start) and for user interrupts.
#[derive(Debug, Clone, Default)]
pub struct SharedFlag(Arc<AtomicBool>);

impl SharedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_priority_prefers_dead_then_sending() {
        assert_eq!(NodeSnapshot::classify(NodeState::Dead, true, 3), NodeStatus::Dead);
        assert_eq!(NodeSnapshot::classify(NodeState::Running, true, 3), NodeStatus::Sending);
        assert_eq!(NodeSnapshot::classify(NodeState::Running, false, 3), NodeStatus::Received);
        assert_eq!(NodeSnapshot::classify(NodeState::Stopped, false, 0), NodeStatus::Alive);
    }

    #[test]
    fn shared_flag_is_visible_through_clones() {
        let flag = SharedFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());
        flag.raise();
        assert!(other.is_raised());
        other.clear();
        assert!(!flag.is_raised());
    }
}
