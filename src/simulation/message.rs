//! Messages exchanged between nodes.
//!
//! A single record type covers every kind of traffic: a fresh flood, a
//! forwarded copy and a reply travelling back along the recorded path. The
//! protocol distinguishes them only by `is_reply` and the contents of `path`.

use serde::Serialize;
use std::fmt;

use super::types::NodeId;

/// Correlates a flood with every forward and reply derived from it.
///
/// Built from the originating node and that node's own sequence counter, so
/// identifiers are unique within a network and identical across repeated
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId {
    pub origin: NodeId,
    pub sequence: u32,
}

impl GroupId {
    pub fn new(origin: NodeId, sequence: u32) -> Self {
        Self { origin, sequence }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.sequence)
    }
}

/// A message copy in flight.
///
/// `path` is never empty: index 0 is the node that created this copy (the
/// flood originator for forwards, the replying node for replies) and the last
/// entry is the most recent hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    group: GroupId,
    is_reply: bool,
    payload: String,
    path: Vec<NodeId>,
}

impl Message {
    /// A fresh forward message originating at `origin`.
    pub fn new(group: GroupId, payload: impl Into<String>, origin: NodeId) -> Self {
        Self {
            group,
            is_reply: false,
            payload: payload.into(),
            path: vec![origin],
        }
    }

    /// Rebuild a message from its parts. Returns `None` for an empty path.
    pub fn from_parts(group: GroupId, is_reply: bool, payload: impl Into<String>, path: Vec<NodeId>) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        Some(Self {
            group,
            is_reply,
            payload: payload.into(),
            path,
        })
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn is_reply(&self) -> bool {
        self.is_reply
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    /// The node that created this copy (`path[0]`).
    pub fn source(&self) -> NodeId {
        self.path[0]
    }

    /// The most recent hop (`path[-1]`).
    pub fn last_hop(&self) -> NodeId {
        self.path[self.path.len() - 1]
    }

    /// The hop a reply is addressed to (`path[1]`), if any.
    pub fn next_hop(&self) -> Option<NodeId> {
        self.path.get(1).copied()
    }

    pub fn handled_by(&self, node_id: NodeId) -> bool {
        self.path.contains(&node_id)
    }

    /// Record `node_id` as the latest handler.
    pub fn register(&mut self, node_id: NodeId) {
        self.path.push(node_id);
    }

    /// Remove `path[1]`, moving a reply one hop closer to its destination.
    ///
    /// Returns the removed hop, or `None` (leaving the path untouched) when
    /// the path has fewer than two entries.
    pub fn consume_next_hop(&mut self) -> Option<NodeId> {
        if self.path.len() < 2 {
            return None;
        }
        Some(self.path.remove(1))
    }

    /// Turn an accepted forward into a reply heading back along its path.
    pub fn into_reply(mut self) -> Self {
        self.is_reply = true;
        self.path.reverse();
        self
    }
}

/// An entry of a node's send queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Raw payload, wrapped into a fresh flood when dequeued.
    Payload(String),
    /// A pre-built message, sent as is.
    Message(Message),
}

impl From<String> for Outgoing {
    fn from(payload: String) -> Self {
        Outgoing::Payload(payload)
    }
}

impl From<&str> for Outgoing {
    fn from(payload: &str) -> Self {
        Outgoing::Payload(payload.to_string())
    }
}

impl From<Message> for Outgoing {
    fn from(message: Message) -> Self {
        Outgoing::Message(message)
    }
}
