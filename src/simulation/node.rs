//! Per-node flood-and-reply protocol.
//!
//! Every activation of a node runs the same four phases:
//! 1) Completion check: the outbound flood is done once enough distinct nodes
//!    have acknowledged it.
//! 2) Dequeue the next payload when nothing is in flight.
//! 3) Transmit the in-flight message and retransmit every pending reply.
//! 4) Drain the inbox, relaying replies hop by hop along their recorded path
//!    and forwarding floods that arrived via the primary (most frequent) last
//!    hop.
//!
//! The node never talks to its peers directly. Everything goes through the
//! [`Medium`], and the only state another thread touches is the [`Inbox`].

use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::medium::{Inbox, Medium};
use super::message::{GroupId, Message, Outgoing};
use super::types::{NodeId, NodeSnapshot, NodeState, RadioProfile};

/// Result of one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Continue,
    /// The outbound flood collected its required acknowledgements during
    /// this activation.
    Completed,
}

/// A wireless sensor node.
pub struct Node {
    node_id: NodeId,
    profile: RadioProfile,
    power: f64,
    total_power: f64,
    cost_per_send: f64,
    state: NodeState,
    inbox: Arc<Inbox>,
    send_queue: VecDeque<Outgoing>,
    sending: Option<Message>,
    /// Originators that acknowledged `sending`.
    replied_nodes: HashSet<NodeId>,
    required_replies: usize,
    /// originator -> last hop -> arrivals
    route_counters: HashMap<NodeId, HashMap<NodeId, u64>>,
    /// Groups this node already produced its own reply for.
    acknowledged_groups: HashSet<GroupId>,
    /// (group, replying node) pairs this node already queued for relay.
    relayed_replies: HashSet<(GroupId, NodeId)>,
    /// Ordered so retransmission order is reproducible.
    pending_replies: BTreeMap<(GroupId, NodeId), Message>,
    received: u64,
    next_sequence: u32,
}

impl Node {
    /// Create a stopped node with a full battery.
    ///
    /// Negative power or cost are clamped to zero.
    pub fn new(node_id: NodeId, profile: RadioProfile, total_power: f64, cost_per_send: f64, inbox: Arc<Inbox>) -> Self {
        let total_power = total_power.max(0.0);
        Self {
            node_id,
            profile,
            power: total_power,
            total_power,
            cost_per_send: cost_per_send.max(0.0),
            state: NodeState::Stopped,
            inbox,
            send_queue: VecDeque::new(),
            sending: None,
            replied_nodes: HashSet::new(),
            required_replies: 0,
            route_counters: HashMap::new(),
            acknowledged_groups: HashSet::new(),
            relayed_replies: HashSet::new(),
            pending_replies: BTreeMap::new(),
            received: 0,
            next_sequence: 0,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn profile(&self) -> &RadioProfile {
        &self.profile
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn total_power(&self) -> f64 {
        self.total_power
    }

    pub fn cost_per_send(&self) -> f64 {
        self.cost_per_send
    }

    pub fn energy_consumed(&self) -> f64 {
        self.total_power - self.power
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == NodeState::Running
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    pub fn sending(&self) -> Option<&Message> {
        self.sending.as_ref()
    }

    pub fn replied_nodes(&self) -> &HashSet<NodeId> {
        &self.replied_nodes
    }

    pub fn required_replies(&self) -> usize {
        self.required_replies
    }

    /// Number of distinct acknowledging originators needed before the
    /// outbound flood counts as delivered.
    pub fn set_required_replies(&mut self, required_replies: usize) {
        self.required_replies = required_replies;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn pending_replies(&self) -> impl Iterator<Item = &Message> {
        self.pending_replies.values()
    }

    pub fn pending_reply(&self, group: GroupId, source: NodeId) -> Option<&Message> {
        self.pending_replies.get(&(group, source))
    }

    pub fn queued(&self) -> usize {
        self.send_queue.len()
    }

    /// Arrivals recorded from `origin` via `last_hop`.
    pub fn route_tally(&self, origin: NodeId, last_hop: NodeId) -> u64 {
        self.route_counters
            .get(&origin)
            .and_then(|hops| hops.get(&last_hop))
            .copied()
            .unwrap_or(0)
    }

    /// The last hop with the highest tally for `origin`; ties resolve to the
    /// lowest node id.
    pub fn primary_hop(&self, origin: NodeId) -> Option<NodeId> {
        self.route_counters
            .get(&origin)?
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(hop, _)| *hop)
    }

    /// Transmitting, queued to transmit, or holding replies.
    pub fn is_busy(&self) -> bool {
        self.sending.is_some() || !self.send_queue.is_empty() || !self.pending_replies.is_empty()
    }

    pub fn enqueue(&mut self, outgoing: impl Into<Outgoing>) {
        self.send_queue.push_back(outgoing.into());
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let busy = self.is_busy();
        NodeSnapshot {
            node_id: self.node_id,
            position: self.profile.position,
            radius: self.profile.radius,
            power: self.power,
            total_power: self.total_power,
            state: self.state,
            received: self.received,
            busy,
            status: NodeSnapshot::classify(self.state, busy, self.received),
        }
    }

    /// Enter the running state.
    ///
    /// A fresh start discards anything left in the inbox and resets the
    /// received counter. Returns `false` only for a dead node.
    pub fn start(&mut self) -> bool {
        match self.state {
            NodeState::Running => true,
            NodeState::Dead => {
                log::warn!("[{}] cannot start a node without power", self.node_id);
                false
            }
            NodeState::Stopped => {
                self.inbox.clear();
                self.received = 0;
                self.state = NodeState::Running;
                true
            }
        }
    }

    /// Leave the running state. Stopping a stopped or dead node is a no-op.
    pub fn stop(&mut self) -> bool {
        match self.state {
            NodeState::Running => {
                self.state = NodeState::Stopped;
                true
            }
            _ => {
                log::debug!("[{}] already stopped", self.node_id);
                true
            }
        }
    }

    /// Spend one transmission worth of power and broadcast `message`.
    ///
    /// Running out of power kills the node before anything is sent. Returns
    /// `false` if nothing was transmitted.
    pub fn transmit<R: Rng + ?Sized>(&mut self, medium: &Medium, rng: &mut R, message: &Message) -> bool {
        if self.state == NodeState::Dead {
            return false;
        }

        if self.power - self.cost_per_send < 0.0 {
            self.state = NodeState::Dead;
            log::warn!("[{}] out of power ({} left, {} per send), shutting down", self.node_id, self.power, self.cost_per_send);
            return false;
        }

        self.power -= self.cost_per_send;
        let delivered = medium.spread(&self.profile, message, rng);
        log::trace!("[{}] sent \"{}\" {:?} to {} receivers", self.node_id, message.payload(), message.path(), delivered);
        true
    }

    /// Run one activation of the protocol.
    ///
    /// Nodes that are not running do nothing.
    pub fn activate<R: Rng + ?Sized>(&mut self, medium: &Medium, rng: &mut R) -> Activation {
        if self.state != NodeState::Running {
            return Activation::Continue;
        }

        let mut outcome = Activation::Continue;

        // 1) completion check
        if let Some(sending) = &self.sending {
            if !sending.is_reply() && self.replied_nodes.len() >= self.required_replies {
                log::info!(
                    "[{}] group {} acknowledged by {} nodes",
                    self.node_id,
                    sending.group(),
                    self.replied_nodes.len()
                );
                self.sending = None;
                self.replied_nodes.clear();
                outcome = Activation::Completed;
            }
        }

        // 2) dequeue
        if self.sending.is_none() {
            if let Some(next) = self.send_queue.pop_front() {
                self.sending = Some(match next {
                    Outgoing::Payload(payload) => {
                        let group = GroupId::new(self.node_id, self.next_sequence);
                        self.next_sequence = self.next_sequence.wrapping_add(1);
                        Message::new(group, payload, self.node_id)
                    }
                    Outgoing::Message(message) => message,
                });
            }
        }

        // 3) transmit; once the node dies the remaining sends are no-ops
        if let Some(sending) = self.sending.clone() {
            self.transmit(medium, rng, &sending);
        }
        let replies: Vec<Message> = self.pending_replies.values().cloned().collect();
        for reply in &replies {
            self.transmit(medium, rng, reply);
        }

        // 4) ingest, including copies this node delivers to itself meanwhile.
        // A node that died above still drains its inbox this activation.
        while let Some(message) = self.inbox.pop() {
            if message.is_reply() {
                self.handle_reply(medium, rng, message);
            } else {
                self.handle_forward(medium, rng, message);
            }
        }

        outcome
    }

    /// Relay a reply one hop back toward its destination.
    fn handle_reply<R: Rng + ?Sized>(&mut self, medium: &Medium, rng: &mut R, mut message: Message) {
        let key = (message.group(), message.source());

        // a shorter path supersedes what we were retransmitting
        if let Some(stored) = self.pending_replies.get(&key) {
            if stored.path().len() > message.path().len() {
                log::debug!(
                    "[{}] reply {} from {} superseded by shorter path {:?}",
                    self.node_id,
                    key.0,
                    key.1,
                    message.path()
                );
                self.pending_replies.remove(&key);
            }
        }

        if message.next_hop() != Some(self.node_id) {
            return;
        }

        message.consume_next_hop();
        self.transmit(medium, rng, &message);

        if let Some(sending) = &self.sending {
            if !sending.is_reply() && sending.group() == message.group() {
                if self.replied_nodes.insert(message.source()) {
                    log::debug!("[{}] acknowledged by {} for group {}", self.node_id, message.source(), message.group());
                }
                return;
            }
        }

        if self.relayed_replies.insert(key) {
            self.pending_replies.insert(key, message);
        }
    }

    /// Forward a flood that arrived via the primary path and queue this
    /// node's own reply.
    fn handle_forward<R: Rng + ?Sized>(&mut self, medium: &Medium, rng: &mut R, mut message: Message) {
        if message.handled_by(self.node_id) {
            return;
        }

        self.received += 1;
        log::debug!("[{}] received \"{}\" {:?}", self.node_id, message.payload(), message.path());

        let hops = self.route_counters.entry(message.source()).or_default();
        let tally = {
            let count = hops.entry(message.last_hop()).or_insert(0);
            *count += 1;
            *count
        };
        let best = hops.values().copied().max().unwrap_or(0);
        if tally != best {
            return;
        }

        message.register(self.node_id);
        self.transmit(medium, rng, &message);

        let group = message.group();
        if self.acknowledged_groups.insert(group) {
            let reply = message.into_reply();
            self.pending_replies.insert((group, reply.source()), reply);
        }
    }
}
