//! The shared radio medium.
//!
//! Nodes transmit into the medium and the medium decides, per receiver, whether
//! the copy arrives. Delivery appends to the receiver's [`Inbox`], which may be
//! drained concurrently by the receiver's own thread, so every inbox is a
//! lock-protected deque.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;

use super::geometry::distance2;
use super::message::Message;
use super::signal_calculations::reachability;
use super::types::{NodeId, RadioProfile};

/// A node's receive queue. FIFO per receiver.
#[derive(Debug, Default)]
pub struct Inbox {
    queue: Mutex<VecDeque<Message>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        self.queue.lock().push_back(message);
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

/// A receiver as seen by the medium.
struct Endpoint {
    node_id: NodeId,
    profile: RadioProfile,
    inbox: Arc<Inbox>,
}

/// Probabilistic broadcast medium.
///
/// Holds no simulation state of its own beyond the table of attached
/// receivers. The table is only written while building or reshaping the
/// network; transmissions take the read lock.
#[derive(Default)]
pub struct Medium {
    endpoints: RwLock<Vec<Endpoint>>,
}

impl Medium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver. Attaching an id twice replaces the earlier entry.
    pub fn attach(&self, node_id: NodeId, profile: RadioProfile, inbox: Arc<Inbox>) {
        let mut endpoints = self.endpoints.write();
        endpoints.retain(|endpoint| endpoint.node_id != node_id);
        endpoints.push(Endpoint { node_id, profile, inbox });
    }

    /// Remove a receiver. Returns `false` if it was not attached.
    pub fn detach(&self, node_id: NodeId) -> bool {
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|endpoint| endpoint.node_id != node_id);
        endpoints.len() != before
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Broadcast `message` from a node with the given radio profile.
    ///
    /// Every attached receiver, the sender included, gets an independent
    /// Bernoulli trial with the link probability; receivers with zero
    /// probability are skipped without consuming a random draw. Returns the
    /// number of copies delivered.
    pub fn spread<R: Rng + ?Sized>(&self, source: &RadioProfile, message: &Message, rng: &mut R) -> usize {
        let endpoints = self.endpoints.read();
        let mut delivered = 0;

        for endpoint in endpoints.iter() {
            let d2 = distance2(&source.position, &endpoint.profile.position);
            let p = reachability(d2, source.radius, endpoint.profile.radius);

            if p <= 0.0 {
                continue;
            }

            if rng.gen_bool(p) {
                endpoint.inbox.push(message.clone());
                delivered += 1;
            }
        }

        delivered
    }
}
