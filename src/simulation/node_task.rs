//! Per-node worker threads for the concurrent discipline.
//!
//! Each worker owns nothing but a handle to its node and loops:
//! - Checks its stop request and exits once set
//! - Exits on its own when the node has died
//! - Runs one activation under the node lock
//! - Raises the shared termination signal when the outbound flood completed
//! - Sleeps for the configured interval
//!
//! Workers are stopped cooperatively. A worker that is mid-activation when the
//! stop request arrives finishes that activation first.

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::medium::Medium;
use super::node::{Activation, Node};
use super::types::{NodeId, NodeState, SharedFlag};

/// Poll granularity while waiting for a worker to exit.
const STOP_POLL: Duration = Duration::from_millis(5);

/// Handle to a running node thread.
pub struct NodeWorker {
    node_id: NodeId,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NodeWorker {
    /// Spawn a worker thread named `node-<id>`.
    ///
    /// # Parameters
    ///
    /// * `node` - The node to drive; shared with the network and the observer
    /// * `medium` - Where transmissions go
    /// * `signal` - Raised when the node completes its outbound flood
    /// * `interval` - Pause between activations
    pub fn spawn(node: Arc<Mutex<Node>>, medium: Arc<Medium>, signal: SharedFlag, interval: Duration) -> io::Result<Self> {
        let node_id = node.lock().node_id();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_requested = stop.clone();

        let handle = thread::Builder::new().name(format!("node-{node_id}")).spawn(move || {
            let mut rng = StdRng::from_entropy();
            log::debug!("[{node_id}] worker started");

            loop {
                if stop_requested.load(Ordering::Acquire) {
                    break;
                }

                {
                    let mut node = node.lock();
                    if node.state() == NodeState::Dead {
                        log::debug!("[{node_id}] worker exiting, node is dead");
                        break;
                    }
                    if node.activate(&medium, &mut rng) == Activation::Completed {
                        signal.raise();
                    }
                }

                if !interval.is_zero() {
                    thread::sleep(interval);
                } else {
                    thread::yield_now();
                }
            }

            log::debug!("[{node_id}] worker stopped");
        })?;

        Ok(Self {
            node_id,
            stop,
            handle: Some(handle),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Whether the thread has exited (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Post the stop request without waiting.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Ask the worker to exit.
    ///
    /// With `None` the request is only posted and `true` is returned at once.
    /// Otherwise waits up to `timeout` for the thread to exit and returns
    /// whether it did.
    pub fn stop(&self, timeout: Option<Duration>) -> bool {
        self.request_stop();

        let Some(timeout) = timeout else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("[{}] worker did not stop within {:?}", self.node_id, timeout);
                return false;
            }
            thread::sleep(STOP_POLL);
        }
        true
    }

    /// Wait for the thread to exit. Also posts the stop request.
    pub fn join(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[{}] worker panicked", self.node_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::medium::Inbox;
    use crate::simulation::types::{Point, RadioProfile};

    fn running_node(node_id: NodeId, power: f64) -> (Arc<Mutex<Node>>, Arc<Medium>) {
        let medium = Arc::new(Medium::new());
        let inbox = Arc::new(Inbox::new());
        let profile = RadioProfile {
            position: Point::new(0.0, 0.0),
            radius: 0.0,
        };
        medium.attach(node_id, profile, inbox.clone());
        let mut node = Node::new(node_id, profile, power, 1.0, inbox);
        node.start();
        (Arc::new(Mutex::new(node)), medium)
    }

    #[test]
    fn worker_raises_signal_on_completion() {
        let (node, medium) = running_node(1, 10.0);
        node.lock().enqueue("hello");
        let signal = SharedFlag::new();

        let worker = NodeWorker::spawn(node.clone(), medium, signal.clone(), Duration::from_millis(1)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !signal.is_raised() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(worker.stop(Some(Duration::from_secs(5))));
        worker.join();
        assert!(signal.is_raised());
        assert_eq!(node.lock().energy_consumed(), 1.0);
    }

    #[test]
    fn worker_exits_when_node_dies() {
        let (node, medium) = running_node(2, 0.5);
        {
            let mut node = node.lock();
            node.set_required_replies(1);
            node.enqueue("hello");
        }

        let worker = NodeWorker::spawn(node.clone(), medium, SharedFlag::new(), Duration::ZERO).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(worker.is_finished());
        assert_eq!(node.lock().state(), NodeState::Dead);
        worker.join();
    }

    #[test]
    fn posted_request_lets_sleeping_worker_exit() {
        let (node, medium) = running_node(4, 10.0);
        let worker = NodeWorker::spawn(node, medium, SharedFlag::new(), Duration::from_millis(100)).unwrap();
        worker.request_stop();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.is_finished());
        assert!(worker.stop(Some(Duration::ZERO)));
        worker.join();
    }

    #[test]
    fn stop_without_timeout_only_posts_the_request() {
        let (node, medium) = running_node(3, 10.0);
        let worker = NodeWorker::spawn(node, medium, SharedFlag::new(), Duration::from_millis(1)).unwrap();
        assert!(worker.stop(None));
        worker.join();
    }
}
