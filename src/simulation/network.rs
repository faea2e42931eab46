//! The network aggregate: node collection, identity assignment and bulk
//! lifecycle operations.
//!
//! Nodes live behind `Arc<Mutex<_>>` so the same handle can be driven by the
//! cooperative scheduler, by a node worker thread, or read by the observer.
//! The medium is shared by every node and only ever locked for its endpoint
//! table.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SimulationError;

use super::geometry::point_in_area;
use super::medium::{Inbox, Medium};
use super::node::{Activation, Node};
use super::node_task::NodeWorker;
use super::signal_calculations::{radius_distribution, sample_radius};
use super::termination::Census;
use super::types::{Frame, NodeId, NodeSnapshot, NodeState, Point, RadioProfile, SharedFlag};

struct NodeSlot {
    node: Arc<Mutex<Node>>,
    worker: Option<NodeWorker>,
}

/// Read-only view over every node, safe to move to another thread.
#[derive(Clone)]
pub struct NetworkProbe {
    nodes: Vec<Arc<Mutex<Node>>>,
}

impl NetworkProbe {
    pub fn frame(&self, sequence: u64) -> Frame {
        Frame {
            sequence,
            nodes: self.nodes.iter().map(|node| node.lock().snapshot()).collect(),
        }
    }

    pub fn census(&self) -> Census {
        census_of(&self.nodes)
    }
}

fn census_of(nodes: &[Arc<Mutex<Node>>]) -> Census {
    let mut census = Census {
        node_count: nodes.len(),
        ..Census::default()
    };
    for node in nodes {
        let node = node.lock();
        if node.received() > 0 {
            census.received += 1;
        }
        if node.state() == NodeState::Running {
            census.alive += 1;
        }
    }
    census
}

/// A set of nodes sharing one medium.
pub struct Network {
    medium: Arc<Medium>,
    slots: Vec<NodeSlot>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            medium: Arc::new(Medium::new()),
            slots: Vec::new(),
        }
    }

    pub fn medium(&self) -> &Arc<Medium> {
        &self.medium
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add a stopped node and attach it to the medium.
    ///
    /// Identities start at 1; a new node gets the last node's id plus one.
    pub fn add_node(&mut self, position: Point, radius: f64, power: f64, cost_per_send: f64) -> NodeId {
        let node_id = self.slots.last().map_or(1, |slot| slot.node.lock().node_id() + 1);
        let profile = RadioProfile { position, radius };
        let inbox = Arc::new(Inbox::new());

        self.medium.attach(node_id, profile, inbox.clone());
        let node = Node::new(node_id, profile, power, cost_per_send, inbox);
        self.slots.push(NodeSlot {
            node: Arc::new(Mutex::new(node)),
            worker: None,
        });

        log::debug!("[{node_id}] added at ({:.2}, {:.2}), radius {:.2}", position.x, position.y, radius);
        node_id
    }

    /// Remove a node, stopping its worker and detaching it from the medium.
    ///
    /// Returns the node's final snapshot.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<NodeSnapshot, SimulationError> {
        let index = self.index_of(node_id).ok_or(SimulationError::NodeNotFound(node_id))?;
        let slot = self.slots.remove(index);

        if let Some(worker) = slot.worker {
            worker.join();
        }
        self.medium.detach(node_id);

        let mut node = slot.node.lock();
        node.stop();
        Ok(node.snapshot())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.slots.iter().map(|slot| slot.node.lock().node_id()).collect()
    }

    /// Positions of the nodes whose snapshot passes `filter`.
    pub fn positions<F>(&self, filter: F) -> Vec<(NodeId, Point)>
    where
        F: Fn(&NodeSnapshot) -> bool,
    {
        self.slots
            .iter()
            .map(|slot| slot.node.lock().snapshot())
            .filter(|snapshot| filter(snapshot))
            .map(|snapshot| (snapshot.node_id, snapshot.position))
            .collect()
    }

    /// Run `f` against the node with the given id.
    pub fn with_node<T>(&self, node_id: NodeId, f: impl FnOnce(&mut Node) -> T) -> Result<T, SimulationError> {
        let index = self.index_of(node_id).ok_or(SimulationError::NodeNotFound(node_id))?;
        let mut node = self.slots[index].node.lock();
        Ok(f(&mut node))
    }

    fn index_of(&self, node_id: NodeId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.node.lock().node_id() == node_id)
    }

    /// Move every node into the running state.
    ///
    /// Visits every node even after a failure; returns `true` only if all
    /// nodes started.
    pub fn start_all(&mut self) -> bool {
        let mut ok = true;
        for slot in &self.slots {
            ok &= slot.node.lock().start();
        }
        ok
    }

    /// Start every node and give each its own worker thread.
    ///
    /// Nodes are started before any thread is spawned, so a node that cannot
    /// start aborts the run without any thread having touched the medium.
    pub fn spawn_all(&mut self, signal: &SharedFlag, interval: Duration) -> Result<(), SimulationError> {
        let mut failed = Vec::new();
        for slot in &self.slots {
            let mut node = slot.node.lock();
            if !node.start() {
                failed.push(node.node_id());
            }
        }
        if !failed.is_empty() {
            return Err(SimulationError::StartFailure(format!("nodes {failed:?}")));
        }

        for slot in &mut self.slots {
            let worker = NodeWorker::spawn(slot.node.clone(), self.medium.clone(), signal.clone(), interval)
                .map_err(|e| SimulationError::StartFailure(format!("node thread: {e}")))?;
            slot.worker = Some(worker);
        }

        log::info!("spawned {} node threads", self.slots.len());
        Ok(())
    }

    /// Stop every node.
    ///
    /// Every node thread is asked to exit before any of them is waited for.
    /// With a `timeout` each thread is then waited for up to that long; a
    /// thread that does not exit in time makes the result `false`. Visits
    /// every node regardless.
    pub fn stop_all(&mut self, timeout: Option<Duration>) -> bool {
        for worker in self.slots.iter().filter_map(|slot| slot.worker.as_ref()) {
            worker.request_stop();
        }

        let mut ok = true;
        for slot in &self.slots {
            if let Some(worker) = &slot.worker {
                ok &= worker.stop(timeout);
            }
            ok &= slot.node.lock().stop();
        }
        ok
    }

    /// Wait for every node thread to exit.
    pub fn join_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(worker) = slot.worker.take() {
                worker.join();
            }
        }
    }

    /// Run one activation of the node at `index`.
    pub fn activate<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Activation {
        match self.slots.get(index) {
            Some(slot) => slot.node.lock().activate(&self.medium, rng),
            None => Activation::Continue,
        }
    }

    pub fn total_energy_consumed(&self) -> f64 {
        self.slots.iter().map(|slot| slot.node.lock().energy_consumed()).sum()
    }

    pub fn census(&self) -> Census {
        let nodes: Vec<_> = self.slots.iter().map(|slot| slot.node.clone()).collect();
        census_of(&nodes)
    }

    pub fn frame(&self, sequence: u64) -> Frame {
        self.probe().frame(sequence)
    }

    pub fn probe(&self) -> NetworkProbe {
        NetworkProbe {
            nodes: self.slots.iter().map(|slot| slot.node.clone()).collect(),
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if self.slots.iter().any(|slot| slot.worker.is_some()) {
            self.stop_all(None);
            self.join_all();
        }
    }
}

/// Parameters for random node placement.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementParameters {
    pub width: f64,
    pub height: f64,
    pub count: i64,
    pub radius_mean: f64,
    pub radius_std_dev: f64,
    pub initial_power: f64,
    pub cost_per_send: f64,
}

/// Place `count` nodes uniformly in `[0,width] x [0,height]`.
///
/// Radii are `|Normal(radius_mean, radius_std_dev)|`. Negative counts, powers,
/// costs, extents and standard deviations are clamped to zero. A non-finite
/// width or height is rejected.
pub fn build_network<R: Rng + ?Sized>(params: &PlacementParameters, rng: &mut R) -> Result<Network, SimulationError> {
    let count = params.count.max(0);
    if !params.width.is_finite() || !params.height.is_finite() {
        return Err(SimulationError::InvalidPlacement(format!(
            "area {}x{} must be finite",
            params.width, params.height
        )));
    }
    let width = params.width.max(0.0);
    let height = params.height.max(0.0);
    let power = params.initial_power.max(0.0);
    let cost = params.cost_per_send.max(0.0);
    let radii = radius_distribution(params.radius_mean, params.radius_std_dev).map_err(SimulationError::InvalidPlacement)?;

    let mut network = Network::new();
    for _ in 0..count {
        let position = Point::new(rng.gen_range(0.0..=width), rng.gen_range(0.0..=height));
        debug_assert!(point_in_area(&position, width, height));
        let radius = sample_radius(&radii, rng);
        network.add_node(position, radius, power, cost);
    }

    log::info!("placed {} nodes in {}x{}", network.len(), width, height);
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Instant;

    fn params(count: i64) -> PlacementParameters {
        PlacementParameters {
            width: 100.0,
            height: 50.0,
            count,
            radius_mean: 20.0,
            radius_std_dev: 5.0,
            initial_power: 100.0,
            cost_per_send: 1.0,
        }
    }

    #[test]
    fn ids_start_at_one_and_follow_the_last_node() {
        let mut network = Network::new();
        assert_eq!(network.add_node(Point::new(0.0, 0.0), 1.0, 1.0, 1.0), 1);
        assert_eq!(network.add_node(Point::new(1.0, 0.0), 1.0, 1.0, 1.0), 2);
        assert_eq!(network.add_node(Point::new(2.0, 0.0), 1.0, 1.0, 1.0), 3);

        network.remove_node(2).unwrap();
        assert_eq!(network.node_ids(), vec![1, 3]);
        assert_eq!(network.add_node(Point::new(3.0, 0.0), 1.0, 1.0, 1.0), 4);
        assert_eq!(network.medium().len(), 3);
    }

    #[test]
    fn removing_unknown_node_is_an_error() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 1.0, 1.0, 1.0);
        assert_eq!(network.remove_node(7).unwrap_err(), SimulationError::NodeNotFound(7));
        assert!(network.with_node(7, |_| ()).is_err());
    }

    #[test]
    fn placement_stays_in_area() {
        let mut rng = StdRng::seed_from_u64(5);
        let network = build_network(&params(200), &mut rng).unwrap();
        assert_eq!(network.len(), 200);
        for (_, position) in network.positions(|_| true) {
            assert!(point_in_area(&position, 100.0, 50.0));
        }
        let frame = network.frame(0);
        assert!(frame.nodes.iter().all(|node| node.radius >= 0.0));
        assert!(frame.nodes.iter().all(|node| node.power == 100.0));
    }

    #[test]
    fn negative_inputs_are_clamped() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(build_network(&params(-3), &mut rng).unwrap().is_empty());

        let negative = PlacementParameters {
            initial_power: -10.0,
            cost_per_send: -1.0,
            radius_std_dev: -2.0,
            ..params(2)
        };
        let network = build_network(&negative, &mut rng).unwrap();
        let frame = network.frame(0);
        assert!(frame.nodes.iter().all(|node| node.power == 0.0 && node.radius == 20.0));
        network
            .with_node(1, |node| assert_eq!(node.cost_per_send(), 0.0))
            .unwrap();
    }

    #[test]
    fn unbounded_area_is_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let wide = PlacementParameters {
            width: f64::INFINITY,
            ..params(3)
        };
        assert!(matches!(build_network(&wide, &mut rng), Err(SimulationError::InvalidPlacement(_))));

        let tall = PlacementParameters {
            height: f64::NAN,
            ..params(3)
        };
        assert!(matches!(build_network(&tall, &mut rng), Err(SimulationError::InvalidPlacement(_))));
    }

    #[test]
    fn stopping_many_slow_workers_waits_for_them_together() {
        let mut network = Network::new();
        for x in 0..4 {
            network.add_node(Point::new(x as f64 * 100.0, 0.0), 0.0, 10.0, 1.0);
        }
        network.spawn_all(&SharedFlag::new(), Duration::from_millis(300)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // each worker is mid-sleep; sequential requests would need about 4 x 300 ms
        let started = Instant::now();
        assert!(network.stop_all(Some(Duration::from_millis(700))));
        assert!(started.elapsed() < Duration::from_millis(900));
        network.join_all();
        assert_eq!(network.census().alive, 0);
    }

    #[test]
    fn placement_is_reproducible() {
        let a = build_network(&params(10), &mut StdRng::seed_from_u64(42)).unwrap();
        let b = build_network(&params(10), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a.frame(0), b.frame(0));
    }

    #[test]
    fn start_and_stop_visit_every_node() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 1.0, 1.0, 1.0);
        network.add_node(Point::new(0.0, 0.0), 1.0, 1.0, 1.0);
        assert!(network.start_all());
        assert_eq!(network.census().alive, 2);
        assert!(network.stop_all(Some(Duration::from_millis(10))));
        assert_eq!(network.census().alive, 0);
    }

    #[test]
    fn dead_node_fails_start_but_others_still_start() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 0.0, 0.5, 1.0);
        network.add_node(Point::new(5.0, 0.0), 0.0, 10.0, 1.0);
        assert!(network.start_all());

        network.with_node(1, |node| node.enqueue("x")).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        network.activate(0, &mut rng);
        network.stop_all(None);

        assert!(!network.start_all());
        let census = network.census();
        assert_eq!(census.node_count, 2);
        assert_eq!(census.alive, 1);
    }

    #[test]
    fn census_counts_receivers_and_energy() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);
        network.start_all();
        network.with_node(1, |node| node.enqueue("hello")).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        network.activate(0, &mut rng);
        network.activate(1, &mut rng);

        // node 2 received and forwarded the flood
        let census = network.census();
        assert_eq!(census.received, 1);
        assert_eq!(network.total_energy_consumed(), 2.0);
        let receivers = network.positions(|node| node.received > 0);
        assert_eq!(receivers, vec![(2, Point::new(0.0, 0.0))]);
    }
}
