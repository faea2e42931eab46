//! Run driver for both concurrency disciplines.
//!
//! High-level flow of a run:
//! 1) Fold the configured conditions into a [`TerminationPlan`]; conflicts
//!    abort the run before any node starts.
//! 2) Start the observer and the nodes.
//! 3) Cooperative: every cycle activates each node once in a freshly shuffled
//!    order, hands the observer a frame and evaluates the plan.
//!    Concurrent: every node runs on its own thread while the scheduler polls
//!    the plan at a fixed interval and a scoped thread feeds the observer.
//! 4) Stop the observer and the nodes and report.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::SimulationError;

use super::network::Network;
use super::node::Activation;
use super::observer::Observer;
use super::termination::{Discipline, Progress, TerminationCondition, TerminationPlan, TerminationReason};
use super::types::SharedFlag;

/// Handle the caller raises to interrupt a run.
pub type Interrupt = SharedFlag;

/// Longest single sleep of the observer thread, so a stop request is noticed
/// quickly even with a long observer interval.
const OBSERVER_SLICE: Duration = Duration::from_millis(10);

/// Everything the scheduler needs to know about a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub discipline: Discipline,
    pub conditions: Vec<TerminationCondition>,
    /// Seed for the cooperative shuffle and link draws. Entropy when unset.
    pub seed: Option<u64>,
    /// Pause between activations of a node thread.
    pub node_interval: Duration,
    /// Pause between termination checks in concurrent mode.
    pub poll_interval: Duration,
    /// Pause between observer frames in concurrent mode.
    pub observer_interval: Duration,
    /// Bounded wait per thread when stopping. `None` only posts the request.
    pub stop_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            discipline: Discipline::Cooperative,
            conditions: vec![TerminationCondition::NodeDriven],
            seed: None,
            node_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(50),
            observer_interval: Duration::from_millis(100),
            stop_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub reason: TerminationReason,
    /// Cooperative cycles, or termination polls in concurrent mode.
    pub cycles: u64,
    pub elapsed: Duration,
    pub energy_consumed: f64,
}

pub struct Scheduler {
    settings: RunSettings,
    interrupt: Interrupt,
}

impl Scheduler {
    pub fn new(settings: RunSettings) -> Self {
        Self {
            settings,
            interrupt: Interrupt::new(),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// A handle that interrupts the run when raised.
    ///
    /// Only a raise during a run counts; `run` clears the handle when it
    /// begins.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Run `network` until a termination condition fires.
    ///
    /// # Errors
    ///
    /// * [`SimulationError::ConfigurationConflict`], [`SimulationError::InvalidCondition`]
    ///   before anything starts
    /// * [`SimulationError::StartFailure`] if the observer or a node cannot start
    /// * [`SimulationError::Interrupted`] if interrupted without a user-driven condition
    pub fn run(&self, network: &mut Network, observer: &mut dyn Observer) -> Result<RunReport, SimulationError> {
        self.interrupt.clear();
        let plan = TerminationPlan::extract(&self.settings.conditions, self.settings.discipline)?;
        if !plan.can_fire() {
            log::warn!("no termination condition besides user interruption, the run only ends when interrupted");
        }

        log::info!("starting {} run with {} nodes", self.settings.discipline, network.len());
        let report = match self.settings.discipline {
            Discipline::Cooperative => self.run_cooperative(&plan, network, observer)?,
            Discipline::Concurrent => self.run_concurrent(&plan, network, observer)?,
        };
        log::info!(
            "run finished ({}) after {} cycles in {:?}, {} energy consumed",
            report.reason,
            report.cycles,
            report.elapsed,
            report.energy_consumed
        );
        Ok(report)
    }

    fn run_cooperative(
        &self,
        plan: &TerminationPlan,
        network: &mut Network,
        observer: &mut dyn Observer,
    ) -> Result<RunReport, SimulationError> {
        let mut rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        if !observer.start() {
            return Err(SimulationError::StartFailure("observer".to_string()));
        }
        if !network.start_all() {
            network.stop_all(None);
            observer.finish();
            return Err(SimulationError::StartFailure("nodes".to_string()));
        }

        let started = Instant::now();
        let mut order: Vec<usize> = (0..network.len()).collect();
        let mut progress = Progress::default();

        let outcome = loop {
            order.shuffle(&mut rng);
            for &index in &order {
                if network.activate(index, &mut rng) == Activation::Completed {
                    progress.node_driven = true;
                }
            }

            observer.observe(&network.frame(progress.cycles));
            progress.cycles += 1;
            progress.elapsed = started.elapsed();

            if let Some(reason) = plan.evaluate(&progress, &network.census()) {
                break Ok(reason);
            }
            if self.interrupt.is_raised() {
                break if plan.user_driven {
                    Ok(TerminationReason::UserInterrupt)
                } else {
                    Err(SimulationError::Interrupted)
                };
            }
        };

        observer.finish();
        if !network.stop_all(None) {
            log::warn!("some nodes did not stop cleanly");
        }

        Ok(RunReport {
            reason: outcome?,
            cycles: progress.cycles,
            elapsed: started.elapsed(),
            energy_consumed: network.total_energy_consumed(),
        })
    }

    fn run_concurrent(
        &self,
        plan: &TerminationPlan,
        network: &mut Network,
        observer: &mut dyn Observer,
    ) -> Result<RunReport, SimulationError> {
        if self.settings.seed.is_some() {
            log::warn!("seed ignored in concurrent mode");
        }

        let signal = SharedFlag::new();
        let observer_stop = SharedFlag::new();
        let probe = network.probe();
        let observer_interval = self.settings.observer_interval;

        if !observer.start() {
            return Err(SimulationError::StartFailure("observer".to_string()));
        }

        thread::scope(|scope| {
            let stop_requested = observer_stop.clone();
            let observer_thread = thread::Builder::new()
                .name("observer".to_string())
                .spawn_scoped(scope, move || {
                    let mut sequence = 0;
                    while !stop_requested.is_raised() {
                        observer.observe(&probe.frame(sequence));
                        sequence += 1;
                        pause(&stop_requested, observer_interval);
                    }
                    observer.finish();
                })
                .map_err(|e| SimulationError::StartFailure(format!("observer thread: {e}")))?;

            if let Err(e) = network.spawn_all(&signal, self.settings.node_interval) {
                observer_stop.raise();
                network.stop_all(None);
                network.join_all();
                return Err(e);
            }

            let started = Instant::now();
            let mut progress = Progress::default();

            let outcome = loop {
                thread::sleep(self.settings.poll_interval);
                progress.cycles += 1;
                progress.elapsed = started.elapsed();
                progress.node_driven = signal.is_raised();

                if let Some(reason) = plan.evaluate(&progress, &network.census()) {
                    break Ok(reason);
                }
                if self.interrupt.is_raised() {
                    break if plan.user_driven {
                        Ok(TerminationReason::UserInterrupt)
                    } else {
                        Err(SimulationError::Interrupted)
                    };
                }
            };
            let elapsed = started.elapsed();

            observer_stop.raise();
            if let Some(timeout) = self.settings.stop_timeout {
                let deadline = Instant::now() + timeout;
                while !observer_thread.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                }
                if !observer_thread.is_finished() {
                    log::warn!("observer did not stop within {timeout:?}");
                }
            }

            if !network.stop_all(self.settings.stop_timeout) {
                log::warn!("some node threads did not stop in time");
            }
            network.join_all();
            if observer_thread.join().is_err() {
                log::error!("observer thread panicked");
            }

            Ok(RunReport {
                reason: outcome?,
                cycles: progress.cycles,
                elapsed,
                energy_consumed: network.total_energy_consumed(),
            })
        })
    }
}

/// Sleep for `interval`, waking early once `stop` is raised.
fn pause(stop: &SharedFlag, interval: Duration) {
    let deadline = Instant::now() + interval;
    loop {
        let now = Instant::now();
        if stop.is_raised() || now >= deadline {
            return;
        }
        thread::sleep(OBSERVER_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::network::{PlacementParameters, build_network};
    use crate::simulation::observer::{FrameRecorder, NullObserver};
    use crate::simulation::types::{Frame, NodeState, Point};

    fn cooperative(conditions: Vec<TerminationCondition>, seed: u64) -> Scheduler {
        Scheduler::new(RunSettings {
            conditions,
            seed: Some(seed),
            ..RunSettings::default()
        })
    }

    fn concurrent(conditions: Vec<TerminationCondition>) -> Scheduler {
        Scheduler::new(RunSettings {
            discipline: Discipline::Concurrent,
            conditions,
            node_interval: Duration::from_millis(1),
            poll_interval: Duration::from_millis(5),
            observer_interval: Duration::from_millis(5),
            stop_timeout: Some(Duration::from_secs(2)),
            ..RunSettings::default()
        })
    }

    #[test]
    fn single_node_completes_on_second_activation() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 100.0, 3.0);
        network.with_node(1, |node| node.enqueue("Hello World!")).unwrap();

        let scheduler = cooperative(vec![TerminationCondition::NodeDriven], 1);
        let report = scheduler.run(&mut network, &mut NullObserver).unwrap();

        assert_eq!(report.reason, TerminationReason::NodeDriven);
        assert_eq!(report.cycles, 2);
        assert_eq!(report.energy_consumed, 3.0);
    }

    #[test]
    fn line_network_terminates_when_source_is_acknowledged() {
        let mut network = Network::new();
        for x in [0.0, 10.0, 20.0] {
            network.add_node(Point::new(x, 0.0), 15.0, 1_000_000.0, 1.0);
        }
        network
            .with_node(1, |node| {
                node.set_required_replies(1);
                node.enqueue("Hello World!");
            })
            .unwrap();

        let scheduler = cooperative(vec![TerminationCondition::NodeDriven, TerminationCondition::NumOfCycles(200)], 3);
        let report = scheduler.run(&mut network, &mut NullObserver).unwrap();

        assert_eq!(report.reason, TerminationReason::NodeDriven);
        assert!(network.with_node(1, |node| node.sending().is_none()).unwrap());
        assert!(network.with_node(2, |node| node.received() > 0).unwrap());
        // every node is stopped again after the run
        assert_eq!(network.census().alive, 0);
    }

    #[test]
    fn survival_rate_fires_exactly_when_half_the_nodes_died() {
        let mut network = Network::new();
        for (i, power) in [2.0, 4.0, 1000.0, 1000.0].into_iter().enumerate() {
            let id = network.add_node(Point::new(i as f64 * 100.0, 0.0), 1.0, power, 1.0);
            network
                .with_node(id, |node| {
                    node.set_required_replies(5);
                    node.enqueue("lonely");
                })
                .unwrap();
        }

        let scheduler = cooperative(
            vec![TerminationCondition::SurvivalRateAtMost(0.5), TerminationCondition::NumOfCycles(100)],
            9,
        );
        let report = scheduler.run(&mut network, &mut NullObserver).unwrap();

        assert_eq!(report.reason, TerminationReason::SurvivalRate);
        assert_eq!(report.cycles, 5);
        assert_eq!(network.with_node(2, |node| node.state()).unwrap(), NodeState::Dead);
        assert_eq!(network.with_node(3, |node| node.state()).unwrap(), NodeState::Stopped);
    }

    #[test]
    fn conflicting_conditions_fail_before_any_node_starts() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);
        network.with_node(1, |node| node.enqueue("x")).unwrap();

        let scheduler = cooperative(vec![TerminationCondition::NumOfCycles(10), TerminationCondition::NumOfCycles(20)], 1);
        let mut recorder = FrameRecorder::new();
        let err = scheduler.run(&mut network, &mut recorder).unwrap_err();

        assert!(matches!(err, SimulationError::ConfigurationConflict { .. }));
        assert_eq!(network.with_node(1, |node| node.state()).unwrap(), NodeState::Stopped);
        assert_eq!(network.total_energy_consumed(), 0.0);
        assert_eq!(recorder.seen(), 0);
    }

    fn seeded_network() -> Network {
        let params = PlacementParameters {
            width: 60.0,
            height: 60.0,
            count: 25,
            radius_mean: 20.0,
            radius_std_dev: 5.0,
            initial_power: 1000.0,
            cost_per_send: 1.0,
        };
        let mut network = build_network(&params, &mut StdRng::seed_from_u64(21)).unwrap();
        network
            .with_node(1, |node| {
                node.set_required_replies(20);
                node.enqueue("Hello World!");
            })
            .unwrap();
        network
    }

    #[test]
    fn cooperative_runs_are_reproducible() {
        let scheduler = cooperative(vec![TerminationCondition::NumOfCycles(30)], 7);

        let mut first = seeded_network();
        let mut first_frames = FrameRecorder::new();
        let first_report = scheduler.run(&mut first, &mut first_frames).unwrap();

        let mut second = seeded_network();
        let mut second_frames = FrameRecorder::new();
        let second_report = scheduler.run(&mut second, &mut second_frames).unwrap();

        assert_eq!(first_report.cycles, 30);
        assert_eq!(first_report.energy_consumed, second_report.energy_consumed);
        assert_eq!(first_frames.frames(), second_frames.frames());
        assert_eq!(first.frame(0), second.frame(0));
    }

    #[test]
    fn observer_sees_one_frame_per_cycle() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);

        let scheduler = cooperative(vec![TerminationCondition::NumOfCycles(4)], 1);
        let mut recorder = FrameRecorder::new();
        scheduler.run(&mut network, &mut recorder).unwrap();

        assert_eq!(recorder.seen(), 4);
        // nothing changes in an idle network
        assert_eq!(recorder.frames().len(), 1);
    }

    /// Raises the interrupt when it sees the frame with the given sequence.
    struct InterruptAt {
        interrupt: Interrupt,
        sequence: u64,
    }

    impl Observer for InterruptAt {
        fn observe(&mut self, frame: &Frame) {
            if frame.sequence == self.sequence {
                self.interrupt.raise();
            }
        }
    }

    #[test]
    fn interrupt_ends_user_driven_run() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);

        let scheduler = cooperative(vec![TerminationCondition::UserDriven], 1);
        let mut observer = InterruptAt {
            interrupt: scheduler.interrupt(),
            sequence: 0,
        };
        let report = scheduler.run(&mut network, &mut observer).unwrap();

        assert_eq!(report.reason, TerminationReason::UserInterrupt);
        assert_eq!(report.cycles, 1);
    }

    #[test]
    fn interrupt_without_user_condition_is_an_error() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);

        let scheduler = cooperative(vec![TerminationCondition::NumOfCycles(100)], 1);
        let mut observer = InterruptAt {
            interrupt: scheduler.interrupt(),
            sequence: 2,
        };
        let err = scheduler.run(&mut network, &mut observer).unwrap_err();

        assert_eq!(err, SimulationError::Interrupted);
        assert_eq!(network.census().alive, 0);
    }

    #[test]
    fn interrupt_raised_before_run_is_discarded() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);

        let scheduler = cooperative(vec![TerminationCondition::UserDriven, TerminationCondition::NumOfCycles(3)], 1);
        scheduler.interrupt().raise();
        let report = scheduler.run(&mut network, &mut NullObserver).unwrap();

        assert_eq!(report.reason, TerminationReason::CycleLimit);
        assert_eq!(report.cycles, 3);
    }

    #[test]
    fn scheduler_reused_after_interrupt_runs_to_completion() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 10.0, 1.0);

        let scheduler = cooperative(vec![TerminationCondition::UserDriven, TerminationCondition::NumOfCycles(5)], 1);
        let mut observer = InterruptAt {
            interrupt: scheduler.interrupt(),
            sequence: 1,
        };
        let first = scheduler.run(&mut network, &mut observer).unwrap();
        assert_eq!(first.reason, TerminationReason::UserInterrupt);
        assert_eq!(first.cycles, 2);
        assert!(scheduler.interrupt().is_raised());

        let second = scheduler.run(&mut network, &mut NullObserver).unwrap();
        assert_eq!(second.reason, TerminationReason::CycleLimit);
        assert_eq!(second.cycles, 5);
    }

    #[test]
    fn dead_node_aborts_start() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 0.0, 0.5, 1.0);
        network.with_node(1, |node| node.enqueue("x")).unwrap();
        let scheduler = cooperative(vec![TerminationCondition::NumOfCycles(1)], 1);
        scheduler.run(&mut network, &mut NullObserver).unwrap();
        assert_eq!(network.with_node(1, |node| node.state()).unwrap(), NodeState::Dead);

        let err = scheduler.run(&mut network, &mut NullObserver).unwrap_err();
        assert!(matches!(err, SimulationError::StartFailure(_)));
    }

    #[test]
    fn concurrent_run_stops_after_running_time() {
        let mut network = Network::new();
        for x in [0.0, 5.0, 10.0] {
            network.add_node(Point::new(x, 0.0), 10.0, 1_000_000.0, 1.0);
        }

        let scheduler = concurrent(vec![TerminationCondition::RunningTime(Duration::from_millis(300))]);
        let mut recorder = FrameRecorder::new();
        let report = scheduler.run(&mut network, &mut recorder).unwrap();

        assert_eq!(report.reason, TerminationReason::TimeElapsed);
        assert!(report.elapsed >= Duration::from_millis(300));
        assert!(recorder.seen() > 0);
        assert_eq!(network.census().alive, 0);
    }

    #[test]
    fn concurrent_run_ends_on_node_completion() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 100.0, 1.0);
        network.with_node(1, |node| node.enqueue("Hello World!")).unwrap();

        let scheduler = concurrent(vec![
            TerminationCondition::NodeDriven,
            TerminationCondition::RunningTime(Duration::from_secs(5)),
        ]);
        let report = scheduler.run(&mut network, &mut NullObserver).unwrap();

        assert_eq!(report.reason, TerminationReason::NodeDriven);
        assert!(network.with_node(1, |node| node.sending().is_none()).unwrap());
        assert_eq!(report.energy_consumed, 1.0);
    }

    #[test]
    fn interrupt_from_another_thread_ends_concurrent_run() {
        let mut network = Network::new();
        for x in [0.0, 5.0] {
            network.add_node(Point::new(x, 0.0), 10.0, 1_000_000.0, 1.0);
        }

        let scheduler = concurrent(vec![
            TerminationCondition::UserDriven,
            TerminationCondition::RunningTime(Duration::from_secs(10)),
        ]);
        let interrupt = scheduler.interrupt();
        let report = thread::scope(|scope| {
            scope.spawn(move || {
                thread::sleep(Duration::from_millis(100));
                interrupt.raise();
            });
            scheduler.run(&mut network, &mut NullObserver)
        })
        .unwrap();

        assert_eq!(report.reason, TerminationReason::UserInterrupt);
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(network.census().alive, 0);
    }

    #[test]
    fn cycle_limit_is_ignored_in_concurrent_mode() {
        let mut network = Network::new();
        network.add_node(Point::new(0.0, 0.0), 5.0, 100.0, 1.0);

        let scheduler = concurrent(vec![
            TerminationCondition::NumOfCycles(1),
            TerminationCondition::RunningTime(Duration::from_millis(100)),
        ]);
        let report = scheduler.run(&mut network, &mut NullObserver).unwrap();

        assert_eq!(report.reason, TerminationReason::TimeElapsed);
        assert!(report.cycles > 1);
    }
}
