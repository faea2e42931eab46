//! Termination conditions and their evaluation.
//!
//! A run is configured with a list of [`TerminationCondition`]s. Before the run
//! starts the list is folded into a [`TerminationPlan`] for the chosen
//! [`Discipline`]; the scheduler then asks the plan after every cycle (or poll)
//! whether the run is over.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SimulationError;

/// How nodes are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Discipline {
    /// Single thread, explicit turns in a shuffled order every cycle.
    #[default]
    #[serde(alias = "single-thread")]
    Cooperative,
    /// One OS thread per node.
    #[serde(alias = "multi-thread")]
    Concurrent,
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Cooperative => write!(f, "cooperative"),
            Discipline::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// A single reason a run may end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TerminationCondition {
    /// Stop right after the first evaluation.
    Ordinary,
    /// Only the user can stop the run.
    UserDriven,
    /// Stop after this many cooperative cycles.
    NumOfCycles(u64),
    /// Stop after this much wall-clock time in concurrent mode.
    RunningTime(Duration),
    /// Stop once any node completes its outbound flood.
    NodeDriven,
    /// Stop once at least this fraction of nodes received a forward message.
    ReceivedRateAtLeast(f64),
    /// Stop once at most this fraction of nodes is still running.
    SurvivalRateAtMost(f64),
}

impl TerminationCondition {
    /// Check the parameter range.
    pub fn validate(&self) -> Result<(), SimulationError> {
        match *self {
            TerminationCondition::NumOfCycles(0) => {
                Err(SimulationError::InvalidCondition("cycle count must be at least 1".to_string()))
            }
            TerminationCondition::RunningTime(time) if time.is_zero() => {
                Err(SimulationError::InvalidCondition("running time must be positive".to_string()))
            }
            TerminationCondition::ReceivedRateAtLeast(rate) | TerminationCondition::SurvivalRateAtMost(rate)
                if !(0.0..=1.0).contains(&rate) =>
            {
                Err(SimulationError::InvalidCondition(format!("rate {rate} is outside [0, 1]")))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TerminationCondition::Ordinary => "ordinary",
            TerminationCondition::UserDriven => "user-driven",
            TerminationCondition::NumOfCycles(_) => "cycles",
            TerminationCondition::RunningTime(_) => "running-time",
            TerminationCondition::NodeDriven => "node-driven",
            TerminationCondition::ReceivedRateAtLeast(_) => "received-rate",
            TerminationCondition::SurvivalRateAtMost(_) => "survival-rate",
        }
    }
}

impl fmt::Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCondition::NumOfCycles(cycles) => write!(f, "{}={}", self.name(), cycles),
            TerminationCondition::RunningTime(time) => write!(f, "{}={}", self.name(), time.as_secs_f64()),
            TerminationCondition::ReceivedRateAtLeast(rate) | TerminationCondition::SurvivalRateAtMost(rate) => {
                write!(f, "{}={}", self.name(), rate)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Parses `"ordinary"`, `"user-driven"`, `"node-driven"`, `"cycles=N"`,
/// `"running-time=SECONDS"`, `"received-rate=F"` and `"survival-rate=F"`.
impl FromStr for TerminationCondition {
    type Err = SimulationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (name, value) = match text.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (text, None),
        };

        let invalid = |what: &str| SimulationError::InvalidCondition(format!("{name}: {what}"));

        let condition = match (name.to_ascii_lowercase().as_str(), value) {
            ("ordinary", None) => TerminationCondition::Ordinary,
            ("user-driven", None) => TerminationCondition::UserDriven,
            ("node-driven", None) => TerminationCondition::NodeDriven,
            ("cycles", Some(value)) => {
                TerminationCondition::NumOfCycles(value.parse().map_err(|_| invalid("expected a whole number"))?)
            }
            ("running-time", Some(value)) => {
                let seconds: f64 = value.parse().map_err(|_| invalid("expected seconds"))?;
                let time = Duration::try_from_secs_f64(seconds).map_err(|_| invalid("expected non-negative seconds"))?;
                TerminationCondition::RunningTime(time)
            }
            ("received-rate", Some(value)) => {
                TerminationCondition::ReceivedRateAtLeast(value.parse().map_err(|_| invalid("expected a fraction"))?)
            }
            ("survival-rate", Some(value)) => {
                TerminationCondition::SurvivalRateAtMost(value.parse().map_err(|_| invalid("expected a fraction"))?)
            }
            _ => return Err(SimulationError::UnsupportedCondition(text.to_string())),
        };

        condition.validate()?;
        Ok(condition)
    }
}

impl TryFrom<String> for TerminationCondition {
    type Error = SimulationError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<TerminationCondition> for String {
    fn from(condition: TerminationCondition) -> Self {
        condition.to_string()
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    Ordinary,
    CycleLimit,
    TimeElapsed,
    NodeDriven,
    ReceivedRate,
    SurvivalRate,
    UserInterrupt,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::Ordinary => "ordinary",
            TerminationReason::CycleLimit => "cycle limit reached",
            TerminationReason::TimeElapsed => "running time elapsed",
            TerminationReason::NodeDriven => "node completed its flood",
            TerminationReason::ReceivedRate => "received rate reached",
            TerminationReason::SurvivalRate => "survival rate dropped",
            TerminationReason::UserInterrupt => "user interrupt",
        };
        write!(f, "{text}")
    }
}

/// Aggregate node counts used by the rate conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Census {
    pub node_count: usize,
    /// Nodes that received at least one forward message.
    pub received: usize,
    /// Nodes still running.
    pub alive: usize,
}

impl Census {
    pub fn received_rate(&self) -> f64 {
        if self.node_count == 0 {
            return 0.0;
        }
        self.received as f64 / self.node_count as f64
    }

    pub fn survival_rate(&self) -> f64 {
        if self.node_count == 0 {
            return 0.0;
        }
        self.alive as f64 / self.node_count as f64
    }
}

/// Run progress seen by the plan.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    pub cycles: u64,
    pub elapsed: Duration,
    pub node_driven: bool,
}

/// All conditions of a run folded into one record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TerminationPlan {
    pub ordinary: bool,
    pub user_driven: bool,
    pub cycles: Option<u64>,
    pub running_time: Option<Duration>,
    pub node_driven: bool,
    pub received_rate: Option<f64>,
    pub survival_rate: Option<f64>,
}

/// Store `value` in `slot`, rejecting a second different value.
fn fold<T: PartialEq + fmt::Debug>(slot: &mut Option<T>, value: T, condition: &'static str) -> Result<(), SimulationError> {
    if let Some(existing) = slot.as_ref() {
        if *existing != value {
            return Err(SimulationError::ConfigurationConflict {
                condition,
                first: format!("{existing:?}"),
                second: format!("{value:?}"),
            });
        }
    }
    *slot = Some(value);
    Ok(())
}

impl TerminationPlan {
    /// Fold `conditions` into a plan for `discipline`.
    ///
    /// Conditions that mean nothing under the discipline are dropped with a
    /// warning. The same parameterized condition with two different values is
    /// a [`SimulationError::ConfigurationConflict`].
    pub fn extract(conditions: &[TerminationCondition], discipline: Discipline) -> Result<Self, SimulationError> {
        let mut plan = TerminationPlan::default();

        for condition in conditions {
            condition.validate()?;
            match *condition {
                TerminationCondition::Ordinary => plan.ordinary = true,
                TerminationCondition::UserDriven => plan.user_driven = true,
                TerminationCondition::NodeDriven => plan.node_driven = true,
                TerminationCondition::NumOfCycles(cycles) => {
                    if discipline == Discipline::Concurrent {
                        log::warn!("{condition} has no meaning in concurrent mode, ignoring");
                        continue;
                    }
                    fold(&mut plan.cycles, cycles, "cycles")?;
                }
                TerminationCondition::RunningTime(time) => {
                    if discipline == Discipline::Cooperative {
                        log::warn!("{condition} has no meaning in cooperative mode, ignoring");
                        continue;
                    }
                    fold(&mut plan.running_time, time, "running-time")?;
                }
                TerminationCondition::ReceivedRateAtLeast(rate) => fold(&mut plan.received_rate, rate, "received-rate")?,
                TerminationCondition::SurvivalRateAtMost(rate) => fold(&mut plan.survival_rate, rate, "survival-rate")?,
            }
        }

        Ok(plan)
    }

    /// Whether anything besides the user can end the run.
    pub fn can_fire(&self) -> bool {
        self.ordinary
            || self.cycles.is_some()
            || self.running_time.is_some()
            || self.node_driven
            || self.received_rate.is_some()
            || self.survival_rate.is_some()
    }

    /// First matching reason, in precedence order.
    pub fn evaluate(&self, progress: &Progress, census: &Census) -> Option<TerminationReason> {
        if self.ordinary {
            return Some(TerminationReason::Ordinary);
        }
        if self.cycles.is_some_and(|cycles| progress.cycles >= cycles) {
            return Some(TerminationReason::CycleLimit);
        }
        if self.running_time.is_some_and(|time| progress.elapsed >= time) {
            return Some(TerminationReason::TimeElapsed);
        }
        if self.node_driven && progress.node_driven {
            return Some(TerminationReason::NodeDriven);
        }
        if self.received_rate.is_some_and(|rate| census.received_rate() >= rate) {
            return Some(TerminationReason::ReceivedRate);
        }
        if self.survival_rate.is_some_and(|rate| census.survival_rate() <= rate) {
            return Some(TerminationReason::SurvivalRate);
        }
        None
    }
}
