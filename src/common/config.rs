//! Run configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) runs the
//! reference experiment: 100 nodes on a 100x100 area, node 1 floods
//! "Hello World!" and waits for replies from 90% of the network.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::simulation::network::PlacementParameters;
use crate::simulation::scheduler::RunSettings;
use crate::simulation::termination::{Discipline, TerminationCondition};
use crate::simulation::types::NodeId;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimulationConfig {
    pub network: NetworkConfig,
    pub source: SourceConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
}

/// Where nodes come from: a scene file, or random placement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// JSON scene with explicit node placement. Overrides random placement.
    pub scene: Option<PathBuf>,
    pub width: f64,
    pub height: f64,
    pub count: i64,
    pub radius_mean: f64,
    pub radius_std_dev: f64,
    pub initial_power: f64,
    pub cost_per_send: f64,
    /// Seed for random placement. Entropy when unset.
    pub placement_seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            scene: None,
            width: 100.0,
            height: 100.0,
            count: 100,
            radius_mean: 20.0,
            radius_std_dev: 5.0,
            initial_power: 100_000.0,
            cost_per_send: 1.0,
            placement_seed: None,
        }
    }
}

impl NetworkConfig {
    pub fn placement(&self) -> PlacementParameters {
        PlacementParameters {
            width: self.width,
            height: self.height,
            count: self.count,
            radius_mean: self.radius_mean,
            radius_std_dev: self.radius_std_dev,
            initial_power: self.initial_power,
            cost_per_send: self.cost_per_send,
        }
    }
}

/// The node that originates the flood.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SourceConfig {
    pub node: NodeId,
    pub payload: String,
    /// Explicit number of acknowledgements. Takes precedence over the ratio.
    pub required_replies: Option<usize>,
    /// Fraction of the network that must acknowledge.
    pub required_ratio: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            node: 1,
            payload: "Hello World!".to_string(),
            required_replies: None,
            required_ratio: 0.9,
        }
    }
}

impl SourceConfig {
    /// Acknowledgements needed in a network of `node_count` nodes.
    pub fn required_replies(&self, node_count: usize) -> usize {
        match self.required_replies {
            Some(required) => required,
            None => (self.required_ratio.clamp(0.0, 1.0) * node_count as f64).ceil() as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    pub discipline: Discipline,
    pub conditions: Vec<TerminationCondition>,
    pub seed: Option<u64>,
    pub node_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub observer_interval_ms: u64,
    /// Bounded wait per thread when stopping; unset only posts the request.
    pub stop_timeout_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            discipline: Discipline::Concurrent,
            conditions: vec![
                TerminationCondition::NodeDriven,
                TerminationCondition::RunningTime(Duration::from_secs(60)),
            ],
            seed: None,
            node_interval_ms: 10,
            poll_interval_ms: 50,
            observer_interval_ms: 100,
            stop_timeout_ms: Some(1000),
        }
    }
}

impl RunConfig {
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            discipline: self.discipline,
            conditions: self.conditions.clone(),
            seed: self.seed,
            node_interval: Duration::from_millis(self.node_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            observer_interval: Duration::from_millis(self.observer_interval_ms),
            stop_timeout: self.stop_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Parent of the per-run directories.
    pub directory: PathBuf,
    pub record_frames: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("runs"),
            record_frames: true,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: SimulationConfig = toml::from_str(content)?;
        if let Some(scene) = &config.network.scene {
            log::debug!("nodes will be loaded from {}", scene.display());
        }
        Ok(config)
    }
}
