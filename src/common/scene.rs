//! Scene loading, parsing, and validation logic.
//!
//! A scene places every node explicitly instead of drawing positions at
//! random. Nodes are added to the network in file order, so the first node in
//! the file gets id 1.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::simulation::network::Network;
use crate::simulation::types::Point;

/// Error type for scene loading failures.
#[derive(Error, Debug)]
pub enum SceneLoadError {
    #[error("Failed to read file: {0}")]
    FileReadError(String),
    #[error("Failed to parse JSON: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// A node as written in the scene file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SceneNode {
    pub position: Point,
    /// Transmit radius in world units.
    pub radius: f64,
    /// Initial and maximum power.
    pub power: f64,
    #[serde(default = "default_cost_per_send")]
    pub cost_per_send: f64,
}

fn default_cost_per_send() -> f64 {
    1.0
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
}

impl Scene {
    /// Build a network with one node per scene entry, in file order.
    pub fn into_network(self) -> Network {
        let mut network = Network::new();
        for node in self.nodes {
            network.add_node(node.position, node.radius, node.power, node.cost_per_send);
        }
        network
    }
}

/// Load and parse a scene from a file.
///
/// # Parameters
///
/// * `path` - Path to the scene JSON file
///
/// # Returns
///
/// Parsed and validated Scene or an error.
pub fn load_scene(path: &Path) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;

    parse_scene(&data)
}

/// Parse and validate scene JSON.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{e:#}")))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Validate scene configuration.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_NODES: usize = 10000;

    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }

    for (idx, node) in scene.nodes.iter().enumerate() {
        if !node.position.x.is_finite() || !node.position.y.is_finite() {
            return Err(format!("Node {} position ({}, {}) is not finite", idx, node.position.x, node.position.y));
        }
        for (name, value) in [("radius", node.radius), ("power", node.power), ("cost_per_send", node.cost_per_send)] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("Node {} has invalid {} {}, must be finite and non-negative", idx, name, value));
            }
        }
    }

    Ok(())
}
