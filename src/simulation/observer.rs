//! Read-only frame consumers.
//!
//! The scheduler hands every observer one [`Frame`] per cooperative cycle, or
//! one per observer interval from a dedicated thread in concurrent mode.
//! Observers never get mutable access to nodes.

use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::types::{Frame, NodeId, NodeStatus};

/// Consumer of per-cycle network snapshots.
pub trait Observer: Send {
    /// Called once before the first frame. Returning `false` aborts the run.
    fn start(&mut self) -> bool {
        true
    }

    fn observe(&mut self, frame: &Frame);

    /// Called once after the last frame.
    fn finish(&mut self) {}
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn observe(&mut self, _frame: &Frame) {}
}

/// Keeps the frames in which some node's displayed status changed.
#[derive(Debug, Default)]
pub struct FrameRecorder {
    frames: Vec<Frame>,
    last_statuses: Vec<(NodeId, NodeStatus)>,
    seen: u64,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of frames offered, recorded or not.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Write the recorded frames as JSON lines.
    pub fn write_to<W: Write>(&self, mut writer: W) -> anyhow::Result<()> {
        for frame in &self.frames {
            serde_json::to_writer(&mut writer, frame).context("failed to serialize frame")?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        self.write_to(BufWriter::new(file))
            .with_context(|| format!("failed to write frames to {}", path.display()))?;
        log::info!("saved {} frames to {}", self.frames.len(), path.display());
        Ok(())
    }
}

impl Observer for FrameRecorder {
    fn observe(&mut self, frame: &Frame) {
        self.seen += 1;
        let statuses: Vec<_> = frame.nodes.iter().map(|node| (node.node_id, node.status)).collect();
        if !self.frames.is_empty() && statuses == self.last_statuses {
            return;
        }
        self.last_statuses = statuses;
        self.frames.push(frame.clone());
    }

    fn finish(&mut self) {
        log::debug!("recorded {} of {} frames", self.frames.len(), self.seen);
    }
}
