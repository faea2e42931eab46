//! Geometry helpers for node placement and reachability.
//!
//! Contains helper functions for:
//! - Distance calculations (squared distance to avoid sqrt in hot paths)
//! - Bounds checks for the placement area

use super::types::Point;

/// Squared Euclidean distance in world units (avoids a sqrt in hot paths).
///
/// The reachability model is written in terms of `d²`, so the medium never
/// needs the actual distance. Every `spread` call evaluates this once per
/// attached node.
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Inclusive point-in-area test for the `[0,width] x [0,height]` placement area.
pub fn point_in_area(p: &Point, width: f64, height: f64) -> bool {
    p.x >= 0.0 && p.x <= width && p.y >= 0.0 && p.y <= height
}
