//! Radio reachability and radius sampling.
//!
//! Contains helpers for:
//! - The probabilistic link model used by the medium
//! - Drawing transmit radii from a normal distribution
//!
//! Two nodes with radii `r1` and `r2` at squared distance `d²` hear each other
//! with probability
//!
//! ```text
//! p = 0                          if r1 * r2 <= 0
//! p = max(0, 1 - d² / (r1 * r2))  otherwise
//! ```
//!
//! so co-located nodes always connect and the probability falls to zero at
//! `d = sqrt(r1 * r2)`.

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Probability that a transmission from a node with `source_radius` reaches a
/// node with `target_radius` at squared distance `d2`.
///
/// Always returns a value in `[0, 1]`; non-finite inputs yield 0.
pub fn reachability(d2: f64, source_radius: f64, target_radius: f64) -> f64 {
    let rr = source_radius * target_radius;
    if !(rr > 0.0) {
        return 0.0;
    }
    let p = 1.0 - d2 / rr;
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
}

/// Build the radius distribution, clamping a negative standard deviation to 0.
pub fn radius_distribution(mean: f64, std_dev: f64) -> Result<Normal<f64>, String> {
    let std_dev = if std_dev >= 0.0 { std_dev } else { 0.0 };
    Normal::new(mean, std_dev).map_err(|e| format!("radius ~ N({mean}, {std_dev}): {e}"))
}

/// Sample a transmit radius: the absolute value of a normal draw.
pub fn sample_radius<R: Rng + ?Sized>(distribution: &Normal<f64>, rng: &mut R) -> f64 {
    distribution.sample(rng).abs()
}
