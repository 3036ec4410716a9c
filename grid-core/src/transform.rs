//! Local offset → polar cell mapping.
//!
//! Radius is binned logarithmically between `r_min` and `r_max`; angle is
//! warped so bins are narrower towards the observer's heading (`phi == 0`)
//! and wider behind it.

use core::f64::consts::PI;

use crate::config::GridConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PolarCell {
    pub angle: usize,
    pub radius: usize,
}

/// Rotate a world-space delta by `-heading` so `u` points forward and `v` is lateral.
#[inline]
pub fn to_local(dx: f64, dy: f64, heading: f64) -> (f64, f64) {
    let (sin, cos) = heading.sin_cos();
    (dx * cos + dy * sin, -dx * sin + dy * cos)
}

/// Odd-symmetric log warp of `phi ∈ [-π, π]`; fixes 0 and ±π.
#[inline]
pub fn warp_angle(phi: f64, alpha: f64) -> f64 {
    let x = (phi.abs() / PI).min(1.0);
    let y = (alpha * x).ln_1p() / alpha.ln_1p();
    phi.signum() * y * PI
}

/// Map a heading-aligned offset to its grid cell, or `None` when the point lies
/// outside `[r_min, r_max]` (or is not a finite point at all).
pub fn map(u: f64, v: f64, grid: &GridConfig) -> Option<PolarCell> {
    let r = u.hypot(v);
    if !r.is_finite() || r < grid.r_min || r > grid.r_max {
        return None;
    }

    let phi = v.atan2(u);
    let theta = (warp_angle(phi, grid.alpha_warp) + PI) / (2.0 * PI);
    let angle = bin(theta, grid.angular_bins);

    let log_factor = (r / grid.r_min).ln() / (grid.r_max / grid.r_min).ln();
    let radius = bin(log_factor, grid.radial_bins);

    Some(PolarCell { angle, radius })
}

#[inline]
fn bin(fraction: f64, bins: usize) -> usize {
    let raw = (bins as f64 * fraction).floor();
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(bins - 1)
    }
}
