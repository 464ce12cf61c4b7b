//! Gaussian kernel density estimate for completion-time samples.
//!
//! Cost is `O(samples * resolution)` per call, fine for dashboard-sized data.

use std::f64::consts::PI;

use crate::util::{mean, std_dev};

pub const DEFAULT_RESOLUTION: usize = 150;

/// Density curve evaluated at `resolution + 1` evenly spaced points over `[min, max]`.
///
/// Bandwidth is `σ · n^(-1/5)` with the population σ. Degenerate inputs:
/// empty samples give an empty curve, zero spread gives the single point
/// `(value, 1.0)`.
pub fn gaussian_kde(samples: &[f64], resolution: usize) -> Vec<(f64, f64)> {
    let (Some(mu), Some(sigma)) = (mean(samples), std_dev(samples)) else {
        return Vec::new();
    };
    let n = samples.len() as f64;
    let bandwidth = sigma * n.powf(-0.2);
    if bandwidth <= f64::EPSILON || resolution == 0 {
        return vec![(mu, 1.0)];
    }

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let norm = n * bandwidth * (2.0 * PI).sqrt();

    (0..=resolution)
        .map(|i| {
            let x = min + (max - min) * i as f64 / resolution as f64;
            let density = samples
                .iter()
                .map(|d| {
                    let z = (x - d) / bandwidth;
                    (-z * z / 2.0).exp()
                })
                .sum::<f64>()
                / norm;
            (x, density)
        })
        .collect()
}

/// Largest density value, for chart bounds
pub fn peak(curve: &[(f64, f64)]) -> f64 {
    curve.iter().map(|p| p.1).fold(0.0, f64::max)
}
