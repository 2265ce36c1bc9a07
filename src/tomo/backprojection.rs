//! Filtered backprojection (inverse Radon transform).
//!
//! Each projection is convolved with the spatial-domain Ram-Lak ramp kernel
//! and smeared back across the reconstruction grid along its projection
//! direction, with linear interpolation between detector samples. The
//! reconstructed region is assumed circular: the projections only cover the
//! inscribed circle of the grid, so everything outside it is zeroed.
//!
//! The spatial kernel keeps the crate free of an FFT dependency; detector
//! rows in this pipeline are small enough that the O(n²) convolution is
//! irrelevant next to rendering time.

use ndarray::{Array2, ArrayView2};
use std::f64::consts::PI;

/// Discrete Ram-Lak kernel value at integer offset `k` (unit detector
/// spacing): 1/4 at the center, 0 at even offsets, -1/(pi*k)^2 at odd ones.
fn ramp_kernel(k: isize) -> f64 {
    if k == 0 {
        0.25
    } else if k % 2 == 0 {
        0.0
    } else {
        let k = k as f64;
        -1.0 / (PI * PI * k * k)
    }
}

/// Convolve one projection with the ramp kernel.
pub fn filter_projection(projection: &[f64]) -> Vec<f64> {
    let n = projection.len() as isize;
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (j, &p) in projection.iter().enumerate() {
                acc += p * ramp_kernel(i - j as isize);
            }
            acc
        })
        .collect()
}

/// Reconstruct one slice from its sinogram cross-section.
///
/// `projections` is shaped (angle, detector position); `angles_deg` holds
/// the matching projection angles. The output is a square image with the
/// detector width on both sides.
pub fn inverse_radon(projections: ArrayView2<'_, f64>, angles_deg: &[f64]) -> Array2<f64> {
    let (n_angles, n_det) = projections.dim();
    debug_assert_eq!(n_angles, angles_deg.len());
    let mut out = Array2::<f64>::zeros((n_det, n_det));
    if n_angles == 0 || n_det == 0 {
        return out;
    }

    let filtered: Vec<Vec<f64>> = (0..n_angles)
        .map(|a| {
            let row: Vec<f64> = projections.row(a).iter().copied().collect();
            filter_projection(&row)
        })
        .collect();

    let center = (n_det as f64 - 1.0) / 2.0;
    for (a, &angle) in angles_deg.iter().enumerate() {
        let (sin, cos) = angle.to_radians().sin_cos();
        let row = &filtered[a];
        for i in 0..n_det {
            let y = center - i as f64;
            for j in 0..n_det {
                let x = j as f64 - center;
                let t = x * cos + y * sin + center;
                if t < 0.0 || t > (n_det - 1) as f64 {
                    continue;
                }
                let lo = t.floor() as usize;
                let hi = (lo + 1).min(n_det - 1);
                let frac = t - lo as f64;
                out[[i, j]] += row[lo] * (1.0 - frac) + row[hi] * frac;
            }
        }
    }
    out *= PI / (2.0 * n_angles as f64);

    // Circular support: the projections do not constrain the corners.
    let radius = n_det as f64 / 2.0;
    for i in 0..n_det {
        let y = center - i as f64;
        for j in 0..n_det {
            let x = j as f64 - center;
            if x * x + y * y > radius * radius {
                out[[i, j]] = 0.0;
            }
        }
    }
    out
}
