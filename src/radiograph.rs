//! Radiograph assembly from per-band renders.
//!
//! Each energy-band image is divided by the background image, giving the
//! per-pixel ratio of transmitted to incident intensity. The band ratios are
//! combined in a weighted average whose weights reproduce how much of the
//! total source power each rendered sub-band represents, and the result is
//! turned into an optical-density image with `-ln(ratio)`.

use crate::machine::MachineConfig;
use crate::render::ImageSet;
use log::debug;
use ndarray::Array2;
use thiserror::Error;

/// Lower clamp for intensity ratios, keeping `-ln` finite where the
/// background is zero or a band is fully absorbed.
pub const MIN_INTENSITY_RATIO: f64 = 1e-6;

/// Spectrum resampling density: points per band used when integrating the
/// emission spectrum into band weights.
const WEIGHT_SAMPLES_PER_BAND: usize = 25;

#[derive(Debug, Error)]
pub enum RadiographError {
    #[error("image set has no energy-band images")]
    NoBands,

    #[error("band image {index} has shape {got:?}, background is {expected:?}")]
    ShapeMismatch {
        index: usize,
        got: (usize, usize),
        expected: (usize, usize),
    },
}

/// Resample a spectrum to `n_points` by piecewise-linear interpolation over
/// its sample index. A single-sample spectrum is flat.
pub fn resample_spectrum(spectrum: &[f64], n_points: usize) -> Vec<f64> {
    debug_assert!(!spectrum.is_empty());
    if spectrum.len() == 1 || n_points == 1 {
        return vec![spectrum[0]; n_points];
    }
    let last = (spectrum.len() - 1) as f64;
    (0..n_points)
        .map(|i| {
            let t = i as f64 / (n_points - 1) as f64 * last;
            let j = (t.floor() as usize).min(spectrum.len() - 2);
            let frac = t - j as f64;
            spectrum[j] * (1.0 - frac) + spectrum[j + 1] * frac
        })
        .collect()
}

/// Per-band spectral weights: the emission spectrum resampled to
/// `n_bands x 25` points and trapezoidal-integrated in `n_bands` equal
/// chunks. The weights are the share of total source power carried by each
/// band; for any spectrum that is not identically zero their sum is
/// strictly positive.
pub fn spectral_weights(spectrum: &[f64], n_bands: usize) -> Vec<f64> {
    let samples = resample_spectrum(spectrum, n_bands * WEIGHT_SAMPLES_PER_BAND);
    samples
        .chunks_exact(WEIGHT_SAMPLES_PER_BAND)
        .map(|chunk| {
            chunk
                .windows(2)
                .map(|pair| 0.5 * (pair[0] + pair[1]))
                .sum()
        })
        .collect()
}

/// Combine a background image and per-band images into one logarithmic
/// transmission radiograph.
///
/// Output shape matches the input images; values are optical densities,
/// zero where the chamber is fully transparent.
pub fn assemble_radiograph(
    machine: &MachineConfig,
    images: &ImageSet,
) -> Result<Array2<f64>, RadiographError> {
    if images.bands.is_empty() {
        return Err(RadiographError::NoBands);
    }
    let shape = images.background.dim();
    for (index, band) in images.bands.iter().enumerate() {
        if band.dim() != shape {
            return Err(RadiographError::ShapeMismatch {
                index,
                got: band.dim(),
                expected: shape,
            });
        }
    }

    let n_bands = images.bands.len();
    let mut weights = spectral_weights(&machine.spectrum, n_bands);
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        // Degenerate all-zero spectrum; fall back to a plain average.
        weights = vec![1.0; n_bands];
    }
    let weight_sum: f64 = weights.iter().sum();
    debug!("assembling radiograph from {n_bands} bands, weights {weights:?}");

    let mut ratio = Array2::<f64>::zeros(shape);
    for (band, weight) in images.bands.iter().zip(&weights) {
        let normalized = weight / weight_sum;
        ndarray::Zip::from(&mut ratio)
            .and(band)
            .and(&images.background)
            .for_each(|acc, &transmitted, &incident| {
                // A dead background pixel saw no incident power; its ratio
                // is pinned at the floor rather than dividing by zero.
                let r = if incident > 0.0 {
                    transmitted / incident
                } else {
                    MIN_INTENSITY_RATIO
                };
                *acc += normalized * r;
            });
    }

    Ok(ratio.mapv(|r| -r.max(MIN_INTENSITY_RATIO).ln()))
}
