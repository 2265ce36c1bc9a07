//! Tabulated attenuation-versus-energy data for scanned materials.
//!
//! Each scanned object carries a table of (energy, linear attenuation
//! coefficient) calibration points. The renderer wants one effective
//! coefficient per energy sub-band, which [`AttenuationTable::band_average`]
//! produces by linearly interpolating the table on a uniform grid across the
//! band and taking the trapezoidal-rule average.
//!
//! Tables are validated at construction: nodes are sorted by energy and a
//! duplicate energy node is nudged up by a fixed 1% relative offset, so the
//! interpolation nodes are strictly increasing from then on. Reference data
//! sources (e.g. the NIST mass-attenuation tables) repeat the energy value
//! at absorption edges, which is where the duplicates come from.

use crate::units::SpectralValue;
use thiserror::Error;

/// Relative offset applied to a duplicated energy node.
const DUPLICATE_NUDGE: f64 = 1.01;

/// Default number of interpolation samples used by [`AttenuationTable::band_average`].
pub const DEFAULT_AVERAGE_POINTS: usize = 25;

/// Errors raised when building an attenuation table.
#[derive(Debug, Error)]
pub enum AttenuationError {
    /// A scanned object needs at least one calibration point.
    #[error("attenuation table has no calibration points")]
    EmptyTable,

    /// A node value is NaN or infinite.
    #[error("non-finite attenuation node ({energy_kev} keV, {coefficient} 1/mm)")]
    NonFiniteNode { energy_kev: f64, coefficient: f64 },
}

/// Linear attenuation coefficient versus photon energy, as interpolation
/// nodes.
///
/// Energies are stored in keV, coefficients in mm⁻¹. The node sequence is
/// strictly increasing in energy; evaluation outside the tabulated range
/// clamps to the boundary value (flat extrapolation).
#[derive(Debug, Clone, PartialEq)]
pub struct AttenuationTable {
    energies_kev: Vec<f64>,
    coefficients: Vec<f64>,
}

impl AttenuationTable {
    /// Build a table from (spectral value, coefficient in 1/mm) pairs.
    ///
    /// The pairs may be keyed by energy, frequency or wavelength; they are
    /// converted to energies, sorted, and de-duplicated by the 1% nudge.
    pub fn from_pairs(pairs: &[(SpectralValue, f64)]) -> Result<Self, AttenuationError> {
        let nodes: Vec<(f64, f64)> = pairs
            .iter()
            .map(|&(v, c)| (v.to_energy_kev(), c))
            .collect();
        Self::from_nodes(nodes)
    }

    /// Build a table from (energy in keV, coefficient in 1/mm) pairs.
    pub fn from_nodes(mut nodes: Vec<(f64, f64)>) -> Result<Self, AttenuationError> {
        if nodes.is_empty() {
            return Err(AttenuationError::EmptyTable);
        }
        for &(e, c) in &nodes {
            if !e.is_finite() || !c.is_finite() {
                return Err(AttenuationError::NonFiniteNode {
                    energy_kev: e,
                    coefficient: c,
                });
            }
        }

        nodes.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Absorption-edge rows repeat the energy; shift the later node up so
        // the interpolation grid stays strictly increasing.
        for i in 1..nodes.len() {
            if nodes[i].0 <= nodes[i - 1].0 {
                nodes[i].0 = nodes[i - 1].0 * DUPLICATE_NUDGE;
            }
        }

        let (energies_kev, coefficients) = nodes.into_iter().unzip();
        Ok(Self {
            energies_kev,
            coefficients,
        })
    }

    /// Number of calibration points.
    pub fn len(&self) -> usize {
        self.energies_kev.len()
    }

    pub fn is_empty(&self) -> bool {
        // Construction rejects empty tables; kept for the len/is_empty pair.
        self.energies_kev.is_empty()
    }

    /// Lowest and highest tabulated energies in keV.
    pub fn bounds_kev(&self) -> (f64, f64) {
        (
            self.energies_kev[0],
            *self.energies_kev.last().unwrap_or(&self.energies_kev[0]),
        )
    }

    /// Linear attenuation coefficient (1/mm) at `energy_kev`, linearly
    /// interpolated between nodes and clamped to the boundary values outside
    /// the tabulated range.
    pub fn interpolate(&self, energy_kev: f64) -> f64 {
        let energies = &self.energies_kev;
        let coefficients = &self.coefficients;

        if energy_kev <= energies[0] {
            return coefficients[0];
        }
        let last = energies.len() - 1;
        if energy_kev >= energies[last] {
            return coefficients[last];
        }

        // The segment index is the last node at or below the query.
        let i = match energies.binary_search_by(|e| e.total_cmp(&energy_kev)) {
            Ok(i) => return coefficients[i],
            Err(i) => i - 1,
        };

        let t = (energy_kev - energies[i]) / (energies[i + 1] - energies[i]);
        coefficients[i] * (1.0 - t) + coefficients[i + 1] * t
    }

    /// Band-averaged linear attenuation coefficient over `[e_min, e_max]` keV.
    ///
    /// Interpolates the table on a uniform grid of `num_points` samples and
    /// returns the trapezoidal-rule average. A degenerate band
    /// (`e_max <= e_min`) returns the point sample at `e_min`, guarding the
    /// integral denominator.
    pub fn band_average(&self, e_min_kev: f64, e_max_kev: f64, num_points: usize) -> f64 {
        if e_max_kev <= e_min_kev {
            return self.interpolate(e_min_kev);
        }

        let n = num_points.max(2);
        let dx = (e_max_kev - e_min_kev) / (n - 1) as f64;
        let mut integral = 0.0;
        let mut prev = self.interpolate(e_min_kev);
        for i in 1..n {
            let next = self.interpolate(e_min_kev + i as f64 * dx);
            integral += 0.5 * (prev + next) * dx;
            prev = next;
        }
        integral / (e_max_kev - e_min_kev)
    }
}
