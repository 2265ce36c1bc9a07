//! X-ray machine configuration and scanned-object model.
//!
//! A [`MachineConfig`] describes the virtual scanner: emitter spectrum and
//! energy limits, emitter topology and collimation, chamber geometry, and
//! detector resolution. It is owned by the calling document or session and
//! passed by reference into the pipeline, which never mutates it.
//!
//! The renderer packs three energy sub-bands into the R/G/B channels of one
//! pass, so the requested sample count is rounded up to a multiple of three
//! and the band sequence is grouped in triples by [`MachineConfig::render_passes`].

use crate::attenuation::AttenuationTable;
use crate::scene::TriangleMesh;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Default specific power constant: emitter power density times emitter
/// area, compensating for the emitter being oversized relative to the
/// chamber.
pub const DEFAULT_SPECIFIC_POWER: f64 = 3.0e7;

/// Configuration errors, surfaced before any rendering starts.
#[derive(Debug, Error)]
pub enum MachineError {
    /// Topology string names an unsupported emitter shape.
    #[error("unknown emitter type {0:?}")]
    UnknownEmitterType(String),

    #[error("emitter energy range is empty ({min_kev} keV >= {max_kev} keV)")]
    EmptyEnergyRange { min_kev: f64, max_kev: f64 },

    #[error("emission spectrum has no samples")]
    EmptySpectrum,

    #[error("emitter sample count must be at least 1")]
    NoSamples,

    #[error("{name} must be positive, got {value}")]
    NonPositiveDimension { name: &'static str, value: f64 },

    #[error("detector resolution must be at least 1x1")]
    ZeroResolution,
}

/// Geometric shape of the simulated X-ray source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmitterTopology {
    /// Flat panel, parallel beam.
    Parallel,
    /// Cylindrical section, helical fan beam.
    Helical,
    /// Spherical cap, cone beam.
    Cone,
}

impl EmitterTopology {
    pub const ALL: [EmitterTopology; 3] = [Self::Parallel, Self::Helical, Self::Cone];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "Parallel",
            Self::Helical => "Helical",
            Self::Cone => "Cone",
        }
    }
}

impl fmt::Display for EmitterTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmitterTopology {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "helical" => Ok(Self::Helical),
            "cone" => Ok(Self::Cone),
            _ => Err(MachineError::UnknownEmitterType(s.to_string())),
        }
    }
}

/// Half-open energy interval `[lower, upper)` rendered into one RGB
/// sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyBand {
    pub lower_kev: f64,
    pub upper_kev: f64,
}

impl EnergyBand {
    pub fn width_kev(&self) -> f64 {
        self.upper_kev - self.lower_kev
    }

    pub fn center_kev(&self) -> f64 {
        0.5 * (self.lower_kev + self.upper_kev)
    }
}

/// Simulated X-ray machine setup.
///
/// Lengths are millimeters, energies keV, angles degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Minimum emitter energy in keV.
    pub min_energy_kev: f64,
    /// Maximum emitter energy in keV.
    pub max_energy_kev: f64,
    /// Normalized emission spectrum, sampled uniformly over the energy
    /// range. A single sample means a flat spectrum.
    pub spectrum: Vec<f64>,
    /// Number of energy samples to render. Rounded up to a multiple of 3
    /// (RGB channel packing).
    pub emitter_samples: usize,
    /// Emitter topology.
    pub emitter_type: EmitterTopology,
    /// X-ray spread half-angle in degrees.
    pub collimation_deg: f64,
    /// Radius of the scanning chamber in mm.
    pub chamber_radius_mm: f64,
    /// Height of the scanning chamber in mm.
    pub chamber_height_mm: f64,
    /// Distance between emitter and detector in mm.
    pub chamber_distance_mm: f64,
    /// Horizontal detector resolution in pixels.
    pub sensor_resolution_x: usize,
    /// Vertical detector resolution in pixels.
    pub sensor_resolution_y: usize,
    /// Power density times emitter area constant.
    #[serde(default = "default_specific_power")]
    pub specific_power: f64,
}

fn default_specific_power() -> f64 {
    DEFAULT_SPECIFIC_POWER
}

impl MachineConfig {
    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), MachineError> {
        if self.min_energy_kev >= self.max_energy_kev {
            return Err(MachineError::EmptyEnergyRange {
                min_kev: self.min_energy_kev,
                max_kev: self.max_energy_kev,
            });
        }
        if self.spectrum.is_empty() {
            return Err(MachineError::EmptySpectrum);
        }
        if self.emitter_samples == 0 {
            return Err(MachineError::NoSamples);
        }
        for (name, value) in [
            ("chamber radius", self.chamber_radius_mm),
            ("chamber height", self.chamber_height_mm),
            ("chamber distance", self.chamber_distance_mm),
            ("specific power", self.specific_power),
        ] {
            if value <= 0.0 {
                return Err(MachineError::NonPositiveDimension { name, value });
            }
        }
        if self.sensor_resolution_x == 0 || self.sensor_resolution_y == 0 {
            return Err(MachineError::ZeroResolution);
        }
        Ok(())
    }

    /// The emitter sample count rounded up to a multiple of 3.
    pub fn rounded_samples(&self) -> usize {
        let n = self.emitter_samples;
        if n % 3 != 0 {
            3 * (n / 3 + 1)
        } else {
            n
        }
    }

    /// Uniform half-open energy bands spanning `[min, max)`, one per
    /// rendered sub-channel.
    pub fn energy_bands(&self) -> Vec<EnergyBand> {
        let n = self.rounded_samples();
        let width = (self.max_energy_kev - self.min_energy_kev) / n as f64;
        (0..n)
            .map(|i| EnergyBand {
                lower_kev: self.min_energy_kev + i as f64 * width,
                upper_kev: self.min_energy_kev + (i + 1) as f64 * width,
            })
            .collect()
    }

    /// Energy bands grouped three at a time, one group per render pass
    /// (R, G, B sub-channels), in ascending energy order.
    pub fn render_passes(&self) -> Vec<[EnergyBand; 3]> {
        self.energy_bands()
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect()
    }

    /// Load a machine setup from a JSON document.
    pub fn load_json(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Store the machine setup as a JSON document.
    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// An object placed in the scanning chamber.
///
/// The geometry is produced externally (CAD kernel, mesh import) and owned
/// here; the attenuation table is immutable for the object's lifetime, so a
/// render pass can treat it as read-only calibration data.
#[derive(Debug, Clone)]
pub struct ScannedObject {
    /// Display label, used in working-directory file names and logs.
    pub label: String,
    /// Triangulated surface enclosing the object's volume, in mm.
    pub mesh: TriangleMesh,
    attenuation: AttenuationTable,
}

impl ScannedObject {
    pub fn new(label: impl Into<String>, mesh: TriangleMesh, attenuation: AttenuationTable) -> Self {
        Self {
            label: label.into(),
            mesh,
            attenuation,
        }
    }

    /// The object's attenuation calibration table.
    pub fn attenuation(&self) -> &AttenuationTable {
        &self.attenuation
    }
}
