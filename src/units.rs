//! Spectral unit conversions between photon energy, frequency and wavelength.
//!
//! X-ray machine settings mix representations freely: emitter limits are
//! energies, tabulated attenuation data is keyed by frequency or energy, and
//! wavelengths show up in renderer-facing material data. A [`SpectralValue`]
//! tags a scalar with its representation and converts between them through
//! `E = h·ν` and `ν = c/λ`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Planck constant in eV·s.
pub const PLANCK_EV_S: f64 = 4.135667696e-15;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT_M_S: f64 = 2.99792458e8;

const PLANCK_KEV_S: f64 = PLANCK_EV_S * 1e-3;
const SPEED_OF_LIGHT_NM_S: f64 = SPEED_OF_LIGHT_M_S * 1e9;

/// Errors raised when interpreting spectral quantities.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit suffix is not a recognized energy, frequency or wavelength
    /// unit.
    #[error("unrecognized spectral unit kind in {0:?}")]
    InvalidUnitKind(String),

    /// The quantity is not of the form `<number> <unit>`.
    #[error("malformed spectral quantity {0:?}")]
    Malformed(String),
}

/// A photon characteristic tagged with its representation.
///
/// The tag is the enum discriminant, so an untagged value is unrepresentable;
/// unit mistakes surface at the parse boundary as
/// [`UnitError::InvalidUnitKind`] instead of deep inside a computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpectralValue {
    /// Photon energy in kilo-electronvolt.
    Energy { kev: f64 },
    /// Photon frequency in hertz.
    Frequency { hz: f64 },
    /// Photon wavelength in nanometers.
    Wavelength { nm: f64 },
}

impl SpectralValue {
    pub fn energy_kev(kev: f64) -> Self {
        Self::Energy { kev }
    }

    pub fn frequency_hz(hz: f64) -> Self {
        Self::Frequency { hz }
    }

    pub fn wavelength_nm(nm: f64) -> Self {
        Self::Wavelength { nm }
    }

    /// The value expressed as an energy in keV.
    pub fn to_energy_kev(self) -> f64 {
        match self {
            Self::Energy { kev } => kev,
            Self::Frequency { hz } => PLANCK_KEV_S * hz,
            Self::Wavelength { nm } => PLANCK_KEV_S * SPEED_OF_LIGHT_NM_S / nm,
        }
    }

    /// The value expressed as a frequency in Hz.
    pub fn to_frequency_hz(self) -> f64 {
        match self {
            Self::Energy { kev } => kev / PLANCK_KEV_S,
            Self::Frequency { hz } => hz,
            Self::Wavelength { nm } => SPEED_OF_LIGHT_NM_S / nm,
        }
    }

    /// The value expressed as a wavelength in nm.
    pub fn to_wavelength_nm(self) -> f64 {
        match self {
            Self::Energy { kev } => PLANCK_KEV_S * SPEED_OF_LIGHT_NM_S / kev,
            Self::Frequency { hz } => SPEED_OF_LIGHT_NM_S / hz,
            Self::Wavelength { nm } => nm,
        }
    }

    /// Re-tag as an energy.
    pub fn to_energy(self) -> Self {
        Self::Energy {
            kev: self.to_energy_kev(),
        }
    }

    /// Re-tag as a frequency.
    pub fn to_frequency(self) -> Self {
        Self::Frequency {
            hz: self.to_frequency_hz(),
        }
    }

    /// Re-tag as a wavelength.
    pub fn to_wavelength(self) -> Self {
        Self::Wavelength {
            nm: self.to_wavelength_nm(),
        }
    }
}

impl fmt::Display for SpectralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Energy { kev } => write!(f, "{kev} keV"),
            Self::Frequency { hz } => write!(f, "{hz} Hz"),
            Self::Wavelength { nm } => write!(f, "{nm} nm"),
        }
    }
}

impl FromStr for SpectralValue {
    type Err = UnitError;

    /// Parse quantities of the form `"50 keV"`, `"1.2e19 Hz"`, `"0.05 nm"`.
    ///
    /// Recognized units: `eV`, `keV`, `MeV`, `Hz`, `nm`, `pm`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(UnitError::Malformed(s.to_string()));
        };
        let value: f64 = value
            .parse()
            .map_err(|_| UnitError::Malformed(s.to_string()))?;
        match unit {
            "eV" => Ok(Self::Energy { kev: value * 1e-3 }),
            "keV" => Ok(Self::Energy { kev: value }),
            "MeV" => Ok(Self::Energy { kev: value * 1e3 }),
            "Hz" => Ok(Self::Frequency { hz: value }),
            "nm" => Ok(Self::Wavelength { nm: value }),
            "pm" => Ok(Self::Wavelength { nm: value * 1e-3 }),
            other => Err(UnitError::InvalidUnitKind(other.to_string())),
        }
    }
}
