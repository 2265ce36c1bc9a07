//! Static physical-property tables for common scanned materials.
//!
//! Densities and mass-attenuation coefficients follow the NIST X-ray
//! attenuation tables, trimmed to the energy range this simulator works in.
//! Each row is (photon energy in MeV, mass attenuation in cm²/g); combined
//! with the bulk density this yields the linear attenuation tables the scene
//! builder needs. Lead keeps its K-edge rows, which repeat the edge energy;
//! the attenuation table construction resolves those.

use crate::attenuation::{AttenuationError, AttenuationTable};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A material with tabulated X-ray properties.
#[derive(Debug, Clone)]
pub struct Material {
    /// Display name, also the registry key.
    pub name: &'static str,
    /// Atomic number for elements, `None` for compounds.
    pub atomic_number: Option<u32>,
    /// Bulk density in g/cm³.
    pub density_g_cm3: f64,
    /// (MeV, cm²/g) mass-attenuation rows.
    mass_attenuation: &'static [(f64, f64)],
}

impl Material {
    /// Linear attenuation table in crate units (keV, 1/mm).
    ///
    /// `μ = (μ/ρ)·ρ` converts mass attenuation to linear attenuation in
    /// cm⁻¹; a further 0.1 factor moves it to mm⁻¹.
    pub fn attenuation_table(&self) -> Result<AttenuationTable, AttenuationError> {
        let nodes = self
            .mass_attenuation
            .iter()
            .map(|&(mev, mu_rho)| (mev * 1e3, mu_rho * self.density_g_cm3 * 0.1))
            .collect();
        AttenuationTable::from_nodes(nodes)
    }
}

const ALUMINIUM_ROWS: &[(f64, f64)] = &[
    (0.010, 26.23),
    (0.015, 7.955),
    (0.020, 3.441),
    (0.030, 1.128),
    (0.050, 0.3681),
    (0.080, 0.2018),
    (0.100, 0.1704),
    (0.200, 0.1223),
    (0.500, 0.08445),
    (1.000, 0.06146),
];

const IRON_ROWS: &[(f64, f64)] = &[
    (0.010, 170.6),
    (0.015, 57.08),
    (0.020, 25.68),
    (0.030, 8.176),
    (0.050, 1.958),
    (0.080, 0.5952),
    (0.100, 0.3717),
    (0.200, 0.1460),
    (0.500, 0.08414),
    (1.000, 0.05995),
];

const COPPER_ROWS: &[(f64, f64)] = &[
    (0.010, 215.9),
    (0.015, 74.05),
    (0.020, 33.79),
    (0.030, 10.92),
    (0.050, 2.613),
    (0.080, 0.7630),
    (0.100, 0.4584),
    (0.200, 0.1559),
    (0.500, 0.08362),
    (1.000, 0.05901),
];

const LEAD_ROWS: &[(f64, f64)] = &[
    (0.010, 130.6),
    (0.015, 111.6),
    (0.020, 86.36),
    (0.030, 30.32),
    (0.050, 8.041),
    // K absorption edge: the energy repeats with the jump in cross-section.
    (0.088, 1.910),
    (0.088, 7.683),
    (0.100, 5.549),
    (0.200, 0.9985),
    (0.500, 0.1614),
    (1.000, 0.07102),
];

const WATER_ROWS: &[(f64, f64)] = &[
    (0.010, 5.329),
    (0.015, 1.673),
    (0.020, 0.8096),
    (0.030, 0.3756),
    (0.050, 0.2269),
    (0.080, 0.1837),
    (0.100, 0.1707),
    (0.200, 0.1370),
    (0.500, 0.09687),
    (1.000, 0.07072),
];

/// Registry of bundled materials, keyed by name.
pub static MATERIALS: Lazy<HashMap<&'static str, Material>> = Lazy::new(|| {
    let all = [
        Material {
            name: "Aluminium",
            atomic_number: Some(13),
            density_g_cm3: 2.699,
            mass_attenuation: ALUMINIUM_ROWS,
        },
        Material {
            name: "Iron",
            atomic_number: Some(26),
            density_g_cm3: 7.874,
            mass_attenuation: IRON_ROWS,
        },
        Material {
            name: "Copper",
            atomic_number: Some(29),
            density_g_cm3: 8.96,
            mass_attenuation: COPPER_ROWS,
        },
        Material {
            name: "Lead",
            atomic_number: Some(82),
            density_g_cm3: 11.35,
            mass_attenuation: LEAD_ROWS,
        },
        Material {
            name: "Water",
            atomic_number: None,
            density_g_cm3: 1.0,
            mass_attenuation: WATER_ROWS,
        },
    ];
    all.into_iter().map(|m| (m.name, m)).collect()
});

/// Look up a bundled material by name.
pub fn by_name(name: &str) -> Option<&'static Material> {
    MATERIALS.get(name)
}

/// Names of all bundled materials, sorted.
pub fn material_names() -> Vec<&'static str> {
    let mut names: Vec<_> = MATERIALS.keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_registry_lookup() {
        assert!(by_name("Iron").is_some());
        assert!(by_name("Unobtanium").is_none());
        assert_eq!(by_name("Lead").unwrap().atomic_number, Some(82));
    }

    #[test]
    fn test_linear_attenuation_units() {
        // Aluminium at 50 keV: 0.3681 cm^2/g * 2.699 g/cm^3 = 0.9935 1/cm
        // = 0.09935 1/mm.
        let table = by_name("Aluminium").unwrap().attenuation_table().unwrap();
        assert_relative_eq!(table.interpolate(50.0), 0.09935, max_relative = 1e-3);
    }

    #[test]
    fn test_lead_k_edge_survives_construction() {
        // The duplicated edge energy must not break the table; both sides of
        // the jump stay represented.
        let table = by_name("Lead").unwrap().attenuation_table().unwrap();
        let below = table.interpolate(87.9);
        let above = table.interpolate(89.0);
        assert!(above > below * 2.0, "edge jump lost: {below} -> {above}");
    }

    #[test]
    fn test_all_tables_build() {
        for name in material_names() {
            let material = by_name(name).unwrap();
            let table = material.attenuation_table().unwrap();
            assert!(table.len() >= 10, "{name} table too small");
            let (lo, hi) = table.bounds_kev();
            assert!(lo >= 10.0 && hi >= 1000.0);
        }
    }
}
