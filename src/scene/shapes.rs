//! Emitter and detector surface production.
//!
//! Machine surfaces come from an external geometry producer behind the
//! [`ShapeProducer`] trait; [`PanelShapes`] is the built-in tessellator so
//! the pipeline runs without a CAD kernel attached. All surfaces are
//! returned centered on the machine axis at the origin, facing the +x
//! direction (the detector); the scene builder handles placement, rotation
//! and unit rescaling.

use super::{SceneError, TriangleMesh, GROWTH_FACTOR};
use crate::machine::{EmitterTopology, MachineConfig};

/// External geometry collaborator producing machine surfaces.
pub trait ShapeProducer {
    /// Light-emitter surface for the machine's topology, at the origin
    /// facing +x, in machine units (mm).
    fn emitter_surface(&self, machine: &MachineConfig) -> Result<TriangleMesh, SceneError>;

    /// Detector panel at the origin facing -x, in machine units (mm).
    fn detector_surface(&self, machine: &MachineConfig) -> Result<TriangleMesh, SceneError>;
}

/// Emitter panel extents: the chamber cross-section grown by the collimation
/// spread over the chamber length, plus a safety margin so the beam fully
/// covers the chamber.
pub fn emitter_panel_dims(machine: &MachineConfig) -> (f64, f64) {
    let spread = machine.collimation_deg.to_radians().tan();
    let d = machine.chamber_distance_mm * spread;
    (
        GROWTH_FACTOR * (machine.chamber_radius_mm + d),
        GROWTH_FACTOR * (machine.chamber_height_mm + d),
    )
}

/// Built-in surface tessellator for the three emitter topologies.
#[derive(Debug, Clone)]
pub struct PanelShapes {
    /// Arc subdivisions for curved surfaces.
    pub segments: usize,
}

impl Default for PanelShapes {
    fn default() -> Self {
        Self { segments: 32 }
    }
}

impl PanelShapes {
    /// Flat rectangle in the y-z plane. `flip` reverses the winding so the
    /// surface faces -x instead of +x.
    fn flat_panel(width: f64, height: f64, flip: bool) -> TriangleMesh {
        let (hw, hh) = (0.5 * width, 0.5 * height);
        let vertices = vec![
            [0.0, -hw, -hh],
            [0.0, hw, -hh],
            [0.0, hw, hh],
            [0.0, -hw, hh],
        ];
        let faces = if flip {
            vec![[0, 2, 1], [0, 3, 2]]
        } else {
            vec![[0, 1, 2], [0, 2, 3]]
        };
        TriangleMesh::new(vertices, faces)
    }

    /// Cylindrical section of the fan source: axis along z, arc symmetric
    /// about +x, spanning the grown chamber width as seen from the source.
    fn cylinder_section(&self, radius: f64, half_angle: f64, height: f64) -> TriangleMesh {
        let n = self.segments.max(2);
        let mut vertices = Vec::with_capacity(2 * (n + 1));
        for i in 0..=n {
            let phi = -half_angle + 2.0 * half_angle * i as f64 / n as f64;
            let (sin, cos) = phi.sin_cos();
            vertices.push([radius * cos, radius * sin, -0.5 * height]);
            vertices.push([radius * cos, radius * sin, 0.5 * height]);
        }
        let mut faces = Vec::with_capacity(2 * n);
        for i in 0..n as u32 {
            let (a, b, c, d) = (2 * i, 2 * i + 1, 2 * i + 2, 2 * i + 3);
            faces.push([a, c, b]);
            faces.push([b, c, d]);
        }
        TriangleMesh::new(vertices, faces)
    }

    /// Spherical cap of the cone source, centered on +x with the given cap
    /// half-angle.
    fn sphere_cap(&self, radius: f64, half_angle: f64) -> TriangleMesh {
        let n = self.segments.max(3);
        let rings = 4;
        let mut vertices = vec![[radius, 0.0, 0.0]];
        for j in 1..=rings {
            let theta = half_angle * j as f64 / rings as f64;
            let (sin_t, cos_t) = theta.sin_cos();
            for i in 0..n {
                let phi = std::f64::consts::TAU * i as f64 / n as f64;
                let (sin_p, cos_p) = phi.sin_cos();
                vertices.push([
                    radius * cos_t,
                    radius * sin_t * cos_p,
                    radius * sin_t * sin_p,
                ]);
            }
        }
        let ring = |j: usize, i: usize| (1 + (j - 1) * n + i % n) as u32;
        let mut faces = Vec::new();
        for i in 0..n {
            faces.push([0, ring(1, i), ring(1, i + 1)]);
        }
        for j in 1..rings {
            for i in 0..n {
                faces.push([ring(j, i), ring(j + 1, i), ring(j + 1, i + 1)]);
                faces.push([ring(j, i), ring(j + 1, i + 1), ring(j, i + 1)]);
            }
        }
        TriangleMesh::new(vertices, faces)
    }
}

impl ShapeProducer for PanelShapes {
    fn emitter_surface(&self, machine: &MachineConfig) -> Result<TriangleMesh, SceneError> {
        let (width, height) = emitter_panel_dims(machine);
        let mesh = match machine.emitter_type {
            EmitterTopology::Parallel => Self::flat_panel(width, height, false),
            EmitterTopology::Helical => {
                let radius = 0.01 * machine.chamber_distance_mm;
                let half_angle = (width / machine.chamber_distance_mm).atan();
                self.cylinder_section(radius, half_angle, height)
            }
            EmitterTopology::Cone => {
                let radius = 0.01 * machine.chamber_distance_mm;
                let reach = (width * width + height * height).sqrt();
                let half_angle = (reach / machine.chamber_distance_mm).atan();
                self.sphere_cap(radius, half_angle)
            }
        };
        Ok(mesh)
    }

    fn detector_surface(&self, machine: &MachineConfig) -> Result<TriangleMesh, SceneError> {
        let (width, height) = emitter_panel_dims(machine);
        Ok(Self::flat_panel(width, height, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::basic_machine;
    use approx::assert_relative_eq;

    #[test]
    fn test_panel_dims_margin() {
        let machine = basic_machine();
        let (w, h) = emitter_panel_dims(&machine);
        // 1 deg collimation over 100 mm adds ~1.75 mm of spread
        let spread = 100.0 * 1.0_f64.to_radians().tan();
        assert_relative_eq!(w, 1.05 * (10.0 + spread), max_relative = 1e-12);
        assert_relative_eq!(h, 1.05 * (10.0 + spread), max_relative = 1e-12);
        assert!(w > machine.chamber_radius_mm);
    }

    #[test]
    fn test_parallel_emitter_is_flat_panel() {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let mesh = shapes.emitter_surface(&machine).unwrap();
        let (w, h) = emitter_panel_dims(&machine);
        assert_eq!(mesh.face_count(), 2);
        assert_relative_eq!(mesh.area(), w * h, max_relative = 1e-12);
        // Flat in x
        assert!(mesh.vertices().iter().all(|v| v[0] == 0.0));
    }

    #[test]
    fn test_helical_emitter_subtends_chamber() {
        let mut machine = basic_machine();
        machine.emitter_type = EmitterTopology::Helical;
        let shapes = PanelShapes::default();
        let mesh = shapes.emitter_surface(&machine).unwrap();
        assert!(mesh.face_count() >= 2 * shapes.segments);
        // Analytic area of the section: r * 2*half_angle * height, to
        // tessellation accuracy.
        let (w, h) = emitter_panel_dims(&machine);
        let radius = 0.01 * machine.chamber_distance_mm;
        let half_angle = (w / machine.chamber_distance_mm).atan();
        let analytic = radius * 2.0 * half_angle * h;
        assert_relative_eq!(mesh.area(), analytic, max_relative = 1e-2);
    }

    #[test]
    fn test_cone_emitter_cap_area() {
        let mut machine = basic_machine();
        machine.emitter_type = EmitterTopology::Cone;
        let shapes = PanelShapes { segments: 64 };
        let mesh = shapes.emitter_surface(&machine).unwrap();
        // Analytic cap area: 2*pi*r^2*(1 - cos(theta)).
        let (w, h) = emitter_panel_dims(&machine);
        let radius = 0.01 * machine.chamber_distance_mm;
        let theta = ((w * w + h * h).sqrt() / machine.chamber_distance_mm).atan();
        let analytic = std::f64::consts::TAU * radius * radius * (1.0 - theta.cos());
        assert_relative_eq!(mesh.area(), analytic, max_relative = 2e-2);
    }

    #[test]
    fn test_detector_matches_emitter_footprint() {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let detector = shapes.detector_surface(&machine).unwrap();
        let (w, h) = emitter_panel_dims(&machine);
        assert_relative_eq!(detector.area(), w * h, max_relative = 1e-12);
    }
}
