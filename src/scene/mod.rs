//! Renderer-facing scene construction.
//!
//! For one rotation angle and one group of three energy sub-bands, the
//! [`SceneBuilder`] produces everything the external render service needs:
//! the emitter and detector meshes placed, rotated and rescaled into the
//! renderer's length unit, the scanned-object meshes with band-averaged
//! volumetric attenuation triples, and the scene/config property files
//! generated from text templates.
//!
//! Scene units are meters; machine units are millimeters. The scale factor
//! enters surface areas squared (light power normalization) and attenuation
//! coefficients inverted (they carry an inverse-length dimension).

pub mod mesh;
pub mod shapes;
mod templates;

pub use mesh::{fix_ply_vertex_indices, TriangleMesh};
pub use shapes::{emitter_panel_dims, PanelShapes, ShapeProducer};

use crate::attenuation::{AttenuationError, DEFAULT_AVERAGE_POINTS};
use crate::machine::{EnergyBand, MachineConfig, ScannedObject};
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Emitter mesh file name inside a pass working directory.
pub const LIGHT_PLY: &str = "light.ply";
/// Detector mesh file name inside a pass working directory.
pub const SCREEN_PLY: &str = "screen.ply";
/// Scene property file name.
pub const SCENE_FILE: &str = "scene.scn";
/// Render configuration file name.
pub const RENDER_CFG_FILE: &str = "render.cfg";

/// Safety margin applied to the emitter and detector panel extents.
pub const GROWTH_FACTOR: f64 = 1.05;

const MM_TO_M: f64 = 1e-3;

/// Errors raised while building a scene.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Attenuation(#[from] AttenuationError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SceneError + '_ {
    move |source| SceneError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Mesh files written into a working directory for one angle.
#[derive(Debug, Clone)]
pub struct MeshExports {
    /// Emitter surface area after rescaling, in m².
    pub light_area_m2: f64,
    /// Object mesh file names, index-aligned with the scanned objects.
    pub object_files: Vec<String>,
}

/// Everything one render pass needs, ready to hand to the render service.
#[derive(Debug, Clone)]
pub struct SceneDescription {
    /// Scene property file contents.
    pub scene_text: String,
    /// Render configuration file contents.
    pub config_text: String,
    /// Output width in pixels.
    pub width: usize,
    /// Output height in pixels.
    pub height: usize,
    /// Convergence threshold handed to the renderer.
    pub max_error: f64,
    /// True for the background (empty chamber) pass.
    pub is_background: bool,
    /// Emitter surface area in m².
    pub light_area_m2: f64,
    /// Light power after power-density normalization.
    pub power: f64,
    /// Per-object volumetric attenuation triples in 1/m, one per scanned
    /// object, R/G/B sub-band order.
    pub band_attenuations_m: Vec<[f64; 3]>,
}

/// Builds renderer scenes for one machine configuration.
pub struct SceneBuilder<'a> {
    machine: &'a MachineConfig,
    shapes: &'a dyn ShapeProducer,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(machine: &'a MachineConfig, shapes: &'a dyn ShapeProducer) -> Self {
        Self { machine, shapes }
    }

    /// Camera standoff from the detector station, in mm.
    fn camera_offset_mm(&self) -> f64 {
        0.01 * self.machine.chamber_distance_mm
    }

    /// Export the emitter/detector meshes (rotated for `angle_deg`) and the
    /// scanned-object meshes into `workdir`.
    ///
    /// Object meshes do not rotate with the machine; a mesh file already
    /// present from a previous angle is reused as-is.
    pub fn export_meshes(
        &self,
        workdir: &Path,
        angle_deg: f64,
        objects: &[ScannedObject],
    ) -> Result<MeshExports, SceneError> {
        let machine = self.machine;
        let half_distance = 0.5 * machine.chamber_distance_mm;

        let light = self
            .shapes
            .emitter_surface(machine)?
            .translate([-half_distance, 0.0, 0.0])
            .rotate_z(angle_deg)
            .scale(MM_TO_M);
        let light_area_m2 = light.area();
        let light_path = workdir.join(LIGHT_PLY);
        light.write_ply(&light_path).map_err(io_err(&light_path))?;
        fix_ply_vertex_indices(&light_path).map_err(io_err(&light_path))?;

        let screen = self
            .shapes
            .detector_surface(machine)?
            .translate([half_distance + self.camera_offset_mm(), 0.0, 0.0])
            .rotate_z(angle_deg)
            .scale(MM_TO_M);
        let screen_path = workdir.join(SCREEN_PLY);
        screen
            .write_ply(&screen_path)
            .map_err(io_err(&screen_path))?;
        fix_ply_vertex_indices(&screen_path).map_err(io_err(&screen_path))?;

        let mut object_files = Vec::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            let name = format!("object_{i}.ply");
            let path = workdir.join(&name);
            if path.exists() {
                debug!("reusing exported mesh {name} for {}", object.label);
            } else {
                debug!("exporting mesh {name} for {}", object.label);
                let mesh = object.mesh.clone().scale(MM_TO_M);
                mesh.write_ply(&path).map_err(io_err(&path))?;
                fix_ply_vertex_indices(&path).map_err(io_err(&path))?;
            }
            object_files.push(name);
        }

        debug!(
            "exported machine meshes at {angle_deg} deg, emitter area {light_area_m2:.6} m^2"
        );
        Ok(MeshExports {
            light_area_m2,
            object_files,
        })
    }

    /// Build the scene description for one pass.
    ///
    /// `bands` is `None` for the background (empty chamber) pass and the
    /// three sub-bands of the pass otherwise. Successive calls for the
    /// passes of one angle share `exports`; only the attenuation triples
    /// change.
    pub fn build(
        &self,
        angle_deg: f64,
        bands: Option<&[EnergyBand; 3]>,
        objects: &[ScannedObject],
        max_error: f64,
        exports: &MeshExports,
    ) -> Result<SceneDescription, SceneError> {
        let machine = self.machine;
        let max_error = max_error.clamp(0.0, 1.0);

        let config_text = templates::substitute(
            templates::RENDER_CFG_TEMPLATE,
            &[
                ("@WIDTH_OUTPUT@", machine.sensor_resolution_x.to_string()),
                ("@HEIGHT_OUTPUT@", machine.sensor_resolution_y.to_string()),
                ("@MAX_ERROR@", max_error.to_string()),
            ],
        );

        let cam_offset = self.camera_offset_mm();
        let half_distance = 0.5 * machine.chamber_distance_mm;
        let cam_pos = rotate_z_point([half_distance, 0.0, 0.0], angle_deg);
        let cam_target = rotate_z_point([half_distance + cam_offset, 0.0, 0.0], angle_deg);

        let radius_m = machine.chamber_radius_mm * MM_TO_M;
        let half_height_m = 0.5 * machine.chamber_height_mm * MM_TO_M;
        let power = machine.specific_power / exports.light_area_m2;

        let mut scene_text = templates::substitute(
            templates::SCENE_TEMPLATE,
            &[
                ("@CAM_POS@", format_point_m(cam_pos)),
                ("@CAM_TARGET@", format_point_m(cam_target)),
                ("@CAM_NEAR@", (0.75 * cam_offset * MM_TO_M).to_string()),
                ("@CAM_FAR@", (1.5 * cam_offset * MM_TO_M).to_string()),
                (
                    "@SCREEN_BOUNDS@",
                    format!("{} {} {} {}", -radius_m, radius_m, -half_height_m, half_height_m),
                ),
                ("@FIELD_OF_VIEW@", (2.0 * machine.collimation_deg).to_string()),
                ("@POWER@", power.to_string()),
                ("@COLLIMATION@", machine.collimation_deg.to_string()),
                ("@AREA_LIGHT_PLY@", LIGHT_PLY.to_string()),
                ("@SCREEN_PLY@", SCREEN_PLY.to_string()),
            ],
        );

        let mut band_attenuations_m = Vec::new();
        if let Some(bands) = bands {
            for (i, object) in objects.iter().enumerate() {
                // The triple is per-meter: attenuation scales inversely with
                // length when the geometry is rescaled.
                let triple = bands.map(|band| {
                    object.attenuation().band_average(
                        band.lower_kev,
                        band.upper_kev,
                        DEFAULT_AVERAGE_POINTS,
                    ) / MM_TO_M
                });
                scene_text.push_str(&templates::substitute(
                    templates::OBJECT_TEMPLATE,
                    &[
                        ("@ID@", i.to_string()),
                        (
                            "@ABSORPTION@",
                            format!("{} {} {}", triple[0], triple[1], triple[2]),
                        ),
                        ("@OBJECT_PLY@", exports.object_files[i].clone()),
                    ],
                ));
                band_attenuations_m.push(triple);
            }
        }

        Ok(SceneDescription {
            scene_text,
            config_text,
            width: machine.sensor_resolution_x,
            height: machine.sensor_resolution_y,
            max_error,
            is_background: bands.is_none(),
            light_area_m2: exports.light_area_m2,
            power,
            band_attenuations_m,
        })
    }
}

fn rotate_z_point(p: [f64; 3], angle_deg: f64) -> [f64; 3] {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    [p[0] * cos - p[1] * sin, p[0] * sin + p[1] * cos, p[2]]
}

fn format_point_m(p_mm: [f64; 3]) -> String {
    format!(
        "{} {} {}",
        p_mm[0] * MM_TO_M,
        p_mm[1] * MM_TO_M,
        p_mm[2] * MM_TO_M
    )
}
