//! Minimal triangulated surface meshes for renderer interchange.
//!
//! The render service consumes geometry as PLY files. Meshes arrive from the
//! external shape producer (or CAD kernel) in machine units, get placed and
//! rotated for the current angle, rescaled to the renderer's length unit and
//! written out. One interoperability quirk: conventional exporters name the
//! per-face index list `vertex_index`, while the render service expects
//! `vertex_indices`; [`fix_ply_vertex_indices`] rewrites the header in place.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// An indexed triangle surface.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<[f64; 3]>,
    faces: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<[u32; 3]>) -> Self {
        debug_assert!(faces
            .iter()
            .all(|f| f.iter().all(|&i| (i as usize) < vertices.len())));
        Self { vertices, faces }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    /// Translate by `[dx, dy, dz]`.
    pub fn translate(mut self, offset: [f64; 3]) -> Self {
        for v in &mut self.vertices {
            v[0] += offset[0];
            v[1] += offset[1];
            v[2] += offset[2];
        }
        self
    }

    /// Rotate about the z axis (the machine axis) by `angle_deg`.
    pub fn rotate_z(mut self, angle_deg: f64) -> Self {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        for v in &mut self.vertices {
            let (x, y) = (v[0], v[1]);
            v[0] = x * cos - y * sin;
            v[1] = x * sin + y * cos;
        }
        self
    }

    /// Uniform scale about the origin.
    pub fn scale(mut self, factor: f64) -> Self {
        for v in &mut self.vertices {
            v[0] *= factor;
            v[1] *= factor;
            v[2] *= factor;
        }
        self
    }

    /// Total surface area, in squared mesh units.
    pub fn area(&self) -> f64 {
        self.faces
            .iter()
            .map(|&[a, b, c]| {
                let a = self.vertices[a as usize];
                let b = self.vertices[b as usize];
                let c = self.vertices[c as usize];
                let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
                let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
                let cross = [
                    u[1] * v[2] - u[2] * v[1],
                    u[2] * v[0] - u[0] * v[2],
                    u[0] * v[1] - u[1] * v[0],
                ];
                0.5 * (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt()
            })
            .sum()
    }

    /// Axis-aligned cuboid of the given extents, centered at the origin.
    /// Handy for demo objects and tests.
    pub fn cuboid(width: f64, depth: f64, height: f64) -> Self {
        let (hw, hd, hh) = (0.5 * width, 0.5 * depth, 0.5 * height);
        let vertices = vec![
            [-hw, -hd, -hh],
            [hw, -hd, -hh],
            [hw, hd, -hh],
            [-hw, hd, -hh],
            [-hw, -hd, hh],
            [hw, -hd, hh],
            [hw, hd, hh],
            [-hw, hd, hh],
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2], // bottom
            [4, 5, 6],
            [4, 6, 7], // top
            [0, 1, 5],
            [0, 5, 4], // front
            [2, 3, 7],
            [2, 7, 6], // back
            [1, 2, 6],
            [1, 6, 5], // right
            [3, 0, 4],
            [3, 4, 7], // left
        ];
        Self::new(vertices, faces)
    }

    /// Write the mesh as ASCII PLY with the conventional `vertex_index`
    /// face property.
    pub fn write_ply(&self, path: &Path) -> io::Result<()> {
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        writeln!(out, "ply")?;
        writeln!(out, "format ascii 1.0")?;
        writeln!(out, "element vertex {}", self.vertices.len())?;
        writeln!(out, "property float x")?;
        writeln!(out, "property float y")?;
        writeln!(out, "property float z")?;
        writeln!(out, "element face {}", self.faces.len())?;
        writeln!(out, "property list uchar int vertex_index")?;
        writeln!(out, "end_header")?;
        for v in &self.vertices {
            writeln!(out, "{} {} {}", v[0], v[1], v[2])?;
        }
        for f in &self.faces {
            writeln!(out, "3 {} {} {}", f[0], f[1], f[2])?;
        }
        out.flush()
    }
}

/// Rewrite a PLY header so the face index list is named `vertex_indices`,
/// the spelling the render service expects. Idempotent; the body is left
/// untouched.
pub fn fix_ply_vertex_indices(path: &Path) -> io::Result<()> {
    let contents = fs::read_to_string(path)?;
    let Some(header_end) = contents.find("end_header") else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} has no PLY header", path.display()),
        ));
    };
    let (header, body) = contents.split_at(header_end);
    if header.contains("vertex_indices") {
        return Ok(());
    }
    let fixed = header.replace("vertex_index", "vertex_indices");
    fs::write(path, format!("{fixed}{body}"))
}
