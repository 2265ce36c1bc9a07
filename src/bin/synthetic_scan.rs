//! Synthetic CT scan demo.
//!
//! Runs the full radiography + tomography pipeline against the built-in
//! synthetic render service: the "renderer" computes Beer-Lambert
//! transmission through a virtual cylinder of the chosen material, standing
//! in for the external path tracer. Outputs PNG previews of the sinogram
//! and a reconstructed slice.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{s, ArrayView2};
use std::path::{Path, PathBuf};
use std::time::Duration;
use xtomo::{
    materials, CancelToken, EmitterTopology, MachineConfig, PanelShapes, RadiographySettings,
    ReconstructionSweep, ScannedObject, SinogramSweep, SyntheticRenderService, TriangleMesh,
};

#[derive(Parser, Debug)]
#[command(
    name = "synthetic_scan",
    about = "Runs a synthetic CT scan and writes sinogram/slice previews",
    long_about = None
)]
struct Args {
    /// Number of rotation angles to sample
    #[arg(long, default_value_t = 24)]
    angles: usize,

    /// Detector resolution (both axes, in pixels)
    #[arg(long, default_value_t = 64)]
    resolution: usize,

    /// Minimum emitter energy in keV
    #[arg(long, default_value_t = 10.0)]
    min_kev: f64,

    /// Maximum emitter energy in keV
    #[arg(long, default_value_t = 50.0)]
    max_kev: f64,

    /// Number of energy samples (rounded up to a multiple of 3)
    #[arg(long, default_value_t = 3)]
    samples: usize,

    /// Emitter topology (parallel, helical, cone)
    #[arg(long, default_value = "parallel")]
    emitter: EmitterTopology,

    /// Scanned material (see bundled material tables)
    #[arg(long, default_value = "Aluminium")]
    material: String,

    /// Radius of the scanned cylinder in mm
    #[arg(long, default_value_t = 4.0)]
    object_radius_mm: f64,

    /// Renderer convergence threshold
    #[arg(long, default_value_t = 0.05)]
    max_error: f64,

    /// Output directory for PNG previews
    #[arg(long, default_value = "scan_output")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let chamber_radius_mm = 10.0;
    let machine = MachineConfig {
        min_energy_kev: args.min_kev,
        max_energy_kev: args.max_kev,
        // Mildly peaked emission spectrum
        spectrum: vec![0.1, 0.6, 1.0, 0.7, 0.3],
        emitter_samples: args.samples,
        emitter_type: args.emitter,
        collimation_deg: 1.0,
        chamber_radius_mm,
        chamber_height_mm: 10.0,
        chamber_distance_mm: 100.0,
        sensor_resolution_x: args.resolution,
        sensor_resolution_y: args.resolution,
        specific_power: xtomo::machine::DEFAULT_SPECIFIC_POWER,
    };
    machine.validate()?;

    let material = materials::by_name(&args.material)
        .ok_or_else(|| anyhow!("unknown material {:?}, try one of {:?}", args.material, materials::material_names()))?;
    let object_radius = args.object_radius_mm;
    let object = ScannedObject::new(
        material.name,
        TriangleMesh::cuboid(2.0 * object_radius, 2.0 * object_radius, 10.0),
        material.attenuation_table()?,
    );
    let objects = vec![object];

    // Stand-in renderer: analytic Beer-Lambert transmission through a
    // centered cylinder of the scanned material.
    let service = SyntheticRenderService::with_generator(move |scene| {
        let (height, width) = (scene.height, scene.width);
        let mut channels = [
            ndarray::Array2::from_elem((height, width), 1.0),
            ndarray::Array2::from_elem((height, width), 1.0),
            ndarray::Array2::from_elem((height, width), 1.0),
        ];
        if scene.is_background || scene.band_attenuations_m.is_empty() {
            return channels;
        }
        let triple = scene.band_attenuations_m[0];
        for (c, image) in channels.iter_mut().enumerate() {
            let mu_per_mm = triple[c] * 1e-3;
            for x in 0..width {
                let lateral_mm =
                    ((x as f64 + 0.5) / width as f64 - 0.5) * 2.0 * chamber_radius_mm;
                let chord_mm = if lateral_mm.abs() < object_radius {
                    2.0 * (object_radius * object_radius - lateral_mm * lateral_mm).sqrt()
                } else {
                    0.0
                };
                let transmission = (-mu_per_mm * chord_mm).exp();
                image.column_mut(x).fill(transmission);
            }
        }
        channels
    });

    let cancel = CancelToken::new();
    let settings = RadiographySettings {
        max_error: args.max_error,
        poll_interval: Duration::ZERO,
    };

    let style =
        ProgressStyle::with_template("{msg:16} [{bar:40}] {pos}/{len}")?.progress_chars("=> ");

    let shapes = PanelShapes::default();
    let mut sweep = SinogramSweep::new(
        &machine,
        &objects,
        &shapes,
        &service,
        settings,
        args.angles,
        &cancel,
    )?;
    let bar = ProgressBar::new(args.angles as u64)
        .with_style(style.clone())
        .with_message("sampling");
    while sweep.advance()?.is_some() {
        bar.inc(1);
    }
    bar.finish();

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mid = args.resolution / 2;
    save_normalized(
        sweep.sinogram().slice(s![.., .., mid]),
        &args.output.join("sinogram.png"),
    )?;

    let mut recon = ReconstructionSweep::from_sweep(sweep)?;
    let bar = ProgressBar::new(args.resolution as u64)
        .with_style(style)
        .with_message("reconstructing");
    while recon.advance().is_some() {
        bar.inc(1);
    }
    bar.finish();

    let (volume, _) = recon.into_volume();
    save_normalized(
        volume.slice(s![.., .., mid]),
        &args.output.join("slice.png"),
    )?;
    println!(
        "reconstructed {} slices of {} at {} angles; previews in {}",
        args.resolution,
        material.name,
        args.angles,
        args.output.display()
    );
    Ok(())
}

/// Normalize to [0, 255] and write a grayscale PNG.
fn save_normalized(data: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    let (rows, cols) = data.dim();
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in data.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    let range = (max - min).max(1e-12);
    let pixels: Vec<u8> = data
        .iter()
        .map(|&v| (255.0 * (v - min) / range).round() as u8)
        .collect();
    let image = image::GrayImage::from_raw(cols as u32, rows as u32, pixels)
        .ok_or_else(|| anyhow!("pixel buffer size mismatch"))?;
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
