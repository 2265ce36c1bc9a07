//! End-to-end pipeline scenarios against the synthetic render service.

use ndarray::Array2;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use xtomo::render::{RenderError, RenderSession};
use xtomo::scene::SceneDescription;
use xtomo::{
    assemble_radiograph, materials, CancelToken, EnginePhase, MachineConfig, PanelShapes,
    RadiographyContext, RadiographySettings, ReconstructionSweep, RenderService, ScannedObject,
    SinogramSweep, SyntheticRenderService, TriangleMesh,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reference_machine() -> MachineConfig {
    MachineConfig {
        min_energy_kev: 10.0,
        max_energy_kev: 50.0,
        spectrum: vec![1.0],
        emitter_samples: 3,
        emitter_type: xtomo::EmitterTopology::Parallel,
        collimation_deg: 1.0,
        chamber_radius_mm: 10.0,
        chamber_height_mm: 10.0,
        chamber_distance_mm: 100.0,
        sensor_resolution_x: 8,
        sensor_resolution_y: 8,
        specific_power: xtomo::machine::DEFAULT_SPECIFIC_POWER,
    }
}

fn fast_settings() -> RadiographySettings {
    RadiographySettings {
        max_error: 0.05,
        poll_interval: Duration::ZERO,
    }
}

/// Wraps the synthetic service and cancels a token when the nth session
/// starts, to exercise mid-sweep cancellation windows.
struct CancelOnNthStart {
    inner: SyntheticRenderService,
    cancel: CancelToken,
    trigger_at: usize,
    started: AtomicUsize,
}

impl CancelOnNthStart {
    fn new(inner: SyntheticRenderService, cancel: CancelToken, trigger_at: usize) -> Self {
        Self {
            inner,
            cancel,
            trigger_at,
            started: AtomicUsize::new(0),
        }
    }
}

impl RenderService for CancelOnNthStart {
    fn start(
        &self,
        workdir: &Path,
        scene: &SceneDescription,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        let n = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        if n == self.trigger_at {
            self.cancel.cancel();
        }
        self.inner.start(workdir, scene)
    }
}

#[test]
fn test_empty_chamber_radiography_is_identically_zero() {
    init_logging();
    let machine = reference_machine();
    machine.validate().unwrap();

    let shapes = PanelShapes::default();
    let service = SyntheticRenderService::uniform(1.0);
    let ctx =
        RadiographyContext::new(&machine, &[], &shapes, &service).with_settings(fast_settings());
    let dir = tempfile::tempdir().unwrap();

    // One background pass plus one band pass for the three sub-bands.
    let cancel = CancelToken::new();
    let sweep = ctx.sweep(dir.path(), 0.0, true, &cancel);
    assert_eq!(sweep.pass_count(), 2);
    drop(sweep);

    let images = ctx
        .capture(dir.path(), 0.0, None, &cancel)
        .unwrap()
        .expect("radiography should complete");
    assert_eq!(images.bands.len(), 3);
    assert_eq!(images.background.dim(), (8, 8));

    // Identical band and background images: ratio 1 everywhere, -ln(1) = 0.
    let radiograph = assemble_radiograph(&machine, &images).unwrap();
    assert_eq!(radiograph.dim(), (8, 8));
    for &v in radiograph.iter() {
        assert!(v.abs() < 1e-12, "expected zero optical density, got {v}");
    }
}

#[test]
fn test_cancellation_mid_sweep_truncates_and_stops_sessions() {
    init_logging();
    let mut machine = reference_machine();
    machine.emitter_samples = 6; // two band passes

    let shapes = PanelShapes::default();
    let cancel = CancelToken::new();
    // Cancel while the first band pass (session 2 of 3) is being driven.
    let service = CancelOnNthStart::new(SyntheticRenderService::uniform(1.0), cancel.clone(), 2);
    let ctx =
        RadiographyContext::new(&machine, &[], &shapes, &service).with_settings(fast_settings());
    let dir = tempfile::tempdir().unwrap();

    let result = ctx.capture(dir.path(), 0.0, None, &cancel).unwrap();
    assert!(result.is_none(), "truncated capture must not yield images");

    // The cancelled in-flight session was stopped; nothing leaked.
    assert_eq!(service.inner.sessions_started(), 2);
    assert_eq!(service.inner.sessions_stopped(), 2);
}

#[test]
fn test_cancellation_during_final_pass_yields_provisional_images() {
    init_logging();
    let machine = reference_machine();

    let shapes = PanelShapes::default();
    let cancel = CancelToken::new();
    // The second session is the last pass of the radiography.
    let service = CancelOnNthStart::new(SyntheticRenderService::uniform(1.0), cancel.clone(), 2);
    let ctx =
        RadiographyContext::new(&machine, &[], &shapes, &service).with_settings(fast_settings());
    let dir = tempfile::tempdir().unwrap();

    let images = ctx
        .capture(dir.path(), 0.0, None, &cancel)
        .unwrap()
        .expect("all band images exist, set is provisional");
    assert!(images.provisional);
    assert_eq!(images.bands.len(), 3);
    assert_eq!(service.inner.sessions_stopped(), 2);
}

#[test]
fn test_absorbing_cylinder_ct_round_trip() {
    init_logging();
    let mut machine = reference_machine();
    machine.sensor_resolution_x = 16;
    machine.sensor_resolution_y = 16;
    machine.spectrum = vec![0.2, 1.0, 0.4];

    let material = materials::by_name("Aluminium").unwrap();
    let object_radius = 4.0;
    let object = ScannedObject::new(
        material.name,
        TriangleMesh::cuboid(8.0, 8.0, 10.0),
        material.attenuation_table().unwrap(),
    );
    let objects = vec![object];

    // Beer-Lambert transmission through a centered cylinder, matching the
    // rotational symmetry of the scan.
    let chamber_radius = machine.chamber_radius_mm;
    let service = SyntheticRenderService::with_generator(move |scene| {
        let (height, width) = (scene.height, scene.width);
        let mut channels = [
            Array2::from_elem((height, width), 1.0),
            Array2::from_elem((height, width), 1.0),
            Array2::from_elem((height, width), 1.0),
        ];
        if scene.is_background {
            return channels;
        }
        let triple = scene.band_attenuations_m[0];
        for (c, image) in channels.iter_mut().enumerate() {
            let mu_per_mm = triple[c] * 1e-3;
            for x in 0..width {
                let lateral = ((x as f64 + 0.5) / width as f64 - 0.5) * 2.0 * chamber_radius;
                let chord = if lateral.abs() < object_radius {
                    2.0 * (object_radius * object_radius - lateral * lateral).sqrt()
                } else {
                    0.0
                };
                image.column_mut(x).fill((-mu_per_mm * chord).exp());
            }
        }
        channels
    });

    let shapes = PanelShapes::default();
    let cancel = CancelToken::new();
    let n_angles = 12;
    let mut sweep = SinogramSweep::new(
        &machine,
        &objects,
        &shapes,
        &service,
        fast_settings(),
        n_angles,
        &cancel,
    )
    .unwrap();
    while sweep.advance().unwrap().is_some() {}
    assert!(sweep.is_complete());

    // The central detector column saw the longest chord; the edges saw
    // nothing but background.
    let sino = sweep.sinogram();
    let mid = 8;
    assert!(sino[[0, mid, mid]] > 0.1, "no absorption on the center ray");
    assert!(sino[[0, 0, mid]].abs() < 1e-9, "absorption outside the object");

    let mut recon = ReconstructionSweep::from_sweep(sweep).unwrap();
    while recon.advance().is_some() {}
    assert_eq!(recon.phase(), EnginePhase::Done);

    let (volume, _) = recon.into_volume();
    assert_eq!(volume.dim(), (16, 16, 16));

    // The reconstructed attenuation peaks at the chamber center.
    let slice = volume.slice(ndarray::s![.., .., mid]);
    let mut peak = (0, 0);
    let mut peak_value = f64::NEG_INFINITY;
    for ((i, j), &v) in slice.indexed_iter() {
        if v > peak_value {
            peak_value = v;
            peak = (i, j);
        }
    }
    assert!(peak_value > 0.0);
    let center = 7.5;
    assert!(
        (peak.0 as f64 - center).abs() <= 2.0 && (peak.1 as f64 - center).abs() <= 2.0,
        "reconstruction peak {peak:?} far from center"
    );
}

#[test]
fn test_stopped_sweep_reports_stopped_not_done() {
    init_logging();
    let machine = reference_machine();
    let shapes = PanelShapes::default();
    let service = SyntheticRenderService::uniform(1.0);
    let cancel = CancelToken::new();
    let mut sweep = SinogramSweep::new(
        &machine,
        &[],
        &shapes,
        &service,
        fast_settings(),
        5,
        &cancel,
    )
    .unwrap();

    for _ in 0..3 {
        sweep.advance().unwrap().unwrap();
    }
    cancel.cancel();
    assert!(sweep.advance().unwrap().is_none());
    assert_eq!(sweep.phase(), EnginePhase::Stopped);
    assert_eq!(sweep.sampled_angles(), 3);
    assert!(!sweep.is_complete());
}
