//! Tomographic sweep and reconstruction engine.
//!
//! A CT scan is two sequential phases. Sampling renders one radiography per
//! rotation angle and stacks them into a sinogram; reconstruction runs
//! filtered backprojection per detector row and stacks the slices into a
//! volume. Both phases are pull-based: each `advance()` call does one unit
//! of work (one angle, one slice) and control returns to the caller, who can
//! read the partial sinogram or volume for live display, pace the scan, or
//! cancel it. Cancellation truncates: whatever was already produced stays
//! valid, nothing is rolled back.

pub mod backprojection;

pub use backprojection::inverse_radon;

use crate::machine::{MachineConfig, MachineError, ScannedObject};
use crate::radiograph::{assemble_radiograph, RadiographError};
use crate::render::{
    CancelToken, RadiographyContext, RadiographySettings, RenderError, RenderService,
};
use crate::scene::ShapeProducer;
use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayView3};
use tempfile::TempDir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TomographyError {
    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("a scan needs at least one rotation angle")]
    NoAngles,

    /// Rendering failed mid-sweep; the whole sampling phase aborts, since a
    /// sinogram with missing slabs cannot be reconstructed.
    #[error("rendering failed at angle {angle} ({angle_deg} deg): {source}")]
    Render {
        angle: usize,
        angle_deg: f64,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Radiograph(#[from] RadiographError),

    #[error("cannot reconstruct an incomplete sinogram ({sampled}/{expected} angles)")]
    IncompleteSinogram { sampled: usize, expected: usize },

    #[error("failed to create scan working directory: {0}")]
    Workdir(std::io::Error),
}

/// Engine state, advanced by the sweeps and readable between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    /// Working on `angle` of `total`.
    Sampling { angle: usize, total: usize },
    /// Working on detector row `slice` of `total`.
    Reconstructing { slice: usize, total: usize },
    Done,
    /// Cancelled; partial results remain valid.
    Stopped,
}

/// Rotation angles for an `n`-projection scan, in degrees.
///
/// Half a rotation suffices for attenuation imaging, so the angles span
/// `[0, 180)` uniformly, offset by half the angular step so none lands
/// exactly on zero.
pub fn angle_sequence(n: usize) -> Vec<f64> {
    let step = 180.0 / n as f64;
    (0..n).map(|i| (i as f64 + 0.5) * step).collect()
}

/// Sampling phase: build the sinogram one angle at a time.
///
/// The sinogram is indexed `[angle, detector-x, detector-y]`; each
/// radiograph is written transposed into its angle slab. The background
/// image is rendered once at the first angle and reused afterwards. One
/// working directory lives for the whole sweep, so object meshes are
/// exported once and reused across angles.
pub struct SinogramSweep<'a> {
    machine: &'a MachineConfig,
    objects: &'a [ScannedObject],
    shapes: &'a dyn ShapeProducer,
    service: &'a dyn RenderService,
    settings: RadiographySettings,
    cancel: CancelToken,
    workdir: TempDir,
    angles: Vec<f64>,
    sino: Array3<f64>,
    background: Option<Array2<f64>>,
    next_angle: usize,
    phase: EnginePhase,
}

impl<'a> SinogramSweep<'a> {
    pub fn new(
        machine: &'a MachineConfig,
        objects: &'a [ScannedObject],
        shapes: &'a dyn ShapeProducer,
        service: &'a dyn RenderService,
        settings: RadiographySettings,
        n_angles: usize,
        cancel: &CancelToken,
    ) -> Result<Self, TomographyError> {
        machine.validate()?;
        if n_angles == 0 {
            return Err(TomographyError::NoAngles);
        }
        let workdir = TempDir::new().map_err(TomographyError::Workdir)?;
        debug!(
            "sinogram sweep over {n_angles} angles in {}",
            workdir.path().display()
        );
        Ok(Self {
            machine,
            objects,
            shapes,
            service,
            settings,
            cancel: cancel.clone(),
            workdir,
            angles: angle_sequence(n_angles),
            sino: Array3::zeros((
                n_angles,
                machine.sensor_resolution_x,
                machine.sensor_resolution_y,
            )),
            background: None,
            next_angle: 0,
            phase: EnginePhase::Idle,
        })
    }

    /// Sample one angle. Returns the finished angle index, or `None` once
    /// the sweep is done or was cancelled.
    pub fn advance(&mut self) -> Result<Option<usize>, TomographyError> {
        if matches!(self.phase, EnginePhase::Done | EnginePhase::Stopped) {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            info!(
                "sampling cancelled after {} of {} angles",
                self.next_angle,
                self.angles.len()
            );
            self.phase = EnginePhase::Stopped;
            return Ok(None);
        }

        let i = self.next_angle;
        let total = self.angles.len();
        let angle_deg = self.angles[i];
        self.phase = EnginePhase::Sampling { angle: i, total };

        let ctx = RadiographyContext::new(self.machine, self.objects, self.shapes, self.service)
            .with_settings(self.settings.clone());
        let captured = ctx
            .capture(
                self.workdir.path(),
                angle_deg,
                self.background.as_ref(),
                &self.cancel,
            )
            .map_err(|source| TomographyError::Render {
                angle: i,
                angle_deg,
                source,
            })?;
        let Some(images) = captured else {
            info!("sampling cancelled during angle {i} ({angle_deg} deg)");
            self.phase = EnginePhase::Stopped;
            return Ok(None);
        };

        if self.background.is_none() {
            self.background = Some(images.background.clone());
        }

        let radiograph = assemble_radiograph(self.machine, &images)?;
        self.sino.slice_mut(s![i, .., ..]).assign(&radiograph.t());
        self.next_angle += 1;
        debug!("sampled angle {i} ({angle_deg} deg)");

        self.phase = if images.provisional {
            // The final pass of this angle was stopped mid-refinement; its
            // slab stands, but the sweep ends here.
            EnginePhase::Stopped
        } else if self.next_angle == total {
            EnginePhase::Done
        } else {
            EnginePhase::Sampling {
                angle: self.next_angle,
                total,
            }
        };
        Ok(Some(i))
    }

    /// The sinogram as sampled so far; slabs at indices >=
    /// [`Self::sampled_angles`] are still zero.
    pub fn sinogram(&self) -> ArrayView3<'_, f64> {
        self.sino.view()
    }

    /// Number of valid angle slabs.
    pub fn sampled_angles(&self) -> usize {
        self.next_angle
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == EnginePhase::Done
    }

    /// Tear down the sweep, keeping the (possibly truncated) sinogram.
    pub fn into_sinogram(self) -> (Array3<f64>, Vec<f64>, EnginePhase) {
        (self.sino, self.angles, self.phase)
    }
}

/// Reconstruction phase: filtered backprojection, one detector row at a
/// time, into a volume indexed `[x, x, detector-y]`.
pub struct ReconstructionSweep {
    sino: Array3<f64>,
    angles: Vec<f64>,
    volume: Array3<f64>,
    next_slice: usize,
    cancel: CancelToken,
    phase: EnginePhase,
}

impl ReconstructionSweep {
    /// Take over from a finished sampling sweep.
    ///
    /// Refuses a truncated sinogram; reconstruction never starts on
    /// incomplete sampling data.
    pub fn from_sweep(sweep: SinogramSweep<'_>) -> Result<Self, TomographyError> {
        if !sweep.is_complete() {
            return Err(TomographyError::IncompleteSinogram {
                sampled: sweep.sampled_angles(),
                expected: sweep.angles.len(),
            });
        }
        let cancel = sweep.cancel.clone();
        let (sino, angles, _) = sweep.into_sinogram();
        Ok(Self::from_sinogram(sino, angles, &cancel))
    }

    /// Reconstruct from an externally stored sinogram.
    pub fn from_sinogram(sino: Array3<f64>, angles: Vec<f64>, cancel: &CancelToken) -> Self {
        let (_, width, height) = sino.dim();
        Self {
            sino,
            angles,
            volume: Array3::zeros((width, width, height)),
            next_slice: 0,
            cancel: cancel.clone(),
            phase: EnginePhase::Idle,
        }
    }

    /// Reconstruct one detector-y slice. Returns the finished slice index,
    /// or `None` once done or cancelled.
    pub fn advance(&mut self) -> Option<usize> {
        if matches!(self.phase, EnginePhase::Done | EnginePhase::Stopped) {
            return None;
        }
        let total = self.volume.dim().2;
        if self.cancel.is_cancelled() {
            info!(
                "reconstruction cancelled after {} of {total} slices",
                self.next_slice
            );
            self.phase = EnginePhase::Stopped;
            return None;
        }

        let z = self.next_slice;
        self.phase = EnginePhase::Reconstructing { slice: z, total };
        let projections = self.sino.slice(s![.., .., z]);
        let image = inverse_radon(projections, &self.angles);
        self.volume.slice_mut(s![.., .., z]).assign(&image);
        self.next_slice += 1;
        debug!("reconstructed slice {z}");

        self.phase = if self.next_slice == total {
            EnginePhase::Done
        } else {
            EnginePhase::Reconstructing {
                slice: self.next_slice,
                total,
            }
        };
        Some(z)
    }

    /// The volume as reconstructed so far; slices at indices >=
    /// [`Self::reconstructed_slices`] are still zero.
    pub fn volume(&self) -> ArrayView3<'_, f64> {
        self.volume.view()
    }

    pub fn reconstructed_slices(&self) -> usize {
        self.next_slice
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn into_volume(self) -> (Array3<f64>, EnginePhase) {
        (self.volume, self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::basic_machine;
    use crate::render::SyntheticRenderService;
    use crate::scene::PanelShapes;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn fast_settings() -> RadiographySettings {
        RadiographySettings {
            max_error: 0.05,
            poll_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_angle_sequence_properties() {
        for n in [1, 4, 7, 24] {
            let angles = angle_sequence(n);
            let step = 180.0 / n as f64;
            assert_eq!(angles.len(), n);
            assert_relative_eq!(angles[0], 0.5 * step, max_relative = 1e-12);
            for (i, &a) in angles.iter().enumerate() {
                assert!(a > 0.0 && a < 180.0);
                assert_relative_eq!(a, (i as f64 + 0.5) * step, max_relative = 1e-12);
            }
            for pair in angles.windows(2) {
                assert!(pair[1] > pair[0]);
                assert_relative_eq!(pair[1] - pair[0], step, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_empty_chamber_sweep_yields_zero_sinogram() {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let service = SyntheticRenderService::uniform(1.0);
        let cancel = CancelToken::new();
        let n = 4;
        let mut sweep = SinogramSweep::new(
            &machine,
            &[],
            &shapes,
            &service,
            fast_settings(),
            n,
            &cancel,
        )
        .unwrap();

        assert_eq!(sweep.phase(), EnginePhase::Idle);
        let mut seen = Vec::new();
        while let Some(i) = sweep.advance().unwrap() {
            seen.push(i);
            assert_eq!(sweep.sampled_angles(), i + 1);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(sweep.is_complete());
        assert_eq!(sweep.sinogram().dim(), (4, 8, 8));
        assert!(sweep.sinogram().iter().all(|&v| v.abs() < 1e-12));

        // One background pass at the first angle, one band pass per angle.
        assert_eq!(service.sessions_started(), n + 1);
        assert_eq!(service.sessions_stopped(), n + 1);
    }

    #[test]
    fn test_cancellation_truncates_sinogram() {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let service = SyntheticRenderService::uniform(1.0);
        let cancel = CancelToken::new();
        let mut sweep = SinogramSweep::new(
            &machine,
            &[],
            &shapes,
            &service,
            fast_settings(),
            6,
            &cancel,
        )
        .unwrap();

        assert_eq!(sweep.advance().unwrap(), Some(0));
        assert_eq!(sweep.advance().unwrap(), Some(1));
        cancel.cancel();
        assert_eq!(sweep.advance().unwrap(), None);
        assert_eq!(sweep.phase(), EnginePhase::Stopped);
        assert_eq!(sweep.sampled_angles(), 2);
        // Exhausted for good, even without the token.
        assert_eq!(sweep.advance().unwrap(), None);

        // No renderer session leaked.
        assert_eq!(service.sessions_started(), service.sessions_stopped());
    }

    #[test]
    fn test_reconstruction_refuses_incomplete_sinogram() {
        let machine = basic_machine();
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
        sweep.advance().unwrap();
        cancel.cancel();
        sweep.advance().unwrap();

        match ReconstructionSweep::from_sweep(sweep) {
            Err(TomographyError::IncompleteSinogram { sampled, expected }) => {
                assert_eq!(sampled, 1);
                assert_eq!(expected, 5);
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected IncompleteSinogram"),
        }
    }

    #[test]
    fn test_reconstruction_of_zero_sinogram() {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let service = SyntheticRenderService::uniform(1.0);
        let cancel = CancelToken::new();
        let mut sweep = SinogramSweep::new(
            &machine,
            &[],
            &shapes,
            &service,
            fast_settings(),
            3,
            &cancel,
        )
        .unwrap();
        while sweep.advance().unwrap().is_some() {}

        let mut recon = ReconstructionSweep::from_sweep(sweep).unwrap();
        let mut slices = 0;
        while recon.advance().is_some() {
            slices += 1;
            assert_eq!(recon.reconstructed_slices(), slices);
        }
        assert_eq!(slices, 8);
        assert_eq!(recon.phase(), EnginePhase::Done);
        let (volume, phase) = recon.into_volume();
        assert_eq!(phase, EnginePhase::Done);
        assert_eq!(volume.dim(), (8, 8, 8));
        assert!(volume.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn test_reconstruction_cancellation_truncates_volume() {
        let sino = Array3::<f64>::zeros((4, 8, 8));
        let cancel = CancelToken::new();
        let mut recon = ReconstructionSweep::from_sinogram(sino, angle_sequence(4), &cancel);
        assert_eq!(recon.advance(), Some(0));
        assert_eq!(recon.advance(), Some(1));
        cancel.cancel();
        assert_eq!(recon.advance(), None);
        assert_eq!(recon.phase(), EnginePhase::Stopped);
        assert_eq!(recon.reconstructed_slices(), 2);
    }

    #[test]
    fn test_render_failure_aborts_sampling_with_context() {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let service = SyntheticRenderService::unavailable("engine not installed");
        let cancel = CancelToken::new();
        let mut sweep = SinogramSweep::new(
            &machine,
            &[],
            &shapes,
            &service,
            fast_settings(),
            4,
            &cancel,
        )
        .unwrap();

        match sweep.advance() {
            Err(TomographyError::Render { angle: 0, .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected a render failure"),
        }
    }

    #[test]
    fn test_invalid_machine_rejected_before_sampling() {
        let mut machine = basic_machine();
        machine.emitter_samples = 0;
        let shapes = PanelShapes::default();
        let service = SyntheticRenderService::uniform(1.0);
        let cancel = CancelToken::new();
        let result = SinogramSweep::new(
            &machine,
            &[],
            &shapes,
            &service,
            fast_settings(),
            4,
            &cancel,
        );
        assert!(matches!(result, Err(TomographyError::Machine(_))));
    }
}
