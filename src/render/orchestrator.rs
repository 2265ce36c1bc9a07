//! Pass orchestration for one radiography.
//!
//! A radiography is a short sequence of render passes: one background pass
//! of the empty chamber, then one pass per group of three energy sub-bands.
//! [`RenderSweep`] is the lazy, caller-driven form of that sequence. Each
//! `next_pass` call prepares the working directory, builds the scene for the
//! pass and starts a session, then control returns to the caller, who polls
//! the session (typically through [`drive_session`]) at its own pace.
//!
//! Convergence can take unbounded wall-clock time, so everything here is
//! abortable: cancellation between passes exhausts the sweep, and
//! cancellation while polling stops the in-flight session before returning.

use super::{CancelToken, RenderError, RenderService, RenderSession, RenderStats};
use crate::machine::{EnergyBand, MachineConfig, ScannedObject};
use crate::scene::{MeshExports, SceneBuilder, ShapeProducer, RENDER_CFG_FILE, SCENE_FILE};
use log::{debug, info};
use ndarray::Array2;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Knobs for driving one radiography.
#[derive(Debug, Clone)]
pub struct RadiographySettings {
    /// Convergence threshold handed to the renderer, clamped to `[0, 1]`.
    pub max_error: f64,
    /// How often an in-flight session is polled.
    pub poll_interval: Duration,
}

impl Default for RadiographySettings {
    fn default() -> Self {
        Self {
            max_error: 0.02,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What one render pass computes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassKind {
    /// Empty-chamber incident intensity.
    Background,
    /// Three energy sub-bands packed into the R/G/B channels.
    Bands {
        /// Index of the first sub-band within the machine's band sequence.
        first_band: usize,
        bands: [EnergyBand; 3],
    },
}

/// A started render pass: the working directory holds its scene files, the
/// session is live and ready to be polled.
pub struct RenderPass {
    pub index: usize,
    pub kind: PassKind,
    pub session: Box<dyn RenderSession>,
}

/// How a driven session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The convergence threshold was reached.
    Converged,
    /// Cancelled before convergence; retrieved images are provisional.
    Stopped,
}

/// Everything needed to render radiographies of one machine setup.
///
/// Machine and objects are borrowed from the owning document; the context
/// never mutates them.
pub struct RadiographyContext<'a> {
    pub machine: &'a MachineConfig,
    pub objects: &'a [ScannedObject],
    pub shapes: &'a dyn ShapeProducer,
    pub service: &'a dyn RenderService,
    pub settings: RadiographySettings,
}

impl<'a> RadiographyContext<'a> {
    pub fn new(
        machine: &'a MachineConfig,
        objects: &'a [ScannedObject],
        shapes: &'a dyn ShapeProducer,
        service: &'a dyn RenderService,
    ) -> Self {
        Self {
            machine,
            objects,
            shapes,
            service,
            settings: RadiographySettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RadiographySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start the lazy pass sequence for one angle.
    ///
    /// `background` controls whether the empty-chamber pass is included; a
    /// caller holding a cached background image skips it.
    pub fn sweep<'s>(
        &'s self,
        workdir: &'s Path,
        angle_deg: f64,
        background: bool,
        cancel: &CancelToken,
    ) -> RenderSweep<'s> {
        let mut plan = Vec::new();
        if background {
            plan.push(PassKind::Background);
        }
        for (i, bands) in self.machine.render_passes().into_iter().enumerate() {
            plan.push(PassKind::Bands {
                first_band: 3 * i,
                bands,
            });
        }
        RenderSweep {
            machine: self.machine,
            objects: self.objects,
            shapes: self.shapes,
            service: self.service,
            max_error: self.settings.max_error,
            workdir,
            angle_deg,
            plan,
            next: 0,
            exports: None,
            cancel: cancel.clone(),
            exhausted: false,
        }
    }

    /// Render one complete radiography into an [`ImageSet`].
    ///
    /// Returns `Ok(None)` when cancellation truncated the pass sequence
    /// before all band images existed. Cancellation while the final pass is
    /// polling still yields the full set, flagged provisional.
    pub fn capture(
        &self,
        workdir: &Path,
        angle_deg: f64,
        cached_background: Option<&Array2<f64>>,
        cancel: &CancelToken,
    ) -> Result<Option<ImageSet>, RenderError> {
        let mut sweep = self.sweep(workdir, angle_deg, cached_background.is_none(), cancel);
        let expected_bands = self.machine.rounded_samples();

        let mut background = cached_background.cloned();
        let mut bands: Vec<Array2<f64>> = Vec::with_capacity(expected_bands);
        let mut provisional = false;

        while let Some(mut pass) = sweep.next_pass()? {
            let index = pass.index;
            let outcome = drive_session(
                pass.session.as_mut(),
                cancel,
                self.settings.poll_interval,
                |stats| {
                    debug!(
                        "angle {angle_deg} pass {index}: engine pass {} convergence {:.1}%",
                        stats.pass,
                        100.0 * stats.convergence
                    );
                },
            )
            .map_err(|e| annotate(e, index))?;

            let images = pass.session.images().map_err(|e| annotate(e, index))?;
            match pass.kind {
                PassKind::Background => {
                    // Only one channel of the empty-chamber render is kept.
                    let [r, _, _] = images;
                    background = Some(r);
                }
                PassKind::Bands { .. } => bands.extend(images),
            }

            if outcome == RenderOutcome::Stopped {
                provisional = true;
                break;
            }
        }

        let Some(background) = background else {
            info!("radiography at {angle_deg} deg cancelled before the background pass finished");
            return Ok(None);
        };
        if bands.len() != expected_bands {
            info!(
                "radiography at {angle_deg} deg truncated: {} of {expected_bands} band images",
                bands.len()
            );
            return Ok(None);
        }

        Ok(Some(ImageSet {
            background,
            bands,
            provisional,
        }))
    }
}

/// Background plus per-band detector images for one angle.
///
/// Produced progressively by the renderer; `provisional` marks a set whose
/// final pass was stopped before reaching its convergence threshold (an
/// expected outcome under cancellation, not an error).
#[derive(Debug, Clone)]
pub struct ImageSet {
    /// Incident intensity image of the empty chamber.
    pub background: Array2<f64>,
    /// One image per energy sub-band, ascending energy order.
    pub bands: Vec<Array2<f64>>,
    pub provisional: bool,
}

/// Lazy pass sequence for one radiography. See the module docs.
pub struct RenderSweep<'a> {
    machine: &'a MachineConfig,
    objects: &'a [ScannedObject],
    shapes: &'a dyn ShapeProducer,
    service: &'a dyn RenderService,
    max_error: f64,
    workdir: &'a Path,
    angle_deg: f64,
    plan: Vec<PassKind>,
    next: usize,
    exports: Option<MeshExports>,
    cancel: CancelToken,
    exhausted: bool,
}

impl RenderSweep<'_> {
    /// Total number of passes in the plan.
    pub fn pass_count(&self) -> usize {
        self.plan.len()
    }

    /// Prepare and start the next pass, or `Ok(None)` once the sequence is
    /// exhausted or cancelled. After cancellation no further pass ever
    /// starts.
    pub fn next_pass(&mut self) -> Result<Option<RenderPass>, RenderError> {
        if self.exhausted || self.next >= self.plan.len() {
            self.exhausted = true;
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            debug!("render sweep at {} deg cancelled between passes", self.angle_deg);
            self.exhausted = true;
            return Ok(None);
        }

        let builder = SceneBuilder::new(self.machine, self.shapes);

        // Meshes are shared by all passes of this sweep; export them once.
        if self.exports.is_none() {
            self.exports = Some(builder.export_meshes(self.workdir, self.angle_deg, self.objects)?);
        }
        let exports = match &self.exports {
            Some(exports) => exports,
            None => unreachable!(),
        };

        let kind = self.plan[self.next];
        let bands = match &kind {
            PassKind::Background => None,
            PassKind::Bands { bands, .. } => Some(bands),
        };
        let scene = builder.build(self.angle_deg, bands, self.objects, self.max_error, exports)?;

        for (name, text) in [(SCENE_FILE, &scene.scene_text), (RENDER_CFG_FILE, &scene.config_text)]
        {
            let path = self.workdir.join(name);
            fs::write(&path, text).map_err(|source| RenderError::Workdir { path, source })?;
        }

        let index = self.next;
        debug!(
            "starting pass {index}/{} at {} deg ({kind:?})",
            self.plan.len(),
            self.angle_deg
        );
        let session = self.service.start(self.workdir, &scene)?;
        self.next += 1;
        Ok(Some(RenderPass {
            index,
            kind,
            session,
        }))
    }
}

/// Poll a session until it converges or the token cancels it.
///
/// The session is always stopped before this returns (on convergence, on
/// cancellation, and on error), so renderer resources never leak past the
/// call. `on_progress` sees every intermediate stats sample; the poll pace
/// is the caller's (`poll_interval`).
pub fn drive_session(
    session: &mut dyn RenderSession,
    cancel: &CancelToken,
    poll_interval: Duration,
    mut on_progress: impl FnMut(RenderStats),
) -> Result<RenderOutcome, RenderError> {
    loop {
        if cancel.is_cancelled() {
            session.stop();
            return Ok(RenderOutcome::Stopped);
        }
        if session.is_done() {
            session.stop();
            return Ok(RenderOutcome::Converged);
        }
        match session.update_stats() {
            Ok(stats) => on_progress(stats),
            Err(e) => {
                session.stop();
                return Err(e);
            }
        }
        if !poll_interval.is_zero() {
            std::thread::sleep(poll_interval);
        }
    }
}

fn annotate(error: RenderError, pass: usize) -> RenderError {
    match error {
        e @ RenderError::Pass { .. } => e,
        other => RenderError::Pass {
            pass,
            message: other.to_string(),
        },
    }
}
