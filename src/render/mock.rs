//! Synthetic render service for tests and demos.
//!
//! Stands in for the external render engine: sessions synthesize their
//! channel images from the scene description through a caller-supplied
//! closure, and convergence is reached after a configurable number of polls.
//! Start/stop counters make leak assertions possible: every started session
//! must be stopped, cancelled or not.

use super::{RenderError, RenderService, RenderSession, RenderStats};
use crate::scene::SceneDescription;
use ndarray::Array2;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type ImageGenerator = dyn Fn(&SceneDescription) -> [Array2<f64>; 3] + Send + Sync;

#[derive(Default)]
struct SessionCounters {
    started: AtomicUsize,
    stopped: AtomicUsize,
}

/// A [`RenderService`] that computes images instead of rendering them.
pub struct SyntheticRenderService {
    generator: Box<ImageGenerator>,
    polls_to_converge: u32,
    unavailable: Option<String>,
    counters: Arc<SessionCounters>,
}

impl SyntheticRenderService {
    /// Every channel of every pass is a constant-valued image.
    pub fn uniform(value: f64) -> Self {
        Self::with_generator(move |scene| {
            let image = Array2::from_elem((scene.height, scene.width), value);
            [image.clone(), image.clone(), image]
        })
    }

    /// Synthesize images with an arbitrary closure over the scene
    /// description (resolution, background flag, per-object attenuation
    /// triples are all available there).
    pub fn with_generator(
        generator: impl Fn(&SceneDescription) -> [Array2<f64>; 3] + Send + Sync + 'static,
    ) -> Self {
        Self {
            generator: Box::new(generator),
            polls_to_converge: 0,
            unavailable: None,
            counters: Arc::default(),
        }
    }

    /// A service whose engine is missing: every start fails with
    /// [`RenderError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let mut service = Self::uniform(0.0);
        service.unavailable = Some(reason.into());
        service
    }

    /// Require `polls` progress polls before `is_done` reports convergence,
    /// to exercise the polling loop and cancellation windows.
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.polls_to_converge = polls;
        self
    }

    pub fn sessions_started(&self) -> usize {
        self.counters.started.load(Ordering::Relaxed)
    }

    pub fn sessions_stopped(&self) -> usize {
        self.counters.stopped.load(Ordering::Relaxed)
    }
}

impl RenderService for SyntheticRenderService {
    fn start(
        &self,
        _workdir: &Path,
        scene: &SceneDescription,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        if let Some(reason) = &self.unavailable {
            return Err(RenderError::Unavailable(reason.clone()));
        }
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SyntheticSession {
            images: (self.generator)(scene),
            polls_done: 0,
            polls_to_converge: self.polls_to_converge,
            stopped: false,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct SyntheticSession {
    images: [Array2<f64>; 3],
    polls_done: u32,
    polls_to_converge: u32,
    stopped: bool,
    counters: Arc<SessionCounters>,
}

impl RenderSession for SyntheticSession {
    fn is_done(&self) -> bool {
        self.polls_done >= self.polls_to_converge
    }

    fn update_stats(&mut self) -> Result<RenderStats, RenderError> {
        self.polls_done += 1;
        let convergence = if self.polls_to_converge == 0 {
            1.0
        } else {
            (self.polls_done as f64 / self.polls_to_converge as f64).min(1.0)
        };
        Ok(RenderStats {
            pass: self.polls_done,
            convergence,
        })
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.counters.stopped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn images(&mut self) -> Result<[Array2<f64>; 3], RenderError> {
        Ok(self.images.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::basic_machine;
    use crate::render::CancelToken;
    use crate::render::orchestrator::{drive_session, RenderOutcome};
    use crate::scene::{PanelShapes, SceneBuilder};
    use std::time::Duration;

    fn scene_for_test() -> SceneDescription {
        let machine = basic_machine();
        let shapes = PanelShapes::default();
        let builder = SceneBuilder::new(&machine, &shapes);
        let dir = tempfile::tempdir().unwrap();
        let exports = builder.export_meshes(dir.path(), 0.0, &[]).unwrap();
        builder.build(0.0, None, &[], 0.05, &exports).unwrap()
    }

    #[test]
    fn test_uniform_session_converges() {
        let service = SyntheticRenderService::uniform(3.0).with_latency(4);
        let scene = scene_for_test();
        let dir = tempfile::tempdir().unwrap();
        let mut session = service.start(dir.path(), &scene).unwrap();

        let mut polls = 0;
        let outcome = drive_session(
            session.as_mut(),
            &CancelToken::new(),
            Duration::ZERO,
            |_| polls += 1,
        )
        .unwrap();
        assert_eq!(outcome, RenderOutcome::Converged);
        assert_eq!(polls, 4);
        assert_eq!(service.sessions_stopped(), 1);

        let [r, g, b] = session.images().unwrap();
        assert_eq!(r.dim(), (8, 8));
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(r[[2, 5]], 3.0);
    }

    #[test]
    fn test_cancelled_session_is_stopped() {
        let service = SyntheticRenderService::uniform(1.0).with_latency(1000);
        let scene = scene_for_test();
        let dir = tempfile::tempdir().unwrap();
        let mut session = service.start(dir.path(), &scene).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome =
            drive_session(session.as_mut(), &cancel, Duration::ZERO, |_| {}).unwrap();
        assert_eq!(outcome, RenderOutcome::Stopped);
        assert_eq!(service.sessions_started(), 1);
        assert_eq!(service.sessions_stopped(), 1);

        // A stopped session still hands out its provisional film.
        assert!(session.images().is_ok());
    }
}
