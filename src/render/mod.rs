//! External render-service interface and pass orchestration.
//!
//! The physically based renderer is a black box behind [`RenderService`]: it
//! takes a working directory with scene/config files and meshes, and hands
//! back a [`RenderSession`] that is polled for progress and convergence and
//! finally yields one float matrix per color channel.
//!
//! Sessions are explicit handles threaded through every call; there is no
//! process-wide current session. Cancellation is cooperative through a
//! [`CancelToken`] checked at every suspension point, and a cancelled
//! in-flight session is always stopped before control returns, so no
//! renderer process outlives the sweep that started it.

pub mod mock;
pub mod orchestrator;

pub use mock::SyntheticRenderService;
pub use orchestrator::{
    drive_session, ImageSet, PassKind, RadiographyContext, RadiographySettings, RenderOutcome,
    RenderPass, RenderSweep,
};

use crate::scene::{SceneDescription, SceneError};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the render service or the orchestration around it.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The render engine cannot be started at all (missing or uninstalled);
    /// surfaced before any pass begins.
    #[error("render service unavailable: {0}")]
    Unavailable(String),

    /// A running pass failed; carries enough context to retry or abort the
    /// sweep.
    #[error("render pass {pass} failed: {message}")]
    Pass { pass: usize, message: String },

    #[error("failed to prepare working directory {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Progress counters reported by a render session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStats {
    /// Sampling passes completed by the engine.
    pub pass: u32,
    /// Convergence fraction in `[0, 1]`.
    pub convergence: f64,
}

/// One in-flight render, polled by the caller.
pub trait RenderSession {
    /// True once the configured convergence threshold is reached.
    fn is_done(&self) -> bool;

    /// Refresh and return the engine's progress counters.
    fn update_stats(&mut self) -> Result<RenderStats, RenderError>;

    /// Stop the session and release renderer resources. Idempotent.
    fn stop(&mut self);

    /// Retrieve the current film, one matrix per color channel (R, G, B),
    /// shaped detector-y x detector-x. Valid on a stopped session; the
    /// result then reflects however far rendering got.
    fn images(&mut self) -> Result<[Array2<f64>; 3], RenderError>;
}

/// The external rendering engine.
pub trait RenderService {
    /// Start rendering the scene that was written into `workdir`.
    fn start(
        &self,
        workdir: &Path,
        scene: &SceneDescription,
    ) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// Cooperative cancellation handle.
///
/// Cloned into every sweep; checked between passes, between polls, between
/// angles and between reconstruction slices.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of whatever work holds a clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
