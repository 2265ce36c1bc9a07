//! X-ray radiography and computed tomography simulation.
//!
//! This crate drives a physically based renderer as a virtual X-ray machine:
//! it builds per-energy-band scenes of a scanning chamber, polls the
//! external render service for per-channel attenuation images, and assembles
//! them into spectrally weighted logarithmic-transmission radiographs. For
//! CT it sweeps the machine through a half rotation to build a sinogram and
//! reconstructs a volume by filtered backprojection.
//!
//! The renderer itself and the CAD geometry kernel are external
//! collaborators behind the [`render::RenderService`] and
//! [`scene::ShapeProducer`] traits; synthetic stand-ins for both ship with
//! the crate, so the whole pipeline runs in tests and demos.

pub mod attenuation;
pub mod machine;
pub mod materials;
pub mod radiograph;
pub mod render;
pub mod scene;
pub mod tomo;
pub mod units;

// Re-exports for easier access
pub use attenuation::AttenuationTable;
pub use machine::{EmitterTopology, EnergyBand, MachineConfig, ScannedObject};
pub use radiograph::{assemble_radiograph, MIN_INTENSITY_RATIO};
pub use render::{
    CancelToken, ImageSet, RadiographyContext, RadiographySettings, RenderService, RenderSession,
    SyntheticRenderService,
};
pub use scene::{PanelShapes, SceneBuilder, ShapeProducer, TriangleMesh};
pub use tomo::{angle_sequence, EnginePhase, ReconstructionSweep, SinogramSweep};
pub use units::SpectralValue;
