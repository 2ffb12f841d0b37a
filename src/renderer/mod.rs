// Renderer module - Frame orchestration and scene plumbing
//
// Everything here talks to the GPU through `backend::GpuDevice`, never
// through ash directly.

pub mod camera;
pub mod engine;
pub mod frame;
pub mod input;
pub mod model;
pub mod render_system;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod scene;

pub use engine::{Engine, EngineSettings, FrameOutcome, SceneAssets};
pub use input::InputState;
