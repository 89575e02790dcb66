//! Headless forward/deferred scene renderer.
//!
//! A [`scene::Scene`] is a transform hierarchy of mesh, light, decal and
//! probe entities. Each [`render::Renderer::render_scene`] call walks it,
//! culls and sorts the visible set, lays shadow maps into a shared atlas
//! and shades the frame with the pipeline selected in
//! [`settings::RenderSettings`]. Reflection and irradiance probes bake
//! offline through the same forward path and feed later frames.

pub mod asset;
pub mod math;
pub mod render;
pub mod scene;
pub mod settings;

pub use asset::{Assets, Handle, Material, Mesh, MeshData};
pub use render::{FrameStats, IrradianceGrid, RenderError, Renderer, Texture};
pub use scene::{Camera, Entity, Scene};
pub use settings::{LightMode, PipelineMode, RenderSettings};
