mod buffers;
mod context;
mod deferred;
mod error;
pub mod extract;
mod forward;
mod lights;
mod pipeline_builder;
mod post;
mod probes;
mod renderer;
pub mod shadow_atlas;
mod ssao;
mod targets;
mod texture;
mod uniforms;
mod vertex;

pub(crate) use pipeline_builder::PipelineBuilder;

pub use context::RenderContext;
pub use error::RenderError;
pub use extract::{FrameDecal, FrameLight, FrameLists, FrameProbe, RenderCall};
pub use lights::MAX_LIGHTS;
pub use probes::IrradianceGrid;
pub use renderer::{FrameStats, Renderer};
pub use shadow_atlas::{ShadowAtlas, ShadowSlot, TileRect};
pub use texture::Texture;
pub use vertex::{v, Vertex};
