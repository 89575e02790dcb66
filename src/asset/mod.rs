mod cache;
mod handle;
mod material;
mod mesh;

pub use cache::AssetCache;
pub use handle::Handle;
pub use material::{AlphaMode, Material};
pub use mesh::{Mesh, MeshData};

pub use crate::render::Texture;

/// Owning store for everything render calls reference by handle.
#[derive(Default)]
pub struct Assets {
    pub meshes: AssetCache<Mesh>,
    pub materials: AssetCache<Material>,
    pub textures: AssetCache<Texture>,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }
}
