use glam::{Vec3, Vec4};

use crate::asset::Handle;
use crate::render::Texture;

/// How a material's alpha channel is interpreted. `Mask` discards below the
/// cutoff, `Blend` composites over the framebuffer and is drawn after all
/// opaque geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

impl AlphaMode {
    pub fn is_blend(self) -> bool {
        matches!(self, AlphaMode::Blend)
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub base_color: Vec4,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub two_sided: bool,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: Vec3,
    pub color_texture: Option<Handle<Texture>>,
    pub normal_texture: Option<Handle<Texture>>,
    pub metallic_roughness_texture: Option<Handle<Texture>>,
    pub emissive_texture: Option<Handle<Texture>>,
}

impl Material {
    pub fn new(base_color: Vec4) -> Self {
        Self {
            base_color,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            two_sided: false,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            emissive_factor: Vec3::ZERO,
            color_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            emissive_texture: None,
        }
    }

    pub fn white() -> Self {
        Self::new(Vec4::ONE)
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic_factor = metallic.clamp(0.0, 1.0);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness_factor = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive_factor = emissive;
        self
    }

    pub fn with_color_texture(mut self, texture: Handle<Texture>) -> Self {
        self.color_texture = Some(texture);
        self
    }

    pub fn with_normal_texture(mut self, texture: Handle<Texture>) -> Self {
        self.normal_texture = Some(texture);
        self
    }

    pub fn with_two_sided(mut self, two_sided: bool) -> Self {
        self.two_sided = two_sided;
        self
    }

    /// Blended materials go to the transparent partition of the call list
    /// and never cast shadows.
    pub fn is_blend(&self) -> bool {
        self.alpha_mode.is_blend()
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::white()
    }
}
