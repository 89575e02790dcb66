use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::asset::Material;

/// Shading mode selector carried in `PassUniform::mode`.
pub const PASS_MODE_UNLIT: u32 = 0;
pub const PASS_MODE_SINGLE: u32 = 1;
pub const PASS_MODE_MULTI: u32 = 2;

/// Per-frame constants, bound once.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FrameUniform {
    pub view_proj: [[f32; 4]; 4],
    pub inverse_view_proj: [[f32; 4]; 4],
    /// xyz camera position, w = 1 while a probe capture is in flight.
    pub camera_pos: [f32; 4],
    /// rgb ambient color, w = SSAO enable.
    pub ambient: [f32; 4],
    /// x,y output size in pixels, z = irradiance enable, w = reflections enable.
    pub params: [f32; 4],
}

impl FrameUniform {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        view_proj: Mat4,
        camera_pos: Vec3,
        capturing: bool,
        ambient: Vec3,
        ssao: bool,
        irradiance: bool,
        reflections: bool,
        size: (u32, u32),
    ) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            inverse_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_pos: [
                camera_pos.x,
                camera_pos.y,
                camera_pos.z,
                if capturing { 1.0 } else { 0.0 },
            ],
            ambient: [
                ambient.x,
                ambient.y,
                ambient.z,
                if ssao { 1.0 } else { 0.0 },
            ],
            params: [
                size.0 as f32,
                size.1 as f32,
                if irradiance { 1.0 } else { 0.0 },
                if reflections { 1.0 } else { 0.0 },
            ],
        }
    }
}

/// Per-pass constants selected with a dynamic offset: which light a
/// multi-pass draw accumulates, whether ambient and emissive apply, and the
/// proxy transform for deferred light volumes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct PassUniform {
    pub light_model: [[f32; 4]; 4],
    pub light_index: u32,
    pub apply_ambient: u32,
    pub mode: u32,
    pub _pad: u32,
}

impl PassUniform {
    pub fn single_pass(apply_ambient: bool) -> Self {
        Self {
            light_model: Mat4::IDENTITY.to_cols_array_2d(),
            light_index: 0,
            apply_ambient: apply_ambient as u32,
            mode: PASS_MODE_SINGLE,
            _pad: 0,
        }
    }

    pub fn multi_pass(light_index: u32, apply_ambient: bool) -> Self {
        Self {
            light_model: Mat4::IDENTITY.to_cols_array_2d(),
            light_index,
            apply_ambient: apply_ambient as u32,
            mode: PASS_MODE_MULTI,
            _pad: 0,
        }
    }

    pub fn unlit() -> Self {
        Self {
            light_model: Mat4::IDENTITY.to_cols_array_2d(),
            light_index: 0,
            apply_ambient: 1,
            mode: PASS_MODE_UNLIT,
            _pad: 0,
        }
    }

    pub fn with_light_model(mut self, model: Mat4) -> Self {
        self.light_model = model.to_cols_array_2d();
        self
    }
}

/// One entry per render call, indexed by `instance_index`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ObjectData {
    pub model: [[f32; 4]; 4],
    pub material_index: u32,
    pub _pad: [u32; 3],
}

impl ObjectData {
    pub fn new(model: Mat4, material_index: u32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            material_index,
            _pad: [0; 3],
        }
    }
}

/// Material constants mirrored into a storage buffer, one entry per cached
/// material, indexed through `ObjectData::material_index`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MaterialData {
    pub base_color: [f32; 4],
    /// rgb emissive factor, w = alpha cutoff.
    pub emissive_cutoff: [f32; 4],
    /// x metallic, y roughness, z alpha mode (0 opaque, 1 mask, 2 blend),
    /// w two-sided.
    pub params: [f32; 4],
}

impl MaterialData {
    pub fn from_material(material: &Material) -> Self {
        let alpha_mode = match material.alpha_mode {
            crate::asset::AlphaMode::Opaque => 0.0,
            crate::asset::AlphaMode::Mask => 1.0,
            crate::asset::AlphaMode::Blend => 2.0,
        };
        Self {
            base_color: material.base_color.to_array(),
            emissive_cutoff: [
                material.emissive_factor.x,
                material.emissive_factor.y,
                material.emissive_factor.z,
                material.alpha_cutoff,
            ],
            params: [
                material.metallic_factor,
                material.roughness_factor,
                alpha_mode,
                material.two_sided as u32 as f32,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AlphaMode;
    use glam::Vec4;

    #[test]
    fn material_data_encodes_alpha_mode() {
        let blend = Material::new(Vec4::ONE).with_alpha_mode(AlphaMode::Blend);
        assert_eq!(MaterialData::from_material(&blend).params[2], 2.0);
        let mask = Material::new(Vec4::ONE).with_alpha_mode(AlphaMode::Mask);
        assert_eq!(MaterialData::from_material(&mask).params[2], 1.0);
    }

    #[test]
    fn frame_uniform_inverse_matches() {
        let vp = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);
        let frame = FrameUniform::new(
            vp,
            Vec3::ZERO,
            false,
            Vec3::splat(0.1),
            true,
            true,
            true,
            (640, 480),
        );
        let inv = Mat4::from_cols_array_2d(&frame.inverse_view_proj);
        assert!((vp * inv).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
