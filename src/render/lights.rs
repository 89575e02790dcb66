use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::render::extract::FrameLight;
use crate::render::shadow_atlas::ShadowSlot;

/// Hard cap on lights shaded in one frame. Lights beyond this are dropped
/// from shading entirely and reported in the frame stats.
pub const MAX_LIGHTS: usize = 5;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LightRaw {
    /// xyz position, w falloff distance.
    pub position_falloff: [f32; 4],
    /// rgb color, w intensity.
    pub color_intensity: [f32; 4],
    /// xyz direction, w kind ordinal (0 point, 1 spot, 2 directional).
    pub direction_kind: [f32; 4],
    /// x cos(cone angle), y cone exponent, z has-shadow flag, w shadow bias.
    pub cone_shadow: [f32; 4],
    /// Normalized atlas rect: x, y, width, height.
    pub shadow_uv: [f32; 4],
    pub shadow_view_proj: [[f32; 4]; 4],
}

impl LightRaw {
    pub fn pack(light: &FrameLight, slot: Option<&ShadowSlot>) -> Self {
        let (has_shadow, uv_rect, view_proj) = match slot {
            Some(slot) => (1.0, slot.uv_rect, slot.view_proj.to_cols_array_2d()),
            None => (0.0, [0.0; 4], glam::Mat4::IDENTITY.to_cols_array_2d()),
        };
        Self {
            position_falloff: [
                light.position.x,
                light.position.y,
                light.position.z,
                light.max_distance,
            ],
            color_intensity: [
                light.color.x,
                light.color.y,
                light.color.z,
                light.intensity,
            ],
            direction_kind: [
                light.direction.x,
                light.direction.y,
                light.direction.z,
                light.kind.ordinal() as f32,
            ],
            cone_shadow: [
                light.cone_angle.cos(),
                light.cone_exponent,
                has_shadow,
                light.shadow_bias,
            ],
            shadow_uv: uv_rect,
            shadow_view_proj: view_proj,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LightsUniform {
    /// x = light count, y/z/w unused.
    pub counts: [u32; 4],
    pub ambient: [f32; 4],
    pub lights: [LightRaw; MAX_LIGHTS],
}

impl LightsUniform {
    /// Packs up to `MAX_LIGHTS` lights. `shadow_lookup[i]` is the atlas slot
    /// claimed by `lights[i]`, if any. Returns the uniform and the number of
    /// lights that did not fit.
    pub fn pack(
        lights: &[FrameLight],
        shadow_lookup: &[Option<ShadowSlot>],
        ambient: Vec3,
    ) -> (Self, u32) {
        let mut uniform = Self::zeroed();
        let count = lights.len().min(MAX_LIGHTS);
        uniform.counts[0] = count as u32;
        uniform.ambient = [ambient.x, ambient.y, ambient.z, 1.0];

        for (dst, (index, light)) in uniform
            .lights
            .iter_mut()
            .zip(lights.iter().enumerate())
            .take(count)
        {
            let slot = shadow_lookup.get(index).and_then(|s| s.as_ref());
            *dst = LightRaw::pack(light, slot);
        }

        let dropped = (lights.len() - count) as u32;
        (uniform, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::LightKind;
    use glam::Mat4;

    fn light(kind: LightKind) -> FrameLight {
        FrameLight {
            entity_index: 0,
            kind,
            position: Vec3::new(1.0, 2.0, 3.0),
            direction: Vec3::NEG_Z,
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 3.0,
            max_distance: 50.0,
            cone_angle: 0.5,
            cone_exponent: 8.0,
            area_size: 100.0,
            cast_shadow: true,
            shadow_bias: 0.002,
        }
    }

    #[test]
    fn pack_caps_at_capacity_and_reports_dropped() {
        let lights = vec![light(LightKind::Point); MAX_LIGHTS + 3];
        let lookup = vec![None; lights.len()];
        let (uniform, dropped) = LightsUniform::pack(&lights, &lookup, Vec3::ZERO);
        assert_eq!(uniform.counts[0], MAX_LIGHTS as u32);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn shadowless_light_packs_identity_and_zero_rect() {
        let raw = LightRaw::pack(&light(LightKind::Spot), None);
        assert_eq!(raw.cone_shadow[2], 0.0);
        assert_eq!(raw.shadow_uv, [0.0; 4]);
        assert_eq!(
            raw.shadow_view_proj,
            Mat4::IDENTITY.to_cols_array_2d()
        );
    }

    #[test]
    fn shadowed_light_carries_slot_rect_and_matrix() {
        let vp = Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0);
        let slot = ShadowSlot {
            light_index: 0,
            tile: 3,
            view_proj: vp,
            uv_rect: [0.5, 0.5, 0.25, 0.25],
            bias: 0.002,
        };
        let raw = LightRaw::pack(&light(LightKind::Spot), Some(&slot));
        assert_eq!(raw.cone_shadow[2], 1.0);
        assert_eq!(raw.shadow_uv, [0.5, 0.5, 0.25, 0.25]);
        assert_eq!(raw.shadow_view_proj, vp.to_cols_array_2d());
        assert_eq!(raw.direction_kind[3], 1.0);
    }
}
