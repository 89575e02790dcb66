use glam::{Mat4, Vec3};

use crate::asset::Assets;
use crate::math::Frustum;
use crate::render::extract::{FrameLight, RenderCall};
use crate::render::{PipelineBuilder, Vertex};
use crate::scene::LightKind;

/// Normalized tile rect inside the atlas texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileRect {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// Fixed tile layout: three half-edge tiles and four quarter-edge tiles,
/// claimed strictly in this order. The geometry never changes at runtime.
pub const TILE_TABLE: [TileRect; 7] = [
    TileRect { x: 0.0, y: 0.0, size: 0.5 },
    TileRect { x: 0.5, y: 0.0, size: 0.5 },
    TileRect { x: 0.0, y: 0.5, size: 0.5 },
    TileRect { x: 0.5, y: 0.5, size: 0.25 },
    TileRect { x: 0.75, y: 0.5, size: 0.25 },
    TileRect { x: 0.5, y: 0.75, size: 0.25 },
    TileRect { x: 0.75, y: 0.75, size: 0.25 },
];

pub const MAX_SHADOW_TILES: usize = TILE_TABLE.len();

const TILE_UNIFORM_STRIDE: u64 = 256;

/// A tile claimed by one light for one frame.
#[derive(Clone, Copy, Debug)]
pub struct ShadowSlot {
    /// Index into the frame light list.
    pub light_index: usize,
    pub tile: usize,
    pub view_proj: Mat4,
    pub uv_rect: [f32; 4],
    pub bias: f32,
}

fn shadow_up(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Ortho shadow camera for a directional light, with the view-space X/Y
/// translation snapped to shadow-texel multiples so the shadow does not
/// shimmer as the light (or its anchor) moves.
pub fn directional_view_proj(light: &FrameLight, tile_resolution: u32) -> Mat4 {
    let half = light.area_size * 0.5;
    let proj = Mat4::orthographic_rh(-half, half, -half, half, 0.1, light.max_distance);

    let target = light.position + light.direction * 20.0;
    let mut view = Mat4::look_at_rh(light.position, target, shadow_up(light.direction));

    let texel = light.area_size / tile_resolution.max(1) as f32;
    view.w_axis.x = (view.w_axis.x / texel).round() * texel;
    view.w_axis.y = (view.w_axis.y / texel).round() * texel;

    proj * view
}

/// Perspective shadow camera for a spot light: fov covers the full cone,
/// square aspect.
pub fn spot_view_proj(light: &FrameLight) -> Mat4 {
    let fov = (light.cone_angle * 2.0).clamp(0.01, std::f32::consts::PI - 0.01);
    let proj = Mat4::perspective_rh(fov, 1.0, 0.1, light.max_distance);
    let view = Mat4::look_at_rh(
        light.position,
        light.position + light.direction,
        shadow_up(light.direction),
    );
    proj * view
}

/// Claims tiles in light submission order. Point lights never claim a tile;
/// once the table is exhausted the remaining casters are counted and shade
/// unshadowed.
pub fn assign_tiles(lights: &[FrameLight], atlas_size: u32) -> (Vec<ShadowSlot>, u32) {
    let mut slots = Vec::new();
    let mut dropped = 0u32;

    for (light_index, light) in lights.iter().enumerate() {
        if !light.cast_shadow || light.kind == LightKind::Point {
            continue;
        }
        if slots.len() == MAX_SHADOW_TILES {
            dropped += 1;
            continue;
        }

        let tile = slots.len();
        let rect = TILE_TABLE[tile];
        let tile_resolution = (rect.size * atlas_size as f32) as u32;
        let view_proj = match light.kind {
            LightKind::Directional => directional_view_proj(light, tile_resolution),
            LightKind::Spot => spot_view_proj(light),
            LightKind::Point => unreachable!(),
        };

        slots.push(ShadowSlot {
            light_index,
            tile,
            view_proj,
            uv_rect: [rect.x, rect.y, rect.size, rect.size],
            bias: light.shadow_bias,
        });
    }

    (slots, dropped)
}

/// One depth texture shared by every shadow-casting light, rendered in a
/// single pass with per-tile viewport and scissor.
pub struct ShadowAtlas {
    size: u32,
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    comparison_sampler: wgpu::Sampler,
    pipeline: wgpu::RenderPipeline,
    tile_buffer: wgpu::Buffer,
    tile_bind_group: wgpu::BindGroup,
    slots: Vec<ShadowSlot>,
    dropped: u32,
}

impl ShadowAtlas {
    pub fn new(device: &wgpu::Device, objects_layout: &wgpu::BindGroupLayout, size: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ShadowAtlas"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let comparison_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowAtlasSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let tile_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ShadowTileLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<Mat4>() as u64),
                },
                count: None,
            }],
        });

        let tile_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ShadowTileBuffer"),
            size: TILE_UNIFORM_STRIDE * MAX_SHADOW_TILES as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let tile_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ShadowTileBindGroup"),
            layout: &tile_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &tile_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<Mat4>() as u64),
                }),
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ShadowShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/shadow.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ShadowPipelineLayout"),
            bind_group_layouts: &[&tile_layout, objects_layout],
            push_constant_ranges: &[],
        });

        let pipeline = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("ShadowPipeline")
            .depth_only()
            .with_vertex_buffer(Vertex::layout())
            .with_depth_stencil_biased(
                wgpu::TextureFormat::Depth32Float,
                true,
                wgpu::CompareFunction::LessEqual,
                2,
                2.0,
            )
            .build();

        log::info!("Created {size}x{size} shadow atlas with {MAX_SHADOW_TILES} tiles");

        Self {
            size,
            _texture: texture,
            view,
            comparison_sampler,
            pipeline,
            tile_buffer,
            tile_bind_group,
            slots: Vec::new(),
            dropped: 0,
        }
    }

    /// Resets every slot, reassigns tiles for this frame's lights and uploads
    /// the per-tile view-projection matrices.
    pub fn begin_frame(&mut self, queue: &wgpu::Queue, lights: &[FrameLight]) {
        let (slots, dropped) = assign_tiles(lights, self.size);
        self.slots = slots;
        self.dropped = dropped;

        if self.dropped > 0 {
            log::warn!(
                "Shadow atlas full: {} shadow-casting light(s) left unshadowed",
                self.dropped
            );
        }

        for (index, slot) in self.slots.iter().enumerate() {
            queue.write_buffer(
                &self.tile_buffer,
                index as u64 * TILE_UNIFORM_STRIDE,
                bytemuck::bytes_of(&slot.view_proj.to_cols_array_2d()),
            );
        }
    }

    pub fn slots(&self) -> &[ShadowSlot] {
        &self.slots
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Per-light slot lookup for uniform packing: `result[i]` is the slot
    /// claimed by frame light `i`.
    pub fn slots_by_light(&self, light_count: usize) -> Vec<Option<ShadowSlot>> {
        let mut lookup = vec![None; light_count];
        for slot in &self.slots {
            if let Some(entry) = lookup.get_mut(slot.light_index) {
                *entry = Some(*slot);
            }
        }
        lookup
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn comparison_sampler(&self) -> &wgpu::Sampler {
        &self.comparison_sampler
    }

    /// Renders every claimed tile in one depth pass: clear the whole atlas
    /// once, then viewport+scissor per tile. Blended calls never cast
    /// shadows; each tile culls against its own light frustum.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        calls: &[RenderCall],
        assets: &Assets,
        objects_bind_group: &wgpu::BindGroup,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ShadowAtlasPass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(1, objects_bind_group, &[]);

        let atlas_size = self.size as f32;
        for (slot_index, slot) in self.slots.iter().enumerate() {
            let rect = TILE_TABLE[slot.tile];
            let px = rect.x * atlas_size;
            let py = rect.y * atlas_size;
            let extent = rect.size * atlas_size;

            pass.set_viewport(px, py, extent, extent, 0.0, 1.0);
            pass.set_scissor_rect(px as u32, py as u32, extent as u32, extent as u32);
            pass.set_bind_group(
                0,
                &self.tile_bind_group,
                &[(slot_index as u64 * TILE_UNIFORM_STRIDE) as u32],
            );

            let frustum = Frustum::from_view_proj(slot.view_proj);
            for (call_index, call) in calls.iter().enumerate() {
                if call.blended || !frustum.intersects_aabb(&call.bounds) {
                    continue;
                }
                let Some(mesh) = assets.meshes.get(call.mesh) else {
                    continue;
                };
                pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
                pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
                let instance = call_index as u32;
                pass.draw_indexed(0..mesh.index_count(), 0, instance..instance + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caster(kind: LightKind) -> FrameLight {
        FrameLight {
            entity_index: 0,
            kind,
            position: Vec3::new(0.0, 10.0, 0.0),
            direction: Vec3::new(0.0, -1.0, 0.0),
            color: Vec3::ONE,
            intensity: 1.0,
            max_distance: 100.0,
            cone_angle: 0.6,
            cone_exponent: 8.0,
            area_size: 200.0,
            cast_shadow: true,
            shadow_bias: 0.001,
        }
    }

    #[test]
    fn tile_table_is_seven_tiles_inside_unit_square() {
        assert_eq!(MAX_SHADOW_TILES, 7);
        for tile in TILE_TABLE {
            assert!(tile.x >= 0.0 && tile.x + tile.size <= 1.0);
            assert!(tile.y >= 0.0 && tile.y + tile.size <= 1.0);
        }
        assert_eq!(TILE_TABLE.iter().filter(|t| t.size == 0.5).count(), 3);
        assert_eq!(TILE_TABLE.iter().filter(|t| t.size == 0.25).count(), 4);
    }

    #[test]
    fn tiles_do_not_overlap() {
        for (i, a) in TILE_TABLE.iter().enumerate() {
            for b in TILE_TABLE.iter().skip(i + 1) {
                let separate = a.x + a.size <= b.x
                    || b.x + b.size <= a.x
                    || a.y + a.size <= b.y
                    || b.y + b.size <= a.y;
                assert!(separate, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn tiles_claimed_in_submission_order() {
        let lights = vec![caster(LightKind::Directional); 3];
        let (slots, dropped) = assign_tiles(&lights, 4096);
        assert_eq!(dropped, 0);
        assert_eq!(slots.len(), 3);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.tile, i);
            assert_eq!(slot.light_index, i);
            let rect = TILE_TABLE[i];
            assert_eq!(slot.uv_rect, [rect.x, rect.y, rect.size, rect.size]);
        }
    }

    #[test]
    fn point_lights_and_non_casters_never_claim_tiles() {
        let mut point = caster(LightKind::Point);
        let mut off = caster(LightKind::Spot);
        off.cast_shadow = false;
        point.cast_shadow = true;
        let lights = vec![point, off, caster(LightKind::Spot)];
        let (slots, dropped) = assign_tiles(&lights, 4096);
        assert_eq!(dropped, 0);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].light_index, 2);
    }

    #[test]
    fn overflow_beyond_seven_is_counted() {
        let lights = vec![caster(LightKind::Spot); 10];
        let (slots, dropped) = assign_tiles(&lights, 4096);
        assert_eq!(slots.len(), MAX_SHADOW_TILES);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn directional_snapping_is_stable_under_subtexel_motion() {
        let mut a = caster(LightKind::Directional);
        a.direction = Vec3::NEG_Z;
        a.position = Vec3::new(0.0, 0.0, 50.0);
        let tile_resolution = 2048;
        let texel = a.area_size / tile_resolution as f32;

        let mut b = a;
        // Shift along the shadow camera's right axis by a fraction of a texel.
        b.position.x += texel * 0.2;

        let vp_a = directional_view_proj(&a, tile_resolution);
        let vp_b = directional_view_proj(&b, tile_resolution);
        assert!(vp_a.abs_diff_eq(vp_b, 1e-5));
    }

    #[test]
    fn directional_snapping_moves_in_whole_texels() {
        let mut a = caster(LightKind::Directional);
        a.direction = Vec3::NEG_Z;
        a.position = Vec3::new(0.0, 0.0, 50.0);
        let tile_resolution = 2048;
        let texel = a.area_size / tile_resolution as f32;

        let mut b = a;
        b.position.x += texel * 3.0;

        let vp_a = directional_view_proj(&a, tile_resolution);
        let vp_b = directional_view_proj(&b, tile_resolution);
        assert!(!vp_a.abs_diff_eq(vp_b, 1e-6));
    }

    #[test]
    fn spot_camera_looks_along_light_direction() {
        let light = caster(LightKind::Spot);
        let vp = spot_view_proj(&light);
        // A point down the beam projects inside clip space.
        let p = light.position + light.direction * 10.0;
        let clip = vp * p.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1.0 && ndc.y.abs() < 1.0);
        assert!(clip.w > 0.0);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
