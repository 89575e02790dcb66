use std::collections::HashMap;

use crate::asset::{Assets, Material};
use crate::render::buffers::{FrameBuffers, LightsBinding, ObjectsBuffer};
use crate::render::extract::RenderCall;
use crate::render::pipeline_builder::PipelineBuilder;
use crate::render::targets::{DEPTH_FORMAT, HDR_FORMAT};
use crate::render::texture::Texture;
use crate::render::uniforms::PassUniform;
use crate::render::vertex::Vertex;

/// Pass-uniform slot assignments shared by the forward and deferred paths.
/// One frame writes only the slots its light mode needs.
pub(crate) const SLOT_SINGLE: u64 = 0;
pub(crate) const SLOT_AMBIENT: u64 = 1;
pub(crate) const SLOT_LIGHT_BASE: u64 = 2;

/// Material texture bind groups (group 3 forward, group 2 gbuffer), cached by
/// texture handles and backed by 1x1 sentinels for unset slots.
pub(crate) struct MaterialBindings {
    pub(crate) layout: wgpu::BindGroupLayout,
    white: Texture,
    flat_normal: Texture,
    cache: HashMap<[usize; 4], wgpu::BindGroup>,
}

impl MaterialBindings {
    pub(crate) fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MaterialTexturesLayout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        Self {
            layout,
            white: Texture::white(device, queue),
            flat_normal: Texture::flat_normal(device, queue),
            cache: HashMap::new(),
        }
    }

    fn resolve<'a>(
        assets: &'a Assets,
        handle: &Option<crate::asset::Handle<Texture>>,
        sentinel: &'a Texture,
    ) -> &'a wgpu::TextureView {
        handle
            .and_then(|h| assets.textures.get(h))
            .map(|t| &t.view)
            .unwrap_or(&sentinel.view)
    }

    fn key(material: &Material) -> [usize; 4] {
        let idx = |t: &Option<crate::asset::Handle<Texture>>| {
            t.map(|h| h.index()).unwrap_or(usize::MAX)
        };
        [
            idx(&material.color_texture),
            idx(&material.normal_texture),
            idx(&material.metallic_roughness_texture),
            idx(&material.emissive_texture),
        ]
    }

    /// Builds bind groups for every material the call list touches, so draws
    /// can look them up without mutating the cache mid-pass.
    pub(crate) fn ensure(&mut self, device: &wgpu::Device, assets: &Assets, calls: &[RenderCall]) {
        for call in calls {
            let Some(material) = assets.materials.get(call.material) else {
                continue;
            };
            let key = Self::key(material);
            if self.cache.contains_key(&key) {
                continue;
            }

            let sampler = material
                .color_texture
                .and_then(|h| assets.textures.get(h))
                .map(|t| &t.sampler)
                .unwrap_or(&self.white.sampler);

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("MaterialTexturesBindGroup"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(Self::resolve(
                            assets,
                            &material.color_texture,
                            &self.white,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(Self::resolve(
                            assets,
                            &material.normal_texture,
                            &self.flat_normal,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(Self::resolve(
                            assets,
                            &material.metallic_roughness_texture,
                            &self.white,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(Self::resolve(
                            assets,
                            &material.emissive_texture,
                            &self.white,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            self.cache.insert(key, bind_group);
        }
    }

    pub(crate) fn get(&self, material: &Material) -> Option<&wgpu::BindGroup> {
        self.cache.get(&Self::key(material))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Variant {
    /// First opaque pass: writes depth, no blending.
    Base,
    /// Additional per-light passes: additive, depth test only.
    Additive,
    /// Alpha-blended geometry after all opaque work.
    Blended,
}

/// Forward lighting over the shared lit-shader bind scheme: frame+pass,
/// objects+materials, lights+shadows+environment, material textures.
pub(crate) struct ForwardPass {
    pipelines: HashMap<(Variant, bool), wgpu::RenderPipeline>,
}

const ADDITIVE_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

pub(crate) struct ForwardFrame<'a> {
    pub color_view: &'a wgpu::TextureView,
    pub depth_view: &'a wgpu::TextureView,
    pub clear_color: wgpu::Color,
    pub calls: &'a [RenderCall],
    pub assets: &'a Assets,
    pub light_count: usize,
    /// All lights in one draw per call; multi-pass otherwise.
    pub single_pass: bool,
}

impl ForwardPass {
    pub(crate) fn new(
        device: &wgpu::Device,
        frame_layout: &wgpu::BindGroupLayout,
        objects_layout: &wgpu::BindGroupLayout,
        lights_layout: &wgpu::BindGroupLayout,
        material_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ForwardShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/forward.wgsl").into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ForwardPipelineLayout"),
            bind_group_layouts: &[frame_layout, objects_layout, lights_layout, material_layout],
            push_constant_ranges: &[],
        });

        let mut pipelines = HashMap::new();
        for variant in [Variant::Base, Variant::Additive, Variant::Blended] {
            for two_sided in [false, true] {
                let (blend, depth_write) = match variant {
                    Variant::Base => (None, true),
                    Variant::Additive => (Some(ADDITIVE_BLEND), false),
                    Variant::Blended => (Some(wgpu::BlendState::ALPHA_BLENDING), false),
                };
                let cull = if two_sided {
                    None
                } else {
                    Some(wgpu::Face::Back)
                };
                let pipeline = PipelineBuilder::new(device, &layout, &shader)
                    .with_label("ForwardPipeline")
                    .with_vertex_buffer(Vertex::layout())
                    .with_color_target(HDR_FORMAT, blend)
                    .with_depth_stencil(DEPTH_FORMAT, depth_write, wgpu::CompareFunction::LessEqual)
                    .with_cull_mode(cull)
                    .build();
                pipelines.insert((variant, two_sided), pipeline);
            }
        }

        Self { pipelines }
    }

    /// Writes the pass-uniform slots this frame's light mode reads.
    pub(crate) fn write_pass_slots(
        queue: &wgpu::Queue,
        frame_buffers: &FrameBuffers,
        light_count: usize,
        single_pass: bool,
    ) {
        frame_buffers.write_pass(queue, SLOT_SINGLE, &PassUniform::single_pass(true));
        if !single_pass {
            // With no lights at all the first multi-pass slot still runs to
            // lay down ambient and depth; the zeroed light contributes nothing.
            for index in 0..light_count.max(1) {
                frame_buffers.write_pass(
                    queue,
                    SLOT_LIGHT_BASE + index as u64,
                    &PassUniform::multi_pass(index as u32, index == 0),
                );
            }
        }
    }

    /// One render pass: opaque geometry first (one draw set per light in
    /// multi-pass mode), then blended geometry lit in a single draw each.
    pub(crate) fn record(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame_buffers: &FrameBuffers,
        objects: &ObjectsBuffer,
        lights_binding: &LightsBinding,
        materials: &mut MaterialBindings,
        frame: &ForwardFrame,
    ) {
        materials.ensure(device, frame.assets, frame.calls);
        Self::write_pass_slots(queue, frame_buffers, frame.light_count, frame.single_pass);

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ForwardPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame.color_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(frame.clear_color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: frame.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_bind_group(1, &objects.bind_group, &[]);
        pass.set_bind_group(2, &lights_binding.bind_group, &[]);

        if frame.single_pass {
            pass.set_bind_group(
                0,
                &frame_buffers.bind_group,
                &[FrameBuffers::pass_offset(SLOT_SINGLE)],
            );
            self.draw_calls(&mut pass, frame, materials, Variant::Base, false);
        } else {
            for index in 0..frame.light_count.max(1) {
                pass.set_bind_group(
                    0,
                    &frame_buffers.bind_group,
                    &[FrameBuffers::pass_offset(SLOT_LIGHT_BASE + index as u64)],
                );
                let variant = if index == 0 {
                    Variant::Base
                } else {
                    Variant::Additive
                };
                self.draw_calls(&mut pass, frame, materials, variant, false);
            }
        }

        // Blended calls shade every light in one draw regardless of mode.
        pass.set_bind_group(
            0,
            &frame_buffers.bind_group,
            &[FrameBuffers::pass_offset(SLOT_SINGLE)],
        );
        self.draw_calls(&mut pass, frame, materials, Variant::Blended, true);
    }

    /// Blended geometry only, composited over an existing color and depth
    /// buffer. The deferred path uses this after its resolve.
    pub(crate) fn record_blended(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame_buffers: &FrameBuffers,
        objects: &ObjectsBuffer,
        lights_binding: &LightsBinding,
        materials: &mut MaterialBindings,
        frame: &ForwardFrame,
    ) {
        if !frame.calls.iter().any(|c| c.blended) {
            return;
        }
        materials.ensure(device, frame.assets, frame.calls);
        frame_buffers.write_pass(queue, SLOT_SINGLE, &PassUniform::single_pass(true));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ForwardBlendedPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame.color_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: frame.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_bind_group(
            0,
            &frame_buffers.bind_group,
            &[FrameBuffers::pass_offset(SLOT_SINGLE)],
        );
        pass.set_bind_group(1, &objects.bind_group, &[]);
        pass.set_bind_group(2, &lights_binding.bind_group, &[]);
        self.draw_calls(&mut pass, frame, materials, Variant::Blended, true);
    }

    fn draw_calls(
        &self,
        pass: &mut wgpu::RenderPass,
        frame: &ForwardFrame,
        materials: &MaterialBindings,
        variant: Variant,
        blended: bool,
    ) {
        for (index, call) in frame.calls.iter().enumerate() {
            if call.blended != blended {
                continue;
            }
            let Some(mesh) = frame.assets.meshes.get(call.mesh) else {
                continue;
            };
            let Some(material) = frame.assets.materials.get(call.material) else {
                continue;
            };
            let Some(bind_group) = materials.get(material) else {
                continue;
            };

            pass.set_pipeline(&self.pipelines[&(variant, material.two_sided)]);
            pass.set_bind_group(3, bind_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
            pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
            let instance = index as u32;
            pass.draw_indexed(0..mesh.index_count(), 0, instance..instance + 1);
        }
    }
}
