use std::collections::HashMap;
use std::mem;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::asset::{Assets, Mesh, MeshData};
use crate::render::buffers::{FrameBuffers, LightsBinding, ObjectsBuffer};
use crate::render::extract::{FrameDecal, FrameLight, RenderCall};
use crate::render::forward::{MaterialBindings, SLOT_AMBIENT, SLOT_LIGHT_BASE, SLOT_SINGLE};
use crate::render::lights::MAX_LIGHTS;
use crate::render::pipeline_builder::PipelineBuilder;
use crate::render::probes::IrradianceVolume;
use crate::render::targets::{
    RenderTargets, DEPTH_FORMAT, GBUFFER_ALBEDO_FORMAT, GBUFFER_METALLIC_FORMAT,
    GBUFFER_NORMAL_FORMAT, HDR_FORMAT,
};
use crate::render::uniforms::PassUniform;
use crate::render::vertex::Vertex;
use crate::scene::LightKind;

const DECAL_UNIFORM_STRIDE: u64 = 256;

const FOG_DENSITY: f32 = 0.02;
const FOG_MAX_DISTANCE: f32 = 50.0;
const FOG_SCATTERING: f32 = 1.0;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DecalUniform {
    model: [[f32; 4]; 4],
    inverse_model: [[f32; 4]; 4],
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

pub(crate) struct DeferredFrame<'a> {
    pub calls: &'a [RenderCall],
    pub decals: &'a [FrameDecal],
    pub lights: &'a [FrameLight],
    pub assets: &'a Assets,
    pub single_pass: bool,
    pub light_volumes: bool,
}

/// Deferred path: geometry into the G-buffer, decals composited on top, then
/// lighting resolved into the HDR target with full-screen or proxy-volume
/// draws. Irradiance and volumetric fog accumulate additively afterwards.
pub(crate) struct DeferredPass {
    gbuffer_pipeline: wgpu::RenderPipeline,
    gbuffer_pipeline_two_sided: wgpu::RenderPipeline,

    resolve_fullscreen: wgpu::RenderPipeline,
    resolve_volume: wgpu::RenderPipeline,
    gbuffer_input_layout: wgpu::BindGroupLayout,
    gbuffer_input: Option<wgpu::BindGroup>,
    sphere: Mesh,

    decal_pipeline: wgpu::RenderPipeline,
    decal_frame_layout: wgpu::BindGroupLayout,
    decal_frame_bind: wgpu::BindGroup,
    decal_buffer: wgpu::Buffer,
    decal_capacity: u32,
    decal_texture_layout: wgpu::BindGroupLayout,
    decal_texture_binds: HashMap<usize, wgpu::BindGroup>,
    depth_input_layout: wgpu::BindGroupLayout,
    depth_input: Option<wgpu::BindGroup>,
    cube: Mesh,

    irradiance_pipeline: wgpu::RenderPipeline,
    irradiance_frame_layout: wgpu::BindGroupLayout,
    irradiance_frame_bind: wgpu::BindGroup,
    irradiance_input_layout: wgpu::BindGroupLayout,
    irradiance_input: Option<wgpu::BindGroup>,
    grid_buffer: wgpu::Buffer,

    volumetric_pipeline: wgpu::RenderPipeline,
    volumetric_frame_bind: wgpu::BindGroup,
}

impl DeferredPass {
    pub(crate) fn new(
        device: &wgpu::Device,
        frame_buffer: &wgpu::Buffer,
        frame_layout: &wgpu::BindGroupLayout,
        objects_layout: &wgpu::BindGroupLayout,
        lights_layout: &wgpu::BindGroupLayout,
        material_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let gbuffer_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("GBufferShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/gbuffer.wgsl").into()),
        });
        let gbuffer_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("GBufferPipelineLayout"),
            bind_group_layouts: &[frame_layout, objects_layout, material_layout],
            push_constant_ranges: &[],
        });
        let build_gbuffer = |cull| {
            PipelineBuilder::new(device, &gbuffer_layout, &gbuffer_shader)
                .with_label("GBufferPipeline")
                .with_vertex_buffer(Vertex::layout())
                .with_color_target(GBUFFER_ALBEDO_FORMAT, None)
                .with_color_target(GBUFFER_NORMAL_FORMAT, None)
                .with_color_target(GBUFFER_METALLIC_FORMAT, None)
                .with_depth_stencil(DEPTH_FORMAT, true, wgpu::CompareFunction::LessEqual)
                .with_cull_mode(cull)
                .build()
        };
        let gbuffer_pipeline = build_gbuffer(Some(wgpu::Face::Back));
        let gbuffer_pipeline_two_sided = build_gbuffer(None);

        // Lighting resolve.
        let resolve_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DeferredLightShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/deferred_light.wgsl").into()),
        });
        let gbuffer_input_layout = Self::gbuffer_input_layout(device);
        let resolve_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DeferredResolveLayout"),
            bind_group_layouts: &[frame_layout, lights_layout, &gbuffer_input_layout],
            push_constant_ranges: &[],
        });
        let resolve_fullscreen = PipelineBuilder::new(device, &resolve_layout, &resolve_shader)
            .with_label("DeferredResolveFullscreen")
            .with_vertex_entry("vs_fullscreen")
            .with_color_target(HDR_FORMAT, Some(ADDITIVE_BLEND))
            .with_no_culling()
            .build();
        let resolve_volume = PipelineBuilder::new(device, &resolve_layout, &resolve_shader)
            .with_label("DeferredResolveVolume")
            .with_vertex_entry("vs_volume")
            .with_vertex_buffer(Vertex::layout())
            .with_color_target(HDR_FORMAT, Some(ADDITIVE_BLEND))
            .with_cull_mode(Some(wgpu::Face::Front))
            .build();

        // Decals.
        let decal_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DecalShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/decal.wgsl").into()),
        });
        let decal_frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DecalFrameLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: Some(
                            NonZeroU64::new(mem::size_of::<DecalUniform>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
            ],
        });
        let depth_input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DepthInputLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });
        let decal_texture_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("DecalTextureLayout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
        let decal_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("DecalPipelineLayout"),
                bind_group_layouts: &[&decal_frame_layout, &depth_input_layout, &decal_texture_layout],
                push_constant_ranges: &[],
            });
        let decal_pipeline = PipelineBuilder::new(device, &decal_pipeline_layout, &decal_shader)
            .with_label("DecalPipeline")
            .with_vertex_buffer(Vertex::layout())
            .with_color_target(
                GBUFFER_ALBEDO_FORMAT,
                Some(wgpu::BlendState::ALPHA_BLENDING),
            )
            .with_cull_mode(Some(wgpu::Face::Front))
            .build();

        let decal_capacity = 16;
        let decal_buffer = Self::decal_buffer(device, decal_capacity);
        let decal_frame_bind =
            Self::decal_frame_bind(device, &decal_frame_layout, frame_buffer, &decal_buffer);

        // Irradiance.
        let irradiance_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("IrradianceShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/irradiance.wgsl").into()),
        });
        let irradiance_frame_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("IrradianceFrameLayout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
        let irradiance_input_layout = Self::irradiance_input_layout(device);
        let grid_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ProbeGridBuffer"),
            size: mem::size_of::<crate::render::probes::ProbeGridUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let irradiance_frame_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("IrradianceFrameBindGroup"),
            layout: &irradiance_frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: grid_buffer.as_entire_binding(),
                },
            ],
        });
        let irradiance_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("IrradiancePipelineLayout"),
            bind_group_layouts: &[&irradiance_frame_layout, &irradiance_input_layout],
            push_constant_ranges: &[],
        });
        let irradiance_pipeline =
            PipelineBuilder::new(device, &irradiance_layout, &irradiance_shader)
                .with_label("IrradiancePipeline")
                .with_color_target(HDR_FORMAT, Some(ADDITIVE_BLEND))
                .with_no_culling()
                .build();

        // Volumetric fog.
        let volumetric_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VolumetricShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/volumetric.wgsl").into()),
        });
        let fog_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FogBuffer"),
            contents: bytemuck::bytes_of(&[FOG_DENSITY, FOG_MAX_DISTANCE, FOG_SCATTERING, 0.0f32]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let volumetric_frame_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("VolumetricFrameLayout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
        let volumetric_frame_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VolumetricFrameBindGroup"),
            layout: &volumetric_frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: fog_buffer.as_entire_binding(),
                },
            ],
        });
        let volumetric_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VolumetricPipelineLayout"),
            bind_group_layouts: &[&volumetric_frame_layout, lights_layout, &depth_input_layout],
            push_constant_ranges: &[],
        });
        let volumetric_pipeline =
            PipelineBuilder::new(device, &volumetric_layout, &volumetric_shader)
                .with_label("VolumetricPipeline")
                .with_color_target(HDR_FORMAT, Some(ADDITIVE_BLEND))
                .with_no_culling()
                .build();

        Self {
            gbuffer_pipeline,
            gbuffer_pipeline_two_sided,
            resolve_fullscreen,
            resolve_volume,
            gbuffer_input_layout,
            gbuffer_input: None,
            sphere: Mesh::from_data(device, &MeshData::sphere(24, 16)),
            decal_pipeline,
            decal_frame_layout,
            decal_frame_bind,
            decal_buffer,
            decal_capacity,
            decal_texture_layout,
            decal_texture_binds: HashMap::new(),
            depth_input_layout,
            depth_input: None,
            cube: Mesh::from_data(device, &MeshData::cube()),
            irradiance_pipeline,
            irradiance_frame_layout,
            irradiance_frame_bind,
            irradiance_input_layout,
            irradiance_input: None,
            grid_buffer,
            volumetric_pipeline,
            volumetric_frame_bind,
        }
    }

    fn gbuffer_input_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
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
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBufferInputLayout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                texture_entry(4),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        })
    }

    fn irradiance_input_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
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
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("IrradianceInputLayout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        })
    }

    fn decal_buffer(device: &wgpu::Device, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DecalBuffer"),
            size: DECAL_UNIFORM_STRIDE * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn decal_frame_bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        frame_buffer: &wgpu::Buffer,
        decal_buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DecalFrameBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: decal_buffer,
                        offset: 0,
                        size: NonZeroU64::new(mem::size_of::<DecalUniform>() as u64),
                    }),
                },
            ],
        })
    }

    /// Rebuilds target-dependent bind groups. `ssao_view` is the occlusion
    /// view lighting should read this frame.
    pub(crate) fn rebind(
        &mut self,
        device: &wgpu::Device,
        targets: &RenderTargets,
        ssao_view: &wgpu::TextureView,
    ) {
        self.gbuffer_input = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBufferInputBindGroup"),
            layout: &self.gbuffer_input_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.gbuffer_albedo.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.gbuffer_normal.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&targets.gbuffer_metallic.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&targets.depth.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(ssao_view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&targets.nearest_sampler),
                },
            ],
        }));
        self.depth_input = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DepthInputBindGroup"),
            layout: &self.depth_input_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.depth.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&targets.nearest_sampler),
                },
            ],
        }));
        self.irradiance_input = None;
    }

    /// Builds the irradiance bind group against the current targets and the
    /// baked probe volume. Called after `rebind` and after every bake.
    pub(crate) fn rebind_irradiance(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &RenderTargets,
        ssao_view: &wgpu::TextureView,
        volume: &IrradianceVolume,
    ) {
        queue.write_buffer(
            &self.grid_buffer,
            0,
            bytemuck::bytes_of(&volume.grid_uniform()),
        );
        self.irradiance_input = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("IrradianceInputBindGroup"),
            layout: &self.irradiance_input_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.gbuffer_albedo.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.gbuffer_normal.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&targets.depth.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(ssao_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&targets.nearest_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(&volume.view),
                },
            ],
        }));
    }

    /// G-buffer fill plus the decal composite. SSAO runs between this and
    /// `record_lighting`.
    pub(crate) fn record_geometry(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame_buffers: &FrameBuffers,
        objects: &ObjectsBuffer,
        materials: &mut MaterialBindings,
        targets: &RenderTargets,
        frame: &DeferredFrame,
        decals_enabled: bool,
    ) {
        materials.ensure(device, frame.assets, frame.calls);
        frame_buffers.write_pass(queue, SLOT_AMBIENT, &PassUniform::unlit());

        {
            fn clear_attachment(
                view: &wgpu::TextureView,
            ) -> Option<wgpu::RenderPassColorAttachment<'_>> {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })
            }
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("GBufferPass"),
                color_attachments: &[
                    clear_attachment(&targets.gbuffer_albedo.view),
                    clear_attachment(&targets.gbuffer_normal.view),
                    clear_attachment(&targets.gbuffer_metallic.view),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
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
                &[FrameBuffers::pass_offset(SLOT_AMBIENT)],
            );
            pass.set_bind_group(1, &objects.bind_group, &[]);

            for (index, call) in frame.calls.iter().enumerate() {
                if call.blended {
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
                if material.two_sided {
                    pass.set_pipeline(&self.gbuffer_pipeline_two_sided);
                } else {
                    pass.set_pipeline(&self.gbuffer_pipeline);
                }
                pass.set_bind_group(2, bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
                pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
                let instance = index as u32;
                pass.draw_indexed(0..mesh.index_count(), 0, instance..instance + 1);
            }
        }

        if decals_enabled && !frame.decals.is_empty() {
            self.record_decals(device, queue, encoder, frame_buffers, targets, frame);
        }
    }

    fn record_decals(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame_buffers: &FrameBuffers,
        targets: &RenderTargets,
        frame: &DeferredFrame,
    ) {
        let Some(depth_input) = &self.depth_input else {
            return;
        };

        if frame.decals.len() as u32 > self.decal_capacity {
            self.decal_capacity = (frame.decals.len() as u32).max(self.decal_capacity * 2);
            log::info!("Growing decal buffer to {}", self.decal_capacity);
            self.decal_buffer = Self::decal_buffer(device, self.decal_capacity);
            self.decal_frame_bind = Self::decal_frame_bind(
                device,
                &self.decal_frame_layout,
                frame_buffers.frame_buffer(),
                &self.decal_buffer,
            );
        }

        for (index, decal) in frame.decals.iter().enumerate() {
            let uniform = DecalUniform {
                model: decal.model.to_cols_array_2d(),
                inverse_model: decal.model.inverse().to_cols_array_2d(),
            };
            queue.write_buffer(
                &self.decal_buffer,
                index as u64 * DECAL_UNIFORM_STRIDE,
                bytemuck::bytes_of(&uniform),
            );
        }

        for decal in frame.decals {
            let key = decal.texture.index();
            if self.decal_texture_binds.contains_key(&key) {
                continue;
            }
            let Some(texture) = frame.assets.textures.get(decal.texture) else {
                continue;
            };
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("DecalTextureBindGroup"),
                layout: &self.decal_texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&texture.sampler),
                    },
                ],
            });
            self.decal_texture_binds.insert(key, bind_group);
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("DecalPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.gbuffer_albedo.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.decal_pipeline);
        pass.set_bind_group(1, depth_input, &[]);
        pass.set_vertex_buffer(0, self.cube.vertex_buffer().slice(..));
        pass.set_index_buffer(self.cube.index_buffer().slice(..), self.cube.index_format());

        for (index, decal) in frame.decals.iter().enumerate() {
            let Some(texture_bind) = self.decal_texture_binds.get(&decal.texture.index()) else {
                continue;
            };
            pass.set_bind_group(
                0,
                &self.decal_frame_bind,
                &[(index as u64 * DECAL_UNIFORM_STRIDE) as u32],
            );
            pass.set_bind_group(2, texture_bind, &[]);
            pass.draw_indexed(0..self.cube.index_count(), 0, 0..1);
        }
    }

    /// Lighting resolve into the HDR target, then irradiance and fog.
    pub(crate) fn record_lighting(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        frame_buffers: &FrameBuffers,
        lights_binding: &LightsBinding,
        targets: &RenderTargets,
        frame: &DeferredFrame,
        irradiance_enabled: bool,
        volumetric_enabled: bool,
    ) {
        let Some(gbuffer_input) = &self.gbuffer_input else {
            return;
        };

        frame_buffers.write_pass(queue, SLOT_SINGLE, &PassUniform::single_pass(true));
        if !frame.single_pass {
            for (index, light) in frame.lights.iter().take(MAX_LIGHTS).enumerate() {
                let mut pass_uniform = PassUniform::multi_pass(index as u32, false);
                if frame.light_volumes && light.kind != LightKind::Directional {
                    let model = Mat4::from_translation(light.position)
                        * Mat4::from_scale(glam::Vec3::splat(light.max_distance * 1.05));
                    pass_uniform = pass_uniform.with_light_model(model);
                }
                frame_buffers.write_pass(queue, SLOT_LIGHT_BASE + index as u64, &pass_uniform);
            }
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("DeferredResolvePass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.hdr.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_bind_group(1, &lights_binding.bind_group, &[]);
            pass.set_bind_group(2, gbuffer_input, &[]);

            if frame.single_pass {
                pass.set_pipeline(&self.resolve_fullscreen);
                pass.set_bind_group(
                    0,
                    &frame_buffers.bind_group,
                    &[FrameBuffers::pass_offset(SLOT_SINGLE)],
                );
                pass.draw(0..3, 0..1);
            } else {
                // Ambient, emissive and the specular probe in one pass, then
                // one accumulating pass per light.
                pass.set_pipeline(&self.resolve_fullscreen);
                pass.set_bind_group(
                    0,
                    &frame_buffers.bind_group,
                    &[FrameBuffers::pass_offset(SLOT_AMBIENT)],
                );
                pass.draw(0..3, 0..1);

                for (index, light) in frame.lights.iter().take(MAX_LIGHTS).enumerate() {
                    pass.set_bind_group(
                        0,
                        &frame_buffers.bind_group,
                        &[FrameBuffers::pass_offset(SLOT_LIGHT_BASE + index as u64)],
                    );
                    if frame.light_volumes && light.kind != LightKind::Directional {
                        pass.set_pipeline(&self.resolve_volume);
                        pass.set_vertex_buffer(0, self.sphere.vertex_buffer().slice(..));
                        pass.set_index_buffer(
                            self.sphere.index_buffer().slice(..),
                            self.sphere.index_format(),
                        );
                        pass.draw_indexed(0..self.sphere.index_count(), 0, 0..1);
                    } else {
                        pass.set_pipeline(&self.resolve_fullscreen);
                        pass.draw(0..3, 0..1);
                    }
                }
            }
        }

        if irradiance_enabled {
            if let Some(irradiance_input) = &self.irradiance_input {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("IrradiancePass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &targets.hdr.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.irradiance_pipeline);
                pass.set_bind_group(0, &self.irradiance_frame_bind, &[]);
                pass.set_bind_group(1, irradiance_input, &[]);
                pass.draw(0..3, 0..1);
            }
        }

        if volumetric_enabled {
            if let Some(depth_input) = &self.depth_input {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("VolumetricPass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &targets.hdr.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.volumetric_pipeline);
                pass.set_bind_group(0, &self.volumetric_frame_bind, &[]);
                pass.set_bind_group(1, &lights_binding.bind_group, &[]);
                pass.set_bind_group(2, depth_input, &[]);
                pass.draw(0..3, 0..1);
            }
        }
    }
}
