use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::render::pipeline_builder::PipelineBuilder;
use crate::render::targets::OUTPUT_FORMAT;
use crate::settings::TonemapParams;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TonemapUniform {
    /// x key scale, y average scene luminance, z white point squared, w unused.
    params: [f32; 4],
}

/// Final image stage: Reinhard tone map (or a plain blit when disabled) into
/// the output target, plus the debug blits for G-buffer and atlas views.
pub(crate) struct PostPass {
    tonemap_pipeline: wgpu::RenderPipeline,
    tonemap_layout: wgpu::BindGroupLayout,
    tonemap_buffer: wgpu::Buffer,
    blit_pipeline: wgpu::RenderPipeline,
    blit_layout: wgpu::BindGroupLayout,
    blit_depth_pipeline: wgpu::RenderPipeline,
    blit_depth_layout: wgpu::BindGroupLayout,
}

/// Destination rectangle for debug blits, in pixels.
#[derive(Clone, Copy)]
pub(crate) struct BlitRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PostPass {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let tonemap_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("TonemapShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/tonemap.wgsl").into()),
        });
        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("BlitShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/blit.wgsl").into()),
        });
        let blit_depth_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("BlitDepthShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/blit_depth.wgsl").into()),
        });

        let tonemap_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("TonemapBuffer"),
            contents: bytemuck::bytes_of(&TonemapUniform::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let tonemap_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("TonemapLayout"),
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
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
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
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("BlitLayout"),
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
        let blit_depth_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("BlitDepthLayout"),
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

        let tonemap_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("TonemapPipelineLayout"),
                bind_group_layouts: &[&tonemap_layout],
                push_constant_ranges: &[],
            });
        let tonemap_pipeline =
            PipelineBuilder::new(device, &tonemap_pipeline_layout, &tonemap_shader)
                .with_label("TonemapPipeline")
                .with_color_target(OUTPUT_FORMAT, None)
                .build();

        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("BlitPipelineLayout"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });
        let blit_pipeline = PipelineBuilder::new(device, &blit_pipeline_layout, &blit_shader)
            .with_label("OutputBlitPipeline")
            .with_color_target(OUTPUT_FORMAT, None)
            .build();

        let blit_depth_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("BlitDepthPipelineLayout"),
                bind_group_layouts: &[&blit_depth_layout],
                push_constant_ranges: &[],
            });
        let blit_depth_pipeline =
            PipelineBuilder::new(device, &blit_depth_pipeline_layout, &blit_depth_shader)
                .with_label("BlitDepthPipeline")
                .with_color_target(OUTPUT_FORMAT, None)
                .build();

        Self {
            tonemap_pipeline,
            tonemap_layout,
            tonemap_buffer,
            blit_pipeline,
            blit_layout,
            blit_depth_pipeline,
            blit_depth_layout,
        }
    }

    pub(crate) fn write_tonemap_params(&self, queue: &wgpu::Queue, params: &TonemapParams) {
        let uniform = TonemapUniform {
            params: [params.scale, params.average_lum, params.lum_white2, 0.0],
        };
        queue.write_buffer(&self.tonemap_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    /// Tone maps `hdr_view` into `output_view`, clearing the output.
    pub(crate) fn tonemap(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        hdr_view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        output_view: &wgpu::TextureView,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TonemapBindGroup"),
            layout: &self.tonemap_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(hdr_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.tonemap_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = Self::output_pass(encoder, output_view, true, "TonemapPass");
        pass.set_pipeline(&self.tonemap_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Copies `src_view` into `output_view`. With a rect the blit lands in
    /// that viewport over the existing image; without one it clears and
    /// covers the full target.
    pub(crate) fn blit(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        src_view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        output_view: &wgpu::TextureView,
        rect: Option<BlitRect>,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("OutputBlitBindGroup"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut pass = Self::output_pass(encoder, output_view, rect.is_none(), "OutputBlitPass");
        pass.set_pipeline(&self.blit_pipeline);
        if let Some(rect) = rect {
            pass.set_viewport(rect.x, rect.y, rect.width, rect.height, 0.0, 1.0);
        }
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Grayscale depth visualization into a viewport of the output.
    pub(crate) fn blit_depth(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        src_view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        output_view: &wgpu::TextureView,
        rect: BlitRect,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BlitDepthBindGroup"),
            layout: &self.blit_depth_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut pass = Self::output_pass(encoder, output_view, false, "BlitDepthPass");
        pass.set_pipeline(&self.blit_depth_pipeline);
        pass.set_viewport(rect.x, rect.y, rect.width, rect.height, 0.0, 1.0);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn output_pass<'a>(
        encoder: &'a mut wgpu::CommandEncoder,
        view: &'a wgpu::TextureView,
        clear: bool,
        label: &'static str,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(wgpu::Color::BLACK)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }
}
