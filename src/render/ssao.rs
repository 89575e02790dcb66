use bytemuck::{Pod, Zeroable};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use wgpu::util::DeviceExt;

use crate::render::pipeline_builder::PipelineBuilder;
use crate::render::targets::{RenderTargets, SSAO_FORMAT};

pub(crate) const SSAO_KERNEL_SIZE: usize = 64;

const SSAO_RADIUS: f32 = 0.5;
const SSAO_DEPTH_BIAS: f32 = 0.002;
const SSAO_INTENSITY: f32 = 1.0;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SsaoKernelUniform {
    samples: [[f32; 4]; SSAO_KERNEL_SIZE],
    /// x radius, y depth bias, z intensity, w unused.
    params: [f32; 4],
}

/// Deterministic kernel of points uniformly distributed in the unit sphere.
/// The shader folds each point into the hemisphere around the surface normal.
pub(crate) fn kernel_points() -> [[f32; 4]; SSAO_KERNEL_SIZE] {
    let mut rng = SmallRng::seed_from_u64(0x9e3779b97f4a7c15);
    let mut points = [[0.0f32; 4]; SSAO_KERNEL_SIZE];
    for point in points.iter_mut() {
        loop {
            let x = rng.gen_range(-1.0f32..1.0);
            let y = rng.gen_range(-1.0f32..1.0);
            let z = rng.gen_range(-1.0f32..1.0);
            let len2 = x * x + y * y + z * z;
            if len2 <= 1.0 && len2 > 1e-4 {
                *point = [x, y, z, 0.0];
                break;
            }
        }
    }
    points
}

/// Ambient occlusion over the G-buffer: a hemisphere-kernel pass into the raw
/// SSAO target, then an optional box blur into the blurred target.
pub(crate) struct SsaoPass {
    pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    frame_bind_group: wgpu::BindGroup,
    input_layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    input_bind_group: Option<wgpu::BindGroup>,
    blur_bind_group: Option<wgpu::BindGroup>,
}

impl SsaoPass {
    pub(crate) fn new(device: &wgpu::Device, frame_buffer: &wgpu::Buffer) -> Self {
        let kernel = SsaoKernelUniform {
            samples: kernel_points(),
            params: [SSAO_RADIUS, SSAO_DEPTH_BIAS, SSAO_INTENSITY, 0.0],
        };
        let kernel_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("SsaoKernelBuffer"),
            contents: bytemuck::bytes_of(&kernel),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SsaoFrameLayout"),
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

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SsaoFrameBindGroup"),
            layout: &frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: kernel_buffer.as_entire_binding(),
                },
            ],
        });

        let input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SsaoInputLayout"),
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
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SsaoBlurLayout"),
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

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SsaoShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/ssao.wgsl").into()),
        });
        let blur_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SsaoBlurShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/ssao_blur.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SsaoPipelineLayout"),
            bind_group_layouts: &[&frame_layout, &input_layout],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("SsaoPipeline")
            .with_color_target(SSAO_FORMAT, None)
            .build();

        let blur_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SsaoBlurPipelineLayout"),
            bind_group_layouts: &[&blur_layout],
            push_constant_ranges: &[],
        });
        let blur_pipeline = PipelineBuilder::new(device, &blur_pipeline_layout, &blur_shader)
            .with_label("SsaoBlurPipeline")
            .with_color_target(SSAO_FORMAT, None)
            .build();

        Self {
            pipeline,
            blur_pipeline,
            frame_bind_group,
            input_layout,
            blur_layout,
            input_bind_group: None,
            blur_bind_group: None,
        }
    }

    /// Rebuilds the target-dependent bind groups. Called whenever the render
    /// targets are recreated.
    pub(crate) fn rebind(&mut self, device: &wgpu::Device, targets: &RenderTargets) {
        self.input_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SsaoInputBindGroup"),
            layout: &self.input_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.gbuffer_normal.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.depth.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&targets.nearest_sampler),
                },
            ],
        }));
        self.blur_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SsaoBlurBindGroup"),
            layout: &self.blur_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.ssao.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&targets.linear_sampler),
                },
            ],
        }));
    }

    /// Records the occlusion pass and, when enabled, the blur pass. The view
    /// lighting should sample afterwards is returned by `output_view` below.
    pub(crate) fn record(&self, encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets, blur: bool) {
        let (Some(input), Some(blur_input)) = (&self.input_bind_group, &self.blur_bind_group)
        else {
            return;
        };

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("SsaoPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.ssao.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.frame_bind_group, &[]);
            pass.set_bind_group(1, input, &[]);
            pass.draw(0..3, 0..1);
        }

        if blur {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("SsaoBlurPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.ssao_blurred.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.blur_pipeline);
            pass.set_bind_group(0, blur_input, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    /// The occlusion view lighting should read: blurred when the blur pass
    /// ran, raw otherwise.
    pub(crate) fn output_view<'a>(targets: &'a RenderTargets, blur: bool) -> &'a wgpu::TextureView {
        if blur {
            &targets.ssao_blurred.view
        } else {
            &targets.ssao.view
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_points_lie_in_unit_sphere() {
        for p in kernel_points() {
            let len2 = p[0] * p[0] + p[1] * p[1] + p[2] * p[2];
            assert!(len2 <= 1.0 + 1e-6);
            assert!(len2 > 0.0);
            assert_eq!(p[3], 0.0);
        }
    }

    #[test]
    fn kernel_is_deterministic() {
        assert_eq!(kernel_points(), kernel_points());
    }
}
