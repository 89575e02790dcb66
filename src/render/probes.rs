use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec3, Vec3};

use crate::math::{CubeFaceImage, Sh9};
use crate::render::error::RenderError;
use crate::render::extract::FrameProbe;
use crate::render::pipeline_builder::PipelineBuilder;
use crate::render::targets::HDR_FORMAT;

/// Face resolution for irradiance probe captures. Probes only feed a 9-term
/// SH projection, so a small face loses nothing that survives the fit.
pub(crate) const IRRADIANCE_FACE_SIZE: u32 = 64;
/// Face resolution of the specular reflection cubemap.
pub(crate) const REFLECTION_FACE_SIZE: u32 = 256;

/// Regular lattice of irradiance probe positions.
#[derive(Clone, Copy, Debug)]
pub struct IrradianceGrid {
    pub min: Vec3,
    pub max: Vec3,
    pub dims: UVec3,
}

impl IrradianceGrid {
    pub fn probe_count(&self) -> u32 {
        self.dims.x.max(1) * self.dims.y.max(1) * self.dims.z.max(1)
    }

    fn delta(&self) -> Vec3 {
        let span = self.max - self.min;
        let steps = (self.dims.max(UVec3::ONE) - UVec3::ONE).max(UVec3::ONE);
        span / steps.as_vec3()
    }

    pub fn probe_position(&self, index: u32) -> Vec3 {
        let dims = self.dims.max(UVec3::ONE);
        let x = index % dims.x;
        let y = (index / dims.x) % dims.y;
        let z = index / (dims.x * dims.y);
        self.min + self.delta() * Vec3::new(x as f32, y as f32, z as f32)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct ProbeGridUniform {
    /// xyz world position of probe 0, w unused.
    pub start: [f32; 4],
    /// xyz probe spacing, w unused.
    pub delta: [f32; 4],
    /// xyz per-axis counts, w total probe count.
    pub dims: [u32; 4],
}

/// Baked SH coefficients for every probe on the grid, stored as a 9xN
/// rgba32float texture the irradiance pass reads with `textureLoad`.
pub(crate) struct IrradianceVolume {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub grid: IrradianceGrid,
}

impl IrradianceVolume {
    pub(crate) fn new(device: &wgpu::Device, grid: IrradianceGrid) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("IrradianceProbes"),
            size: wgpu::Extent3d {
                width: 9,
                height: grid.probe_count().max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            grid,
        }
    }

    /// Writes one probe's nine coefficients into its texture row.
    pub(crate) fn write_probe(&self, queue: &wgpu::Queue, index: u32, sh: &Sh9) {
        let mut texels = [[0.0f32; 4]; 9];
        for (texel, coeff) in texels.iter_mut().zip(sh.coeffs) {
            *texel = [coeff.x, coeff.y, coeff.z, 0.0];
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: index,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(9 * 16),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 9,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
    }

    pub(crate) fn grid_uniform(&self) -> ProbeGridUniform {
        let delta = self.grid.delta();
        let dims = self.grid.dims.max(UVec3::ONE);
        ProbeGridUniform {
            start: [self.grid.min.x, self.grid.min.y, self.grid.min.z, 0.0],
            delta: [delta.x, delta.y, delta.z, 0.0],
            dims: [dims.x, dims.y, dims.z, self.grid.probe_count()],
        }
    }
}

/// 90 degree square projection used for every cube face capture.
pub(crate) fn capture_projection() -> Mat4 {
    Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 500.0)
}

/// View matrix for cube face `face` (+X, -X, +Y, -Y, +Z, -Z order) captured
/// from `position`.
pub(crate) fn capture_view(position: Vec3, face: u32) -> Mat4 {
    let (dir, up) = match face {
        0 => (Vec3::X, Vec3::NEG_Y),
        1 => (Vec3::NEG_X, Vec3::NEG_Y),
        2 => (Vec3::Y, Vec3::Z),
        3 => (Vec3::NEG_Y, Vec3::NEG_Z),
        4 => (Vec3::Z, Vec3::NEG_Y),
        _ => (Vec3::NEG_Z, Vec3::NEG_Y),
    };
    Mat4::look_at_rh(position, position + dir, up)
}

/// Picks the captured probe closest to `eye`.
pub(crate) fn nearest_probe(
    probes: &[FrameProbe],
    eye: Vec3,
    has_capture: impl Fn(usize) -> bool,
) -> Option<usize> {
    probes
        .iter()
        .filter(|probe| has_capture(probe.entity_index))
        .min_by(|a, b| {
            a.position
                .distance_squared(eye)
                .total_cmp(&b.position.distance_squared(eye))
        })
        .map(|probe| probe.entity_index)
}

/// Copies one rgba16float capture target into host memory and decodes it to
/// linear RGB. Rows are reordered to cube-face addressing before they reach
/// the SH projection. Blocks on the GPU.
pub(crate) fn read_back_face(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    size: u32,
) -> Result<CubeFaceImage, RenderError> {
    // 8 bytes per rgba16float texel; rows stay 256-byte aligned for every
    // power-of-two size from 32 up.
    let bytes_per_row = size * 8;
    debug_assert_eq!(bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("FaceReadbackBuffer"),
        size: (bytes_per_row * size) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("FaceReadbackEncoder"),
    });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size),
            },
        },
        wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let (sender, receiver) = std::sync::mpsc::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::PollType::wait_indefinitely())?;
    receiver.recv().unwrap_or(Err(wgpu::BufferAsyncError))?;

    let mut pixels = Vec::with_capacity((size * size) as usize);
    {
        let data = buffer.slice(..).get_mapped_range();
        for texel in data.chunks_exact(8) {
            let channel = |offset: usize| {
                let bits = u16::from_le_bytes([texel[offset], texel[offset + 1]]);
                half::f16::from_bits(bits).to_f32()
            };
            pixels.push(Vec3::new(channel(0), channel(2), channel(4)));
        }
    }
    buffer.unmap();

    let mut image = CubeFaceImage { size, pixels };
    image.flip_rows();
    Ok(image)
}

/// Writes a captured face into its cube layer. The capture camera leaves each
/// face vertically mirrored relative to cube addressing, so the copy flips
/// rows on the way in.
pub(crate) struct CaptureBlit {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl CaptureBlit {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("CaptureBlitShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/blit.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CaptureBlitLayout"),
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
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("CaptureBlitPipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("CaptureBlitPipeline")
            .with_fragment_entry("fs_flip")
            .with_color_target(HDR_FORMAT, None)
            .build();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("CaptureBlitSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            pipeline,
            layout,
            sampler,
        }
    }

    pub(crate) fn copy(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        src_view: &wgpu::TextureView,
        dst_view: &wgpu::TextureView,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CaptureBlitBindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("CaptureBlitPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: dst_view,
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
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::face_direction;

    /// Capture of one face where every texel stores the world direction it
    /// was rendered from, in framebuffer row order, then reordered the same
    /// way `read_back_face` reorders real captures.
    fn synthetic_capture(
        position: Vec3,
        face: u32,
        size: u32,
        radiance: impl Fn(Vec3) -> Vec3,
    ) -> CubeFaceImage {
        let inverse = (capture_projection() * capture_view(position, face)).inverse();
        let mut image = CubeFaceImage::solid(size, Vec3::ZERO);
        for row in 0..size {
            for col in 0..size {
                let ndc = Vec3::new(
                    (col as f32 + 0.5) * 2.0 / size as f32 - 1.0,
                    1.0 - (row as f32 + 0.5) * 2.0 / size as f32,
                    0.5,
                );
                let dir = (inverse.project_point3(ndc) - position).normalize();
                image.pixels[(row * size + col) as usize] = radiance(dir);
            }
        }
        image.flip_rows();
        image
    }

    #[test]
    fn grid_positions_span_min_to_max() {
        let grid = IrradianceGrid {
            min: Vec3::new(-4.0, 0.0, -4.0),
            max: Vec3::new(4.0, 2.0, 4.0),
            dims: UVec3::new(3, 2, 3),
        };
        assert_eq!(grid.probe_count(), 18);
        assert!(grid.probe_position(0).abs_diff_eq(grid.min, 1e-6));
        assert!(grid
            .probe_position(grid.probe_count() - 1)
            .abs_diff_eq(grid.max, 1e-6));
    }

    #[test]
    fn single_probe_grid_sits_at_min() {
        let grid = IrradianceGrid {
            min: Vec3::splat(1.0),
            max: Vec3::splat(5.0),
            dims: UVec3::ONE,
        };
        assert_eq!(grid.probe_count(), 1);
        assert!(grid.probe_position(0).abs_diff_eq(Vec3::splat(1.0), 1e-6));
    }

    #[test]
    fn capture_texels_land_on_their_attributed_directions() {
        let size = 8u32;
        let position = Vec3::new(0.5, -1.0, 2.0);
        for face in 0..6u32 {
            let image = synthetic_capture(position, face, size, |dir| dir);
            let texel = 2.0 / size as f32;
            for y in 0..size {
                for x in 0..size {
                    let u = (x as f32 + 0.5) * texel - 1.0;
                    let v = (y as f32 + 0.5) * texel - 1.0;
                    let attributed = face_direction(face as usize, u, v);
                    let rendered = image.pixels[(y * size + x) as usize];
                    assert!(
                        rendered.abs_diff_eq(attributed, 1e-3),
                        "face {face} texel ({x},{y}): rendered {rendered:?}, attributed {attributed:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn baked_sh_peaks_toward_an_off_axis_bright_direction() {
        let bright = Vec3::new(1.0, 1.0, 0.0).normalize();
        let position = Vec3::ZERO;
        let faces: [CubeFaceImage; 6] = std::array::from_fn(|face| {
            synthetic_capture(position, face as u32, 16, |dir| {
                Vec3::splat(dir.dot(bright).max(0.0))
            })
        });
        let sh = Sh9::project_cubemap(&faces);

        let peak = sh.eval(bright).x;
        assert!(peak > 0.0);
        assert!(peak > sh.eval(-bright).x.max(0.0) + 0.1);
        assert!(peak > sh.eval(Vec3::X).x);
        assert!(peak > sh.eval(Vec3::Y).x);
        // The vertical mirror of the bright direction must not win.
        let mirrored = Vec3::new(1.0, -1.0, 0.0).normalize();
        assert!(peak > sh.eval(mirrored).x + 0.1);
    }

    #[test]
    fn nearest_captured_probe_is_selected() {
        let probes = [
            FrameProbe {
                entity_index: 0,
                position: Vec3::new(10.0, 0.0, 0.0),
            },
            FrameProbe {
                entity_index: 3,
                position: Vec3::new(2.0, 0.0, 0.0),
            },
            FrameProbe {
                entity_index: 5,
                position: Vec3::ONE,
            },
        ];
        // The closest probe has no capture yet, so the next one wins.
        assert_eq!(nearest_probe(&probes, Vec3::ZERO, |index| index != 5), Some(3));
        assert_eq!(nearest_probe(&probes, Vec3::ZERO, |_| true), Some(5));
        assert_eq!(nearest_probe(&probes, Vec3::ZERO, |_| false), None);
    }

    #[test]
    fn capture_views_look_along_each_axis() {
        let pos = Vec3::new(1.0, 2.0, 3.0);
        let expected = [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ];
        for (face, dir) in expected.into_iter().enumerate() {
            let view = capture_view(pos, face as u32);
            // The view matrix maps the look direction to -Z.
            let mapped = view.transform_vector3(dir);
            assert!(
                mapped.abs_diff_eq(Vec3::NEG_Z, 1e-5),
                "face {face}: {mapped:?}"
            );
        }
    }
}
