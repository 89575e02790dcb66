use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::asset::Assets;
use crate::render::buffers::{FrameBuffers, LightsBinding, ObjectsBuffer};
use crate::render::context::RenderContext;
use crate::render::deferred::{DeferredFrame, DeferredPass};
use crate::render::error::RenderError;
use crate::render::extract::{self, ExtractParams, FrameLists};
use crate::render::forward::{ForwardFrame, ForwardPass, MaterialBindings};
use crate::render::lights::LightsUniform;
use crate::render::post::{BlitRect, PostPass};
use crate::render::probes::{
    capture_projection, capture_view, nearest_probe, read_back_face, CaptureBlit, IrradianceGrid,
    IrradianceVolume, IRRADIANCE_FACE_SIZE, REFLECTION_FACE_SIZE,
};
use crate::render::shadow_atlas::ShadowAtlas;
use crate::render::ssao::SsaoPass;
use crate::render::targets::{RenderTargets, DEPTH_FORMAT, HDR_FORMAT};
use crate::render::texture::Texture;
use crate::render::uniforms::FrameUniform;
use crate::math::Sh9;
use crate::scene::{Camera, Scene};
use crate::settings::{LightMode, PipelineMode, RenderSettings};

/// Per-frame counters returned by `render_scene`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Render calls submitted this frame.
    pub drawn: u32,
    /// Calls rejected by frustum culling.
    pub culled: u32,
    /// Lights shaded this frame.
    pub lights: u32,
    /// Lights beyond the packed-uniform capacity, dropped from shading.
    pub lights_dropped: u32,
    /// Shadow-casting lights left unshadowed because the atlas was full.
    pub shadow_dropped: u32,
}

struct CaptureTargets {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
}

fn capture_targets(device: &wgpu::Device, size: u32) -> CaptureTargets {
    let extent = wgpu::Extent3d {
        width: size,
        height: size,
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("CaptureColor"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: HDR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("CaptureDepth"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
    let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
    CaptureTargets {
        color,
        color_view,
        depth_view,
    }
}

/// Headless scene renderer. Owns the GPU context, the asset store and every
/// pass; each `render_scene` call produces one frame in the output target.
pub struct Renderer {
    context: RenderContext,
    settings: RenderSettings,
    pub assets: Assets,

    frame_buffers: FrameBuffers,
    objects: ObjectsBuffer,
    lights_binding: LightsBinding,
    shadow_atlas: ShadowAtlas,
    materials: MaterialBindings,

    forward: ForwardPass,
    deferred: DeferredPass,
    ssao: SsaoPass,
    post: PostPass,

    targets: Option<RenderTargets>,
    black_cube: Texture,
    /// Captured reflection cubemaps, keyed by probe entity index.
    environments: HashMap<usize, Texture>,
    /// Probe whose cube is currently bound as the specular environment.
    bound_environment: Option<usize>,
    irradiance_volume: Option<IrradianceVolume>,
}

impl Renderer {
    pub fn new(settings: RenderSettings) -> Result<Self, RenderError> {
        let context = RenderContext::new_blocking()?;
        let settings = settings.validate();
        let device = &context.device;
        let queue = &context.queue;

        let frame_buffers = FrameBuffers::new(device);
        let objects = ObjectsBuffer::new(device, 256);
        let shadow_atlas = ShadowAtlas::new(device, &objects.bind_layout, settings.shadow_atlas_size);
        let black_cube = Texture::black_cube(device, queue);
        let lights_binding = LightsBinding::new(
            device,
            LightsBinding::layout(device),
            shadow_atlas.view(),
            shadow_atlas.comparison_sampler(),
            &black_cube.view,
            &black_cube.sampler,
        );
        let materials = MaterialBindings::new(device, queue);

        let forward = ForwardPass::new(
            device,
            &frame_buffers.bind_layout,
            &objects.bind_layout,
            &lights_binding.bind_layout,
            &materials.layout,
        );
        let deferred = DeferredPass::new(
            device,
            frame_buffers.frame_buffer(),
            &frame_buffers.bind_layout,
            &objects.bind_layout,
            &lights_binding.bind_layout,
            &materials.layout,
        );
        let ssao = SsaoPass::new(device, frame_buffers.frame_buffer());
        let post = PostPass::new(device);

        Ok(Self {
            context,
            settings,
            assets: Assets::new(),
            frame_buffers,
            objects,
            lights_binding,
            shadow_atlas,
            materials,
            forward,
            deferred,
            ssao,
            post,
            targets: None,
            black_cube,
            environments: HashMap::new(),
            bound_environment: None,
            irradiance_volume: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Changes the output resolution; targets are rebuilt on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::warn!("Ignoring resize to {width}x{height}");
            return;
        }
        self.settings.resolution.width = width;
        self.settings.resolution.height = height;
    }

    fn ensure_targets(&mut self) {
        let width = self.settings.resolution.width;
        let height = self.settings.resolution.height;
        let current = match &self.targets {
            Some(t) => t.width == width && t.height == height,
            None => false,
        };
        if current {
            return;
        }

        let device = &self.context.device;
        let targets = RenderTargets::new(device, width, height);
        self.ssao.rebind(device, &targets);
        let ssao_view = SsaoPass::output_view(&targets, self.settings.ssao_blur);
        self.deferred.rebind(device, &targets, ssao_view);
        if let Some(volume) = &self.irradiance_volume {
            self.deferred.rebind_irradiance(
                device,
                &self.context.queue,
                &targets,
                ssao_view,
                volume,
            );
        }
        self.targets = Some(targets);
    }

    fn extract_lists(&self, scene: &Scene, camera: Option<(&Camera, f32)>) -> FrameLists {
        let (eye, frustum) = match camera {
            Some((camera, aspect)) => (camera.eye, Some(camera.frustum(aspect))),
            None => (Vec3::ZERO, None),
        };
        let params = ExtractParams {
            eye,
            frustum: frustum.as_ref(),
            order_calls: self.settings.order_calls,
            sort_lights: true,
        };
        extract::extract(scene, &self.assets, &params)
    }

    /// Renders one frame into the output target and returns its counters.
    pub fn render_scene(&mut self, scene: &Scene, camera: &Camera) -> FrameStats {
        self.ensure_targets();
        let Some(targets) = self.targets.as_ref() else {
            return FrameStats::default();
        };

        let width = targets.width;
        let height = targets.height;
        let aspect = width as f32 / height as f32;
        let lists = self.extract_lists(scene, Some((camera, aspect)));

        let device = &self.context.device;
        let queue = &self.context.queue;

        self.objects.update(device, queue, &lists.calls, &self.assets);
        self.shadow_atlas.begin_frame(queue, &lists.lights);

        let slots = self.shadow_atlas.slots_by_light(lists.lights.len());
        let (lights_uniform, lights_dropped) =
            LightsUniform::pack(&lists.lights, &slots, self.settings.ambient_color());
        self.lights_binding.write(queue, &lights_uniform);

        // Shade with the captured probe nearest the camera, if any.
        let nearest = nearest_probe(&lists.probes, camera.eye, |index| {
            self.environments.contains_key(&index)
        });
        if nearest != self.bound_environment {
            let cube = nearest
                .and_then(|index| self.environments.get(&index))
                .unwrap_or(&self.black_cube);
            self.lights_binding.rebind(
                device,
                self.shadow_atlas.view(),
                self.shadow_atlas.comparison_sampler(),
                &cube.view,
                &cube.sampler,
            );
            self.bound_environment = nearest;
        }

        let deferred_mode = self.settings.pipeline == PipelineMode::Deferred;
        let ssao_enabled = self.settings.ssao && deferred_mode;
        let irradiance_enabled =
            self.settings.irradiance && deferred_mode && self.irradiance_volume.is_some();
        let reflections_enabled = self.settings.reflections && nearest.is_some();
        let single_pass = self.settings.light_mode == LightMode::SinglePass;
        let light_count = lights_uniform.counts[0] as usize;

        self.frame_buffers.write_frame(
            queue,
            &FrameUniform::new(
                camera.view_proj(aspect),
                camera.eye,
                false,
                self.settings.ambient_color(),
                ssao_enabled,
                irradiance_enabled,
                reflections_enabled,
                (width, height),
            ),
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("FrameEncoder"),
        });

        self.shadow_atlas
            .render(&mut encoder, &lists.calls, &self.assets, &self.objects.bind_group);

        if deferred_mode {
            let frame = DeferredFrame {
                calls: &lists.calls,
                decals: &lists.decals,
                lights: &lists.lights,
                assets: &self.assets,
                single_pass,
                light_volumes: self.settings.light_volumes,
            };
            self.deferred.record_geometry(
                device,
                queue,
                &mut encoder,
                &self.frame_buffers,
                &self.objects,
                &mut self.materials,
                targets,
                &frame,
                self.settings.decals,
            );
            if ssao_enabled {
                self.ssao
                    .record(&mut encoder, targets, self.settings.ssao_blur);
            }
            self.deferred.record_lighting(
                queue,
                &mut encoder,
                &self.frame_buffers,
                &self.lights_binding,
                targets,
                &frame,
                irradiance_enabled,
                self.settings.volumetric,
            );
            self.forward.record_blended(
                device,
                queue,
                &mut encoder,
                &self.frame_buffers,
                &self.objects,
                &self.lights_binding,
                &mut self.materials,
                &ForwardFrame {
                    color_view: &targets.hdr.view,
                    depth_view: &targets.depth.view,
                    clear_color: wgpu::Color::BLACK,
                    calls: &lists.calls,
                    assets: &self.assets,
                    light_count,
                    single_pass: true,
                },
            );
        } else {
            self.forward.record(
                device,
                queue,
                &mut encoder,
                &self.frame_buffers,
                &self.objects,
                &self.lights_binding,
                &mut self.materials,
                &ForwardFrame {
                    color_view: &targets.hdr.view,
                    depth_view: &targets.depth.view,
                    clear_color: wgpu::Color::BLACK,
                    calls: &lists.calls,
                    assets: &self.assets,
                    light_count,
                    single_pass,
                },
            );
        }

        if self.settings.tonemap {
            self.post
                .write_tonemap_params(queue, &self.settings.tonemap_params);
            self.post.tonemap(
                device,
                &mut encoder,
                &targets.hdr.view,
                &targets.linear_sampler,
                &targets.output.view,
            );
        } else {
            self.post.blit(
                device,
                &mut encoder,
                &targets.hdr.view,
                &targets.linear_sampler,
                &targets.output.view,
                None,
            );
        }

        if self.settings.show_gbuffers && deferred_mode {
            let tile_w = width as f32 / 4.0;
            let tile_h = height as f32 / 4.0;
            let y = height as f32 - tile_h;
            let views = [
                &targets.gbuffer_albedo.view,
                &targets.gbuffer_normal.view,
                &targets.gbuffer_metallic.view,
                SsaoPass::output_view(targets, self.settings.ssao_blur),
            ];
            for (index, view) in views.into_iter().enumerate() {
                self.post.blit(
                    device,
                    &mut encoder,
                    view,
                    &targets.linear_sampler,
                    &targets.output.view,
                    Some(BlitRect {
                        x: index as f32 * tile_w,
                        y,
                        width: tile_w,
                        height: tile_h,
                    }),
                );
            }
        }
        if self.settings.show_atlas {
            let size = (height as f32 / 3.0).floor();
            self.post.blit_depth(
                device,
                &mut encoder,
                self.shadow_atlas.view(),
                &targets.nearest_sampler,
                &targets.output.view,
                BlitRect {
                    x: width as f32 - size,
                    y: 0.0,
                    width: size,
                    height: size,
                },
            );
        }

        queue.submit(Some(encoder.finish()));

        FrameStats {
            drawn: lists.calls.len() as u32,
            culled: lists.culled,
            lights: lights_uniform.counts[0],
            lights_dropped,
            shadow_dropped: self.shadow_atlas.dropped(),
        }
    }

    /// Captures an environment cubemap at every reflection probe in the
    /// scene, allocating each probe's cube on its first capture. Captures
    /// render with single-pass lighting and a black environment so probes
    /// never see themselves or each other; shading binds the captured cube
    /// nearest the camera.
    pub fn update_reflection_probes(&mut self, scene: &Scene) {
        let lists = self.extract_lists(scene, None);
        if lists.probes.is_empty() {
            log::debug!("No reflection probes in scene");
            return;
        }

        let device = &self.context.device;
        let queue = &self.context.queue;

        self.objects.update(device, queue, &lists.calls, &self.assets);
        self.shadow_atlas.begin_frame(queue, &lists.lights);
        let slots = self.shadow_atlas.slots_by_light(lists.lights.len());
        let (lights_uniform, _) =
            LightsUniform::pack(&lists.lights, &slots, self.settings.ambient_color());
        self.lights_binding.write(queue, &lights_uniform);
        self.lights_binding.rebind(
            device,
            self.shadow_atlas.view(),
            self.shadow_atlas.comparison_sampler(),
            &self.black_cube.view,
            &self.black_cube.sampler,
        );
        self.bound_environment = None;

        // Probes removed from the scene release their captures.
        let present: HashSet<usize> = lists.probes.iter().map(|p| p.entity_index).collect();
        self.environments.retain(|index, _| present.contains(index));

        let scratch = capture_targets(device, REFLECTION_FACE_SIZE);
        let face_blit = CaptureBlit::new(device);
        let light_count = lights_uniform.counts[0] as usize;
        let mips = Texture::calculate_mip_levels(REFLECTION_FACE_SIZE, REFLECTION_FACE_SIZE);
        let mut shadows_rendered = false;

        for probe in &lists.probes {
            self.environments.entry(probe.entity_index).or_insert_with(|| {
                Texture::cube(
                    &self.context.device,
                    REFLECTION_FACE_SIZE,
                    HDR_FORMAT,
                    true,
                    "Environment",
                )
            });

            for face in 0..6u32 {
                self.render_capture_face(
                    probe.position,
                    face,
                    REFLECTION_FACE_SIZE,
                    &scratch.color_view,
                    &scratch.depth_view,
                    &lists,
                    light_count,
                    !std::mem::replace(&mut shadows_rendered, true),
                );
                // Row-flipped copy into the cube layer; see CaptureBlit.
                let cube = &self.environments[&probe.entity_index];
                let mut encoder = self.context.device.create_command_encoder(
                    &wgpu::CommandEncoderDescriptor {
                        label: Some("CaptureBlitEncoder"),
                    },
                );
                face_blit.copy(
                    &self.context.device,
                    &mut encoder,
                    &scratch.color_view,
                    &cube.face_view(face, 0),
                );
                self.context.queue.submit(Some(encoder.finish()));
            }

            let cube = &self.environments[&probe.entity_index];
            Texture::generate_mipmaps(
                &self.context.device,
                &self.context.queue,
                &cube.texture,
                mips,
                HDR_FORMAT,
                6,
            );
            log::info!("Captured reflection probe at {:?}", probe.position);
        }
    }

    /// Bakes the irradiance probe lattice: every probe captures six small HDR
    /// faces which are read back and projected onto 9 SH coefficients.
    pub fn calculate_irradiance_probes(
        &mut self,
        scene: &Scene,
        grid: IrradianceGrid,
    ) -> Result<(), RenderError> {
        let lists = self.extract_lists(scene, None);
        let device = &self.context.device;
        let queue = &self.context.queue;

        self.objects.update(device, queue, &lists.calls, &self.assets);
        self.shadow_atlas.begin_frame(queue, &lists.lights);
        let slots = self.shadow_atlas.slots_by_light(lists.lights.len());
        let (lights_uniform, _) =
            LightsUniform::pack(&lists.lights, &slots, self.settings.ambient_color());
        self.lights_binding.write(queue, &lights_uniform);
        self.lights_binding.rebind(
            device,
            self.shadow_atlas.view(),
            self.shadow_atlas.comparison_sampler(),
            &self.black_cube.view,
            &self.black_cube.sampler,
        );
        // The next frame's nearest-probe selection restores the binding.
        self.bound_environment = None;

        let volume = IrradianceVolume::new(device, grid);
        let scratch = capture_targets(device, IRRADIANCE_FACE_SIZE);
        let light_count = lights_uniform.counts[0] as usize;

        for index in 0..grid.probe_count() {
            let position = grid.probe_position(index);
            let mut faces = std::array::from_fn::<_, 6, _>(|_| {
                crate::math::CubeFaceImage::solid(IRRADIANCE_FACE_SIZE, Vec3::ZERO)
            });
            for face in 0..6u32 {
                self.render_capture_face(
                    position,
                    face,
                    IRRADIANCE_FACE_SIZE,
                    &scratch.color_view,
                    &scratch.depth_view,
                    &lists,
                    light_count,
                    index == 0 && face == 0,
                );
                faces[face as usize] = read_back_face(
                    &self.context.device,
                    &self.context.queue,
                    &scratch.color,
                    IRRADIANCE_FACE_SIZE,
                )?;
            }
            let sh = Sh9::project_cubemap(&faces);
            volume.write_probe(&self.context.queue, index, &sh);
        }

        if let Some(targets) = &self.targets {
            let ssao_view = SsaoPass::output_view(targets, self.settings.ssao_blur);
            self.deferred.rebind_irradiance(
                &self.context.device,
                &self.context.queue,
                targets,
                ssao_view,
                &volume,
            );
        }
        self.irradiance_volume = Some(volume);
        log::info!("Baked {} irradiance probes", grid.probe_count());
        Ok(())
    }

    /// Renders one cube face capture and submits it. Captures always shade
    /// single-pass with ambient, never recursively reflect, and reuse the
    /// shadow atlas laid down by the first face.
    #[allow(clippy::too_many_arguments)]
    fn render_capture_face(
        &mut self,
        position: Vec3,
        face: u32,
        face_size: u32,
        color_view: &wgpu::TextureView,
        depth_view: &wgpu::TextureView,
        lists: &FrameLists,
        light_count: usize,
        render_shadows: bool,
    ) {
        let queue = &self.context.queue;
        let view_proj = capture_projection() * capture_view(position, face);
        self.frame_buffers.write_frame(
            queue,
            &FrameUniform::new(
                view_proj,
                position,
                true,
                self.settings.ambient_color(),
                false,
                false,
                false,
                (face_size, face_size),
            ),
        );

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("CaptureEncoder"),
                });
        if render_shadows {
            self.shadow_atlas.render(
                &mut encoder,
                &lists.calls,
                &self.assets,
                &self.objects.bind_group,
            );
        }
        self.forward.record(
            &self.context.device,
            queue,
            &mut encoder,
            &self.frame_buffers,
            &self.objects,
            &self.lights_binding,
            &mut self.materials,
            &ForwardFrame {
                color_view,
                depth_view,
                clear_color: wgpu::Color::BLACK,
                calls: &lists.calls,
                assets: &self.assets,
                light_count,
                single_pass: true,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));
    }

    /// Reads the output target back as tightly packed RGBA8 rows.
    pub fn read_output(&self) -> Result<Vec<u8>, RenderError> {
        let Some(targets) = &self.targets else {
            return Ok(Vec::new());
        };
        let device = &self.context.device;
        let width = targets.width;
        let height = targets.height;
        let unpadded = width * 4;
        let padded = unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OutputReadbackBuffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("OutputReadbackEncoder"),
        });
        encoder.copy_texture_to_buffer(
            targets.output.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::PollType::wait_indefinitely())?;
        receiver.recv().unwrap_or(Err(wgpu::BufferAsyncError))?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = buffer.slice(..).get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }
}
