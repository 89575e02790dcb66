use std::mem;
use std::num::NonZeroU64;

use bytemuck::Zeroable;
use wgpu::util::DeviceExt;

use crate::asset::Assets;
use crate::render::extract::RenderCall;
use crate::render::lights::LightsUniform;
use crate::render::uniforms::{FrameUniform, MaterialData, ObjectData, PassUniform};

pub(crate) const PASS_UNIFORM_STRIDE: u64 = 256;
// Enough pass slots for one draw per light plus the ambient-only and
// full-screen extras a deferred frame needs.
pub(crate) const MAX_PASS_SLOTS: u64 = (crate::render::lights::MAX_LIGHTS + 4) as u64;

/// Per-call object records plus the material constant table, both storage
/// buffers. Objects are written in call order and indexed in shaders by
/// `instance_index`; materials are indexed by `ObjectData::material_index`.
pub(crate) struct ObjectsBuffer {
    objects: wgpu::Buffer,
    objects_capacity: u32,
    materials: wgpu::Buffer,
    materials_capacity: u32,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
    scratch: Vec<ObjectData>,
}

impl ObjectsBuffer {
    pub(crate) fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ObjectsBindLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let objects = Self::storage_buffer::<ObjectData>(device, "ObjectsBuffer", capacity);
        let materials = Self::storage_buffer::<MaterialData>(device, "MaterialsBuffer", capacity);
        let bind_group = Self::bind_group(device, &bind_layout, &objects, &materials);

        Self {
            objects,
            objects_capacity: capacity,
            materials,
            materials_capacity: capacity,
            bind_group,
            bind_layout,
            scratch: Vec::with_capacity(capacity as usize),
        }
    }

    fn storage_buffer<T>(device: &wgpu::Device, label: &str, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (capacity.max(1) as usize * mem::size_of::<T>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        objects: &wgpu::Buffer,
        materials: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ObjectsBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: objects.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: materials.as_entire_binding(),
                },
            ],
        })
    }

    pub(crate) fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        calls: &[RenderCall],
        assets: &Assets,
    ) {
        self.scratch.clear();
        for call in calls {
            self.scratch
                .push(ObjectData::new(call.model, call.material.index() as u32));
        }

        let mut materials: Vec<MaterialData> = Vec::with_capacity(assets.materials.len());
        for index in 0..assets.materials.len() {
            let handle = crate::asset::Handle::new(index);
            match assets.materials.get(handle) {
                Some(material) => materials.push(MaterialData::from_material(material)),
                None => materials.push(MaterialData::zeroed()),
            }
        }

        let mut rebind = false;
        if self.scratch.len() as u32 > self.objects_capacity {
            self.objects_capacity = (self.scratch.len() as u32).max(self.objects_capacity * 2);
            log::info!("Growing objects buffer to {}", self.objects_capacity);
            self.objects =
                Self::storage_buffer::<ObjectData>(device, "ObjectsBuffer", self.objects_capacity);
            rebind = true;
        }
        if materials.len() as u32 > self.materials_capacity {
            self.materials_capacity = (materials.len() as u32).max(self.materials_capacity * 2);
            log::info!("Growing materials buffer to {}", self.materials_capacity);
            self.materials = Self::storage_buffer::<MaterialData>(
                device,
                "MaterialsBuffer",
                self.materials_capacity,
            );
            rebind = true;
        }
        if rebind {
            self.bind_group =
                Self::bind_group(device, &self.bind_layout, &self.objects, &self.materials);
        }

        if !self.scratch.is_empty() {
            queue.write_buffer(&self.objects, 0, bytemuck::cast_slice(&self.scratch));
        }
        if !materials.is_empty() {
            queue.write_buffer(&self.materials, 0, bytemuck::cast_slice(&materials));
        }
    }
}

/// Frame-constant uniform plus the dynamic-offset pass uniform shared by
/// every lit pipeline.
pub(crate) struct FrameBuffers {
    frame: wgpu::Buffer,
    pass: wgpu::Buffer,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
}

impl FrameBuffers {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let frame = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FrameUniformBuffer"),
            contents: bytemuck::bytes_of(&FrameUniform::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let pass = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PassUniformBuffer"),
            size: PASS_UNIFORM_STRIDE * MAX_PASS_SLOTS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("FrameBindLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: Some(
                            NonZeroU64::new(mem::size_of::<FrameUniform>() as u64).unwrap(),
                        ),
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
                            NonZeroU64::new(mem::size_of::<PassUniform>() as u64).unwrap(),
                        ),
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FrameBindGroup"),
            layout: &bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &pass,
                        offset: 0,
                        size: NonZeroU64::new(mem::size_of::<PassUniform>() as u64),
                    }),
                },
            ],
        });

        Self {
            frame,
            pass,
            bind_group,
            bind_layout,
        }
    }

    /// The frame-constant uniform buffer, for passes with their own group 0
    /// layout that still read the frame constants.
    pub(crate) fn frame_buffer(&self) -> &wgpu::Buffer {
        &self.frame
    }

    pub(crate) fn write_frame(&self, queue: &wgpu::Queue, frame: &FrameUniform) {
        queue.write_buffer(&self.frame, 0, bytemuck::bytes_of(frame));
    }

    /// Writes one pass slot; draws select it with `pass_offset(slot)`.
    pub(crate) fn write_pass(&self, queue: &wgpu::Queue, slot: u64, pass: &PassUniform) {
        debug_assert!(slot < MAX_PASS_SLOTS);
        queue.write_buffer(
            &self.pass,
            slot * PASS_UNIFORM_STRIDE,
            bytemuck::bytes_of(pass),
        );
    }

    pub(crate) fn pass_offset(slot: u64) -> u32 {
        (slot * PASS_UNIFORM_STRIDE) as u32
    }
}

/// Lights uniform, the shadow atlas bindings and the active specular
/// cubemap. Rebuilt whenever the bound cubemap changes (capture start/end).
pub(crate) struct LightsBinding {
    buffer: wgpu::Buffer,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
}

impl LightsBinding {
    pub(crate) fn layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LightsBindLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: Some(
                            NonZeroU64::new(mem::size_of::<LightsUniform>() as u64).unwrap(),
                        ),
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
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        })
    }

    pub(crate) fn new(
        device: &wgpu::Device,
        layout: wgpu::BindGroupLayout,
        atlas_view: &wgpu::TextureView,
        atlas_sampler: &wgpu::Sampler,
        cube_view: &wgpu::TextureView,
        cube_sampler: &wgpu::Sampler,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("LightsBuffer"),
            contents: bytemuck::bytes_of(&LightsUniform::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = Self::build_bind_group(
            device,
            &layout,
            &buffer,
            atlas_view,
            atlas_sampler,
            cube_view,
            cube_sampler,
        );

        Self {
            buffer,
            bind_group,
            bind_layout: layout,
        }
    }

    fn build_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        buffer: &wgpu::Buffer,
        atlas_view: &wgpu::TextureView,
        atlas_sampler: &wgpu::Sampler,
        cube_view: &wgpu::TextureView,
        cube_sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LightsBindGroup"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(atlas_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(atlas_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(cube_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(cube_sampler),
                },
            ],
        })
    }

    pub(crate) fn rebind(
        &mut self,
        device: &wgpu::Device,
        atlas_view: &wgpu::TextureView,
        atlas_sampler: &wgpu::Sampler,
        cube_view: &wgpu::TextureView,
        cube_sampler: &wgpu::Sampler,
    ) {
        self.bind_group = Self::build_bind_group(
            device,
            &self.bind_layout,
            &self.buffer,
            atlas_view,
            atlas_sampler,
            cube_view,
            cube_sampler,
        );
    }

    pub(crate) fn write(&self, queue: &wgpu::Queue, uniform: &LightsUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(uniform));
    }
}
