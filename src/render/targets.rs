pub(crate) struct Target {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
}

fn make_target(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
    label: &str,
) -> Target {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Target { texture, view }
}

/// Every offscreen target a frame can touch, created together and replaced
/// wholesale when the output resolution changes.
pub(crate) struct RenderTargets {
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Final presentable image.
    pub(crate) output: Target,
    pub(crate) depth: Target,
    /// HDR accumulation target for deferred lighting and tone-map input.
    pub(crate) hdr: Target,
    pub(crate) gbuffer_albedo: Target,
    pub(crate) gbuffer_normal: Target,
    pub(crate) gbuffer_metallic: Target,
    pub(crate) ssao: Target,
    pub(crate) ssao_blurred: Target,
    pub(crate) linear_sampler: wgpu::Sampler,
    pub(crate) nearest_sampler: wgpu::Sampler,
}

pub(crate) const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub(crate) const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub(crate) const GBUFFER_ALBEDO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub(crate) const GBUFFER_NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub(crate) const GBUFFER_METALLIC_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub(crate) const SSAO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

impl RenderTargets {
    pub(crate) fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let attach = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;

        log::info!("Creating {width}x{height} render targets");

        Self {
            width,
            height,
            output: make_target(
                device,
                width,
                height,
                OUTPUT_FORMAT,
                attach | wgpu::TextureUsages::COPY_SRC,
                "OutputTarget",
            ),
            depth: make_target(device, width, height, DEPTH_FORMAT, attach, "DepthTarget"),
            hdr: make_target(device, width, height, HDR_FORMAT, attach, "HdrTarget"),
            gbuffer_albedo: make_target(
                device,
                width,
                height,
                GBUFFER_ALBEDO_FORMAT,
                attach,
                "GBufferAlbedo",
            ),
            gbuffer_normal: make_target(
                device,
                width,
                height,
                GBUFFER_NORMAL_FORMAT,
                attach,
                "GBufferNormal",
            ),
            gbuffer_metallic: make_target(
                device,
                width,
                height,
                GBUFFER_METALLIC_FORMAT,
                attach,
                "GBufferMetallic",
            ),
            ssao: make_target(device, width, height, SSAO_FORMAT, attach, "SsaoTarget"),
            ssao_blurred: make_target(
                device,
                width,
                height,
                SSAO_FORMAT,
                attach,
                "SsaoBlurredTarget",
            ),
            linear_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("TargetLinearSampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            }),
            nearest_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("TargetNearestSampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            }),
        }
    }
}
