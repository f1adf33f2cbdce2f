//! wgpu backend implementation
//!
//! Headless: no surface, no swapchain. Work is encoded into a single command
//! encoder and submitted on [`GraphicsBackend::flush`]. A validation error
//! scope spans each encoder's lifetime, so anything the device rejects while
//! recording or submitting comes back from `flush`.

mod mipmap;
mod readback;

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;

use self::mipmap::MipmapGenerator;

/// Uniform block shared by every capture program (group 0, binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CaptureUniforms {
    projection: Mat4,
    view: Mat4,
    /// x: roughness, y: source resolution
    params: Vec4,
}

impl Default for CaptureUniforms {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            params: Vec4::ZERO,
        }
    }
}

struct WgpuTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct WgpuRenderTarget {
    desc: RenderTargetDescriptor,
    owned: Option<TextureHandle>,
    attachment: Option<ColorAttachment>,
}

struct WgpuProgram {
    desc: ShaderDescriptor,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    uniforms: CaptureUniforms,
    texture_unit: u32,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Resource storage
    textures: HashMap<u64, WgpuTexture>,
    render_targets: HashMap<u64, WgpuRenderTarget>,
    programs: HashMap<u64, WgpuProgram>,
    sampler: wgpu::Sampler,
    mipmaps: MipmapGenerator,

    // Handle counters
    next_texture_id: u64,
    next_target_id: u64,
    next_program_id: u64,

    // Immediate state
    texture_units: HashMap<u32, TextureHandle>,
    current_target: Option<RenderTargetHandle>,
    viewport: Viewport,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
}

/// The open command encoder, created on first use together with the error
/// scope that `flush` closes.
fn active_encoder<'a>(
    device: &wgpu::Device,
    slot: &'a mut Option<wgpu::CommandEncoder>,
) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Environment Encoder"),
        })
    })
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_view_dimension(kind: TextureKind) -> wgpu::TextureViewDimension {
        match kind {
            TextureKind::D2 => wgpu::TextureViewDimension::D2,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
        }
    }

    /// Create a headless backend, blocking on adapter and device requests.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Some(adapter) => adapter,
            None => {
                log::warn!("No hardware adapter available, falling back to software adapter");
                instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        compatible_surface: None,
                        force_fallback_adapter: true,
                    })
                    .await
                    .ok_or_else(|| {
                        BackendError::InitializationFailed("No suitable adapter found".into())
                    })?
            }
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Environment Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu: {error}");
        }));

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Environment Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let mipmaps = MipmapGenerator::new(&device);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            programs: HashMap::new(),
            sampler,
            mipmaps,
            next_texture_id: 1,
            next_target_id: 1,
            next_program_id: 1,
            texture_units: HashMap::new(),
            current_target: None,
            viewport: Viewport::default(),
            encoder: None,
        })
    }

    /// Get reference to the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Block until every submitted command buffer has executed.
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    fn validate_wgsl(label: &str, source: &str) -> BackendResult<()> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            BackendError::ShaderCreationFailed {
                label: label.to_string(),
                message: e.emit_to_string(source),
            }
        })?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| BackendError::ShaderCreationFailed {
            label: label.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn texture(&self, texture: TextureHandle) -> BackendResult<&WgpuTexture> {
        self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn color_output(target: &WgpuRenderTarget) -> BackendResult<ColorAttachment> {
        target
            .attachment
            .or_else(|| {
                target.owned.map(|texture| ColorAttachment::Texture2d { texture, mip: 0 })
            })
            .ok_or_else(|| BackendError::InvalidOperation("render target has no color output".into()))
    }

    /// Single-layer, single-mip view suitable as a color attachment
    fn attachment_view(texture: &wgpu::Texture, attachment: ColorAttachment) -> wgpu::TextureView {
        texture.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            format: None,
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: attachment.mip(),
            mip_level_count: Some(1),
            base_array_layer: attachment.layer(),
            array_layer_count: Some(1),
        })
    }

    /// Resolve the bound target to its attachment, texture and mip extent
    fn bound_output<'a>(
        render_targets: &HashMap<u64, WgpuRenderTarget>,
        textures: &'a HashMap<u64, WgpuTexture>,
        current: Option<RenderTargetHandle>,
    ) -> BackendResult<(ColorAttachment, &'a WgpuTexture, (u32, u32))> {
        let handle = current.ok_or_else(|| {
            BackendError::InvalidOperation("no render target bound".into())
        })?;
        let target = render_targets
            .get(&handle.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "render target",
                id: handle.0,
            })?;
        let attachment = Self::color_output(target)?;
        let color = textures
            .get(&attachment.texture().0)
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: attachment.texture().0,
            })?;
        let extent = (
            (color.desc.width >> attachment.mip()).max(1),
            (color.desc.height >> attachment.mip()).max(1),
        );
        Ok((attachment, color, extent))
    }

    fn build_pipeline(
        device: &wgpu::Device,
        program: &WgpuProgram,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.desc.label),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: size {}x{} outside 1..={max}",
                desc.label, desc.width, desc.height
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.kind.layers(),
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::TextureCreationFailed(error.to_string()));
        }

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            WgpuTexture {
                texture,
                desc: desc.clone(),
            },
        );

        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let tex = self.texture(texture)?;
        if tex.desc.kind != TextureKind::D2 || data.len() != tex.desc.layer_size_bytes() {
            return Err(BackendError::InvalidOperation(format!(
                "write_texture: expected {} bytes for a 2D texture, got {}",
                tex.desc.layer_size_bytes(),
                data.len()
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(tex.desc.width * tex.desc.format.bytes_per_pixel()),
                rows_per_image: Some(tex.desc.height),
            },
            wgpu::Extent3d {
                width: tex.desc.width,
                height: tex.desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.texture_units.insert(unit, texture);
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let tex = self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        if tex.desc.mip_levels <= 1 {
            return Ok(());
        }
        if !tex
            .desc
            .usage
            .contains(TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING)
        {
            return Err(BackendError::InvalidOperation(
                "mipmap generation needs a renderable, sampled texture".into(),
            ));
        }

        let encoder = active_encoder(&self.device, &mut self.encoder);
        self.mipmaps.generate(
            &self.device,
            encoder,
            &tex.texture,
            Self::convert_texture_format(tex.desc.format),
            tex.desc.kind,
            tex.desc.mip_levels,
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.texture_units.retain(|_, bound| *bound != texture);
        self.textures.remove(&texture.0);
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::RenderTargetCreationFailed(format!(
                "{:?}: zero-sized target",
                desc.label
            )));
        }

        let owned = match desc.color {
            ColorStorage::Dynamic => None,
            ColorStorage::Owned => {
                let mut texture_desc = TextureDescriptor::new_2d(
                    desc.width,
                    desc.height,
                    desc.format,
                    TextureUsage::RENDER_ATTACHMENT
                        | TextureUsage::TEXTURE_BINDING
                        | TextureUsage::COPY_SRC,
                );
                texture_desc.label = desc.label.clone();
                Some(self.create_texture(&texture_desc)?)
            }
        };

        let id = self.next_target_id;
        self.next_target_id += 1;
        self.render_targets.insert(
            id,
            WgpuRenderTarget {
                desc: desc.clone(),
                owned,
                attachment: None,
            },
        );
        Ok(RenderTargetHandle(id))
    }

    fn render_target_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle> {
        self.render_targets.get(&target.0).and_then(|t| t.owned)
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetHandle>) {
        self.current_target = target;
    }

    fn current_render_target(&self) -> Option<RenderTargetHandle> {
        self.current_target
    }

    fn attach_color(
        &mut self,
        target: RenderTargetHandle,
        attachment: ColorAttachment,
    ) -> BackendResult<()> {
        let tex = self.texture(attachment.texture())?;
        if attachment.mip() >= tex.desc.mip_levels || attachment.layer() >= tex.desc.kind.layers()
        {
            return Err(BackendError::InvalidOperation(format!(
                "attachment {attachment:?} out of range"
            )));
        }
        if !tex.desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::InvalidOperation(
                "texture is not renderable".into(),
            ));
        }

        let entry = self
            .render_targets
            .get_mut(&target.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "render target",
                id: target.0,
            })?;
        entry.attachment = Some(attachment);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn clear(&mut self, color: [f32; 4]) -> BackendResult<()> {
        let (attachment, tex, _) =
            Self::bound_output(&self.render_targets, &self.textures, self.current_target)?;
        let view = Self::attachment_view(&tex.texture, attachment);

        let encoder = active_encoder(&self.device, &mut self.encoder);
        // The pass ends as soon as it is dropped; the load op does the work
        let _ = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0] as f64,
                        g: color[1] as f64,
                        b: color[2] as f64,
                        a: color[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn create_program(&mut self, desc: &ShaderDescriptor) -> BackendResult<ProgramHandle> {
        let source = desc.linked_source();
        Self::validate_wgsl(&desc.label, &source)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        if let Some(kind) = desc.input {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: Self::convert_view_dimension(kind),
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&desc.label),
                    entries: &entries,
                });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCreationFailed {
                label: desc.label.clone(),
                message: error.to_string(),
            });
        }
        log::debug!("WgpuBackend: compiled program {}", desc.label);

        let id = self.next_program_id;
        self.next_program_id += 1;
        self.programs.insert(
            id,
            WgpuProgram {
                desc: desc.clone(),
                module,
                bind_group_layout,
                pipeline_layout,
                pipelines: HashMap::new(),
                uniforms: CaptureUniforms::default(),
                texture_unit: 0,
            },
        );
        Ok(ProgramHandle(id))
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue) {
        let Some(entry) = self.programs.get_mut(&program.0) else {
            log::warn!("WgpuBackend: set_uniform on unknown program {:?}", program);
            return;
        };
        match (name, value) {
            (uniform_names::PROJECTION, UniformValue::Mat4(m)) => entry.uniforms.projection = m,
            (uniform_names::VIEW, UniformValue::Mat4(m)) => entry.uniforms.view = m,
            (uniform_names::ROUGHNESS, UniformValue::Float(v)) => entry.uniforms.params.x = v,
            (uniform_names::RESOLUTION, UniformValue::Float(v)) => entry.uniforms.params.y = v,
            (uniform_names::ENVIRONMENT_MAP, UniformValue::Int(unit)) => {
                entry.texture_unit = unit.max(0) as u32
            }
            _ => log::warn!(
                "WgpuBackend: program {} has no uniform '{}' of type {:?}",
                entry.desc.label,
                name,
                value
            ),
        }
    }

    fn draw_mesh(&mut self, mesh: MeshKind, program: ProgramHandle) -> BackendResult<()> {
        let (attachment, color, extent) =
            Self::bound_output(&self.render_targets, &self.textures, self.current_target)?;
        let viewport = self.viewport;
        if !viewport.fits(extent.0, extent.1) {
            return Err(BackendError::InvalidOperation(format!(
                "viewport {viewport:?} exceeds {}x{} attachment",
                extent.0, extent.1
            )));
        }
        let format = Self::convert_texture_format(color.desc.format);

        let prog = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "program",
                id: program.0,
            })?;
        if prog.desc.mesh != mesh {
            return Err(BackendError::InvalidOperation(format!(
                "program {} expects {:?}, got {:?}",
                prog.desc.label, prog.desc.mesh, mesh
            )));
        }
        if !prog.pipelines.contains_key(&format) {
            let pipeline = Self::build_pipeline(&self.device, prog, format);
            prog.pipelines.insert(format, pipeline);
        }
        let prog = &*prog;
        let Some(pipeline) = prog.pipelines.get(&format) else {
            return Err(BackendError::InvalidOperation("pipeline unavailable".into()));
        };

        let input_view = match prog.desc.input {
            Some(kind) => {
                let handle = *self.texture_units.get(&prog.texture_unit).ok_or_else(|| {
                    BackendError::InvalidOperation(format!(
                        "no texture bound to unit {}",
                        prog.texture_unit
                    ))
                })?;
                if handle == attachment.texture() {
                    return Err(BackendError::InvalidOperation(
                        "texture is both sampled and rendered to".into(),
                    ));
                }
                let input = self.textures.get(&handle.0).ok_or(BackendError::InvalidHandle {
                    kind: "texture",
                    id: handle.0,
                })?;
                if input.desc.kind != kind {
                    return Err(BackendError::InvalidOperation(format!(
                        "program {} samples a {:?} texture, unit holds a {:?}",
                        prog.desc.label, kind, input.desc.kind
                    )));
                }
                Some(input.texture.create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(Self::convert_view_dimension(kind)),
                    ..Default::default()
                }))
            }
            None => None,
        };

        // A fresh buffer per draw: queue writes only land at submit time
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Capture Uniforms"),
                contents: bytemuck::bytes_of(&prog.uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        if let Some(view) = &input_view {
            entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&prog.desc.label),
            layout: &prog.bind_group_layout,
            entries: &entries,
        });

        let target_view = Self::attachment_view(&color.texture, attachment);

        let encoder = active_encoder(&self.device, &mut self.encoder);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&prog.desc.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target_view,
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
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..mesh.vertex_count(), 0..1);
        Ok(())
    }

    fn flush(&mut self) -> BackendResult<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        self.queue.submit(Some(encoder.finish()));

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(BackendError::SubmissionFailed(error.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_uniform_layout() {
        assert_eq!(std::mem::size_of::<CaptureUniforms>(), 144);
    }

    #[test]
    fn test_invalid_wgsl_is_an_error() {
        let err = WgpuBackend::validate_wgsl("broken", "fn vs_main( {").unwrap_err();
        assert!(matches!(err, BackendError::ShaderCreationFailed { .. }));
    }
}
