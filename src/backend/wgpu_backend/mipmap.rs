//! Mip chain generation by repeated fullscreen blits

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::backend::types::{CubeFace, TextureKind};

const BLIT_SHADER: &str = include_str!("../../../shaders/blit.wgsl");

/// Face selector for the cube blit (group 0, binding 3)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlitParams {
    face: u32,
    _padding: [u32; 3],
}

/// Downsamples mip N-1 into mip N with a linear filter.
///
/// Cube textures are read through a cube view of the previous level and
/// written one face at a time; every face of a level is finished before the
/// next level reads it.
pub(super) struct MipmapGenerator {
    module: wgpu::ShaderModule,
    layout_2d: wgpu::BindGroupLayout,
    layout_cube: wgpu::BindGroupLayout,
    pipeline_layout_2d: wgpu::PipelineLayout,
    pipeline_layout_cube: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<(wgpu::TextureFormat, TextureKind), wgpu::RenderPipeline>,
}

fn sampler_entry() -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn texture_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

impl MipmapGenerator {
    pub(super) fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mipmap Blit"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });

        let layout_2d = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mipmap Blit 2D"),
            entries: &[
                sampler_entry(),
                texture_entry(1, wgpu::TextureViewDimension::D2),
            ],
        });
        let layout_cube = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mipmap Blit Cube"),
            entries: &[
                sampler_entry(),
                texture_entry(2, wgpu::TextureViewDimension::Cube),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
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

        let pipeline_layout_2d = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mipmap Blit 2D"),
            bind_group_layouts: &[&layout_2d],
            push_constant_ranges: &[],
        });
        let pipeline_layout_cube = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mipmap Blit Cube"),
            bind_group_layouts: &[&layout_cube],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mipmap Blit"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            module,
            layout_2d,
            layout_cube,
            pipeline_layout_2d,
            pipeline_layout_cube,
            sampler,
            pipelines: HashMap::new(),
        }
    }

    fn ensure_pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat, kind: TextureKind) {
        let (layout, entry_point) = match kind {
            TextureKind::D2 => (&self.pipeline_layout_2d, "fs_main_2d"),
            TextureKind::Cube => (&self.pipeline_layout_cube, "fs_main_cube"),
        };
        let module = &self.module;
        self.pipelines.entry((format, kind)).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Mipmap Blit"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point,
                    targets: &[Some(format.into())],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        });
    }

    /// Encode blits filling mips `1..mip_levels` of every layer.
    pub(super) fn generate(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        format: wgpu::TextureFormat,
        kind: TextureKind,
        mip_levels: u32,
    ) {
        self.ensure_pipeline(device, format, kind);
        let Some(pipeline) = self.pipelines.get(&(format, kind)) else {
            return;
        };

        // Single-layer, single-mip view used as the render attachment
        let layer_view = |layer: u32, mip: u32| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Mip Level"),
                format: None,
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: mip,
                mip_level_count: Some(1),
                base_array_layer: layer,
                array_layer_count: Some(1),
            })
        };
        // Whole previous level, as the shader samples it
        let source_view = |mip: u32| {
            let (dimension, layers) = match kind {
                TextureKind::D2 => (wgpu::TextureViewDimension::D2, 1),
                TextureKind::Cube => (wgpu::TextureViewDimension::Cube, 6),
            };
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Mip Source"),
                format: None,
                dimension: Some(dimension),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: mip,
                mip_level_count: Some(1),
                base_array_layer: 0,
                array_layer_count: Some(layers),
            })
        };

        let face_params: Vec<wgpu::Buffer> = match kind {
            TextureKind::D2 => Vec::new(),
            TextureKind::Cube => CubeFace::ALL
                .iter()
                .map(|face| {
                    let params = BlitParams {
                        face: face.layer(),
                        _padding: [0; 3],
                    };
                    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Mipmap Blit Face"),
                        contents: bytemuck::bytes_of(&params),
                        usage: wgpu::BufferUsages::UNIFORM,
                    })
                })
                .collect(),
        };

        for mip in 1..mip_levels {
            let source = source_view(mip - 1);

            for layer in 0..kind.layers() {
                let destination = layer_view(layer, mip);

                let bind_group = match kind {
                    TextureKind::D2 => device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Mipmap Blit 2D"),
                        layout: &self.layout_2d,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::Sampler(&self.sampler),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::TextureView(&source),
                            },
                        ],
                    }),
                    TextureKind::Cube => device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Mipmap Blit Cube"),
                        layout: &self.layout_cube,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::Sampler(&self.sampler),
                            },
                            wgpu::BindGroupEntry {
                                binding: 2,
                                resource: wgpu::BindingResource::TextureView(&source),
                            },
                            wgpu::BindGroupEntry {
                                binding: 3,
                                resource: face_params[layer as usize].as_entire_binding(),
                            },
                        ],
                    }),
                };

                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Mipmap Blit"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &destination,
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
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
    }
}
