//! Copying rendered results back to the CPU

use wgpu::util::DeviceExt;

use super::{active_encoder, WgpuBackend};
use crate::backend::traits::*;
use crate::backend::types::*;

const CUBE_FACES_SHADER: &str = include_str!("../../../shaders/cube_faces.wgsl");

/// Format of the scratch target cube faces are sampled into
const FACE_SAMPLE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

fn padded_row_bytes(width: u32, format: TextureFormat) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * format.bytes_per_pixel()).div_ceil(align) * align
}

fn decode_texel(bytes: &[u8], format: TextureFormat) -> [f32; 4] {
    let mut texel = [0.0; 4];
    match format {
        TextureFormat::Rgba8Unorm => {
            for (channel, byte) in texel.iter_mut().zip(bytes) {
                *channel = f32::from(*byte) / 255.0;
            }
        }
        TextureFormat::Rgba16Float => {
            for (channel, pair) in texel.iter_mut().zip(bytes.chunks_exact(2)) {
                *channel = half::f16::from_le_bytes([pair[0], pair[1]]).to_f32();
            }
        }
        TextureFormat::Rgba32Float => {
            for (channel, quad) in texel.iter_mut().zip(bytes.chunks_exact(4)) {
                *channel = f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
            }
        }
    }
    texel
}

/// Encode a copy of mip 0 of a 2D texture into a mappable buffer.
fn copy_to_buffer(
    device: &wgpu::Device,
    encoder: &mut wgpu::CommandEncoder,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> wgpu::Buffer {
    let row_bytes = padded_row_bytes(width, format);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback"),
        size: u64::from(row_bytes) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    buffer
}

impl WgpuBackend {
    /// Read mip 0 of a 2D texture back as RGBA floats, top row first.
    ///
    /// The texture needs `COPY_SRC` usage, which the color textures of owned
    /// render targets have. Pending work is submitted first.
    pub fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<[f32; 4]>> {
        let tex = self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        if tex.desc.kind != TextureKind::D2 || !tex.desc.usage.contains(TextureUsage::COPY_SRC) {
            return Err(BackendError::InvalidOperation(
                "read_texture needs a 2D texture with COPY_SRC usage".into(),
            ));
        }
        let (width, height, format) = (tex.desc.width, tex.desc.height, tex.desc.format);

        let encoder = active_encoder(&self.device, &mut self.encoder);
        let buffer = copy_to_buffer(&self.device, encoder, &tex.texture, width, height, format);
        self.flush()?;
        self.map_texels(&buffer, width, format)
    }

    /// Sample each face of a cubemap at its center, from mip `mip`.
    ///
    /// Reads through a render pass rather than a texture copy, since not
    /// every backend can copy cube layers into a buffer. Pending work is
    /// submitted first.
    pub fn sample_cube_faces(
        &mut self,
        texture: TextureHandle,
        mip: u32,
    ) -> BackendResult<[[f32; 4]; 6]> {
        let tex = self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        if tex.desc.kind != TextureKind::Cube
            || !tex.desc.usage.contains(TextureUsage::TEXTURE_BINDING)
            || mip >= tex.desc.mip_levels
        {
            return Err(BackendError::InvalidOperation(format!(
                "cannot sample mip {mip} of {:?}",
                tex.desc.label
            )));
        }
        let source_view = tex.texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });

        let target = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Cube Face Samples"),
            size: wgpu::Extent3d {
                width: 6,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(FACE_SAMPLE_FORMAT),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cube Face Samples"),
            source: wgpu::ShaderSource::Wgsl(CUBE_FACES_SHADER.into()),
        });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Cube Face Samples"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(Self::convert_texture_format(FACE_SAMPLE_FORMAT).into())],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        let level = [mip as f32, 0.0, 0.0, 0.0];
        let level_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Cube Face Level"),
                contents: bytemuck::bytes_of(&level),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cube Face Samples"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: level_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let encoder = active_encoder(&self.device, &mut self.encoder);
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Cube Face Samples"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
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
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        let buffer = copy_to_buffer(&self.device, encoder, &target, 6, 1, FACE_SAMPLE_FORMAT);
        self.flush()?;

        let texels = self.map_texels(&buffer, 6, FACE_SAMPLE_FORMAT)?;
        let mut faces = [[0.0; 4]; 6];
        for (face, texel) in faces.iter_mut().zip(texels) {
            *face = texel;
        }
        Ok(faces)
    }

    /// Wait for a readback buffer and decode its rows.
    fn map_texels(
        &self,
        buffer: &wgpu::Buffer,
        width: u32,
        format: TextureFormat,
    ) -> BackendResult<Vec<[f32; 4]>> {
        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| BackendError::InvalidOperation("readback was never mapped".into()))?
            .map_err(|e| BackendError::InvalidOperation(format!("readback mapping failed: {e}")))?;

        let row_bytes = padded_row_bytes(width, format) as usize;
        let texel_bytes = format.bytes_per_pixel() as usize;
        let texels: Vec<[f32; 4]> = {
            let data = slice.get_mapped_range();
            data.chunks_exact(row_bytes)
                .flat_map(|row| {
                    row[..width as usize * texel_bytes]
                        .chunks_exact(texel_bytes)
                        .map(move |texel| decode_texel(texel, format))
                })
                .collect()
        };
        buffer.unmap();
        Ok(texels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_row_bytes(6, TextureFormat::Rgba16Float), 256);
        assert_eq!(padded_row_bytes(32, TextureFormat::Rgba16Float), 256);
        assert_eq!(padded_row_bytes(33, TextureFormat::Rgba16Float), 512);
    }

    #[test]
    fn test_decode_texel() {
        let halves: Vec<u8> = [1.0f32, 0.5, 2.0, 1.0]
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
            .collect();
        assert_eq!(decode_texel(&halves, TextureFormat::Rgba16Float), [1.0, 0.5, 2.0, 1.0]);
        assert_eq!(
            decode_texel(&[255, 0, 51, 255], TextureFormat::Rgba8Unorm),
            [1.0, 0.0, 0.2, 1.0]
        );
    }
}
