//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It validates handles,
//! attachments and bindings the way a device would, and records every call
//! as a [`Command`] so the work issued by the generator can be inspected
//! without GPU hardware.

use std::collections::{HashMap, HashSet};

use crate::backend::traits::*;
use crate::backend::types::*;

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTexture(TextureHandle),
    WriteTexture(TextureHandle),
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    GenerateMipmaps(TextureHandle),
    DestroyTexture(TextureHandle),
    CreateRenderTarget(RenderTargetHandle),
    BindRenderTarget(Option<RenderTargetHandle>),
    AttachColor {
        target: RenderTargetHandle,
        attachment: ColorAttachment,
    },
    SetViewport(Viewport),
    Clear {
        target: RenderTargetHandle,
        attachment: ColorAttachment,
    },
    CreateProgram(ProgramHandle),
    SetUniform {
        program: ProgramHandle,
        name: String,
        value: UniformValue,
    },
    Draw(DrawRecord),
    Flush,
}

/// Everything known about a single draw at the time it was issued
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub mesh: MeshKind,
    pub program: ProgramHandle,
    pub target: RenderTargetHandle,
    pub attachment: ColorAttachment,
    pub viewport: Viewport,
    pub input: Option<TextureHandle>,
    pub uniforms: HashMap<String, UniformValue>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }
}

struct DummyRenderTarget {
    desc: RenderTargetDescriptor,
    owned: Option<TextureHandle>,
    attachment: Option<ColorAttachment>,
}

struct DummyProgram {
    desc: ShaderDescriptor,
    uniforms: HashMap<String, UniformValue>,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    textures: HashMap<u64, TextureDescriptor>,
    render_targets: HashMap<u64, DummyRenderTarget>,
    programs: HashMap<u64, DummyProgram>,
    texture_units: HashMap<u32, TextureHandle>,
    current_target: Option<RenderTargetHandle>,
    viewport: Viewport,
    commands: Vec<Command>,
    failing_programs: HashSet<String>,
    failing_textures: HashSet<String>,
    failing_submission: bool,
    next_texture_id: u64,
    next_target_id: u64,
    next_program_id: u64,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            programs: HashMap::new(),
            texture_units: HashMap::new(),
            current_target: None,
            viewport: Viewport::default(),
            commands: Vec::new(),
            failing_programs: HashSet::new(),
            failing_textures: HashSet::new(),
            failing_submission: false,
            next_texture_id: 1,
            next_target_id: 1,
            next_program_id: 1,
        }
    }

    /// Make `create_program` fail for programs with this label.
    pub fn fail_program(&mut self, label: impl Into<String>) {
        self.failing_programs.insert(label.into());
    }

    /// Make `create_texture` fail for textures with this label.
    pub fn fail_texture(&mut self, label: impl Into<String>) {
        self.failing_textures.insert(label.into());
    }

    /// Make `flush` report the submitted work as rejected.
    pub fn fail_submission(&mut self) {
        self.failing_submission = true;
    }

    /// Drop every injected failure.
    pub fn clear_failures(&mut self) {
        self.failing_programs.clear();
        self.failing_textures.clear();
        self.failing_submission = false;
    }

    /// Every call recorded so far, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Forget the recorded calls. Resources are kept.
    pub fn reset_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    /// Draws issued with the program carrying this label
    pub fn draws_with(&self, label: &str) -> Vec<&DrawRecord> {
        self.draws()
            .filter(|d| self.program_label(d.program) == Some(label))
            .collect()
    }

    pub fn program_label(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program.0).map(|p| p.desc.label.as_str())
    }

    /// Current value of a program uniform
    pub fn uniform(&self, program: ProgramHandle, name: &str) -> Option<UniformValue> {
        self.programs
            .get(&program.0)
            .and_then(|p| p.uniforms.get(name).copied())
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn is_live(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn texture(&self, texture: TextureHandle) -> BackendResult<&TextureDescriptor> {
        self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn bound_target(&self) -> BackendResult<(RenderTargetHandle, &DummyRenderTarget)> {
        let handle = self.current_target.ok_or_else(|| {
            BackendError::InvalidOperation("no render target bound".into())
        })?;
        let target = self
            .render_targets
            .get(&handle.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "render target",
                id: handle.0,
            })?;
        Ok((handle, target))
    }

    fn color_output(target: &DummyRenderTarget) -> BackendResult<ColorAttachment> {
        target
            .attachment
            .or_else(|| {
                target.owned.map(|texture| ColorAttachment::Texture2d { texture, mip: 0 })
            })
            .ok_or_else(|| BackendError::InvalidOperation("render target has no color output".into()))
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if let Some(label) = desc.label.as_ref().filter(|l| self.failing_textures.contains(*l)) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{label}: injected failure"
            )));
        }
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero-sized texture",
                desc.label
            )));
        }
        if desc.kind == TextureKind::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: cube faces must be square",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}, {} mips, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels,
            desc.kind
        );

        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.textures.insert(handle.0, desc.clone());
        self.commands.push(Command::CreateTexture(handle));
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let desc = self.texture(texture)?;
        if desc.kind != TextureKind::D2 {
            return Err(BackendError::InvalidOperation(
                "write_texture expects a 2D texture".into(),
            ));
        }
        if data.len() != desc.layer_size_bytes() {
            return Err(BackendError::InvalidOperation(format!(
                "write_texture: expected {} bytes, got {}",
                desc.layer_size_bytes(),
                data.len()
            )));
        }
        log::trace!("DummyBackend: write_texture {:?} len={}", texture, data.len());
        self.commands.push(Command::WriteTexture(texture));
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.texture_units.insert(unit, texture);
        self.commands.push(Command::BindTexture { unit, texture });
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let desc = self.texture(texture)?;
        if !desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::InvalidOperation(
                "mipmap generation needs a renderable texture".into(),
            ));
        }
        log::trace!(
            "DummyBackend: generate_mipmaps {:?} ({} levels)",
            texture,
            desc.mip_levels
        );
        self.commands.push(Command::GenerateMipmaps(texture));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.texture_units.retain(|_, bound| *bound != texture);
            self.commands.push(Command::DestroyTexture(texture));
        }
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
                let texture_desc = TextureDescriptor::new_2d(
                    desc.width,
                    desc.height,
                    desc.format,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                );
                let texture_desc = match &desc.label {
                    Some(label) => texture_desc.with_label(format!("{label} color")),
                    None => texture_desc,
                };
                Some(self.create_texture(&texture_desc)?)
            }
        };

        let handle = RenderTargetHandle(self.next_target_id);
        self.next_target_id += 1;
        self.render_targets.insert(
            handle.0,
            DummyRenderTarget {
                desc: desc.clone(),
                owned,
                attachment: None,
            },
        );
        self.commands.push(Command::CreateRenderTarget(handle));
        Ok(handle)
    }

    fn render_target_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle> {
        self.render_targets.get(&target.0).and_then(|t| t.owned)
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetHandle>) {
        self.current_target = target;
        self.commands.push(Command::BindRenderTarget(target));
    }

    fn current_render_target(&self) -> Option<RenderTargetHandle> {
        self.current_target
    }

    fn attach_color(
        &mut self,
        target: RenderTargetHandle,
        attachment: ColorAttachment,
    ) -> BackendResult<()> {
        let texture = self.texture(attachment.texture())?;
        let kind_matches = matches!(
            (&attachment, texture.kind),
            (ColorAttachment::Texture2d { .. }, TextureKind::D2)
                | (ColorAttachment::CubeFace { .. }, TextureKind::Cube)
        );
        if !kind_matches {
            return Err(BackendError::InvalidOperation(format!(
                "attachment {attachment:?} does not match a {:?} texture",
                texture.kind
            )));
        }
        if attachment.mip() >= texture.mip_levels {
            return Err(BackendError::InvalidOperation(format!(
                "mip {} out of range ({} levels)",
                attachment.mip(),
                texture.mip_levels
            )));
        }
        if !texture.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::InvalidOperation(
                "texture is not renderable".into(),
            ));
        }
        let mip_width = (texture.width >> attachment.mip()).max(1);
        let mip_height = (texture.height >> attachment.mip()).max(1);

        let entry = self
            .render_targets
            .get_mut(&target.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "render target",
                id: target.0,
            })?;
        if (mip_width, mip_height) != (entry.desc.width, entry.desc.height) {
            return Err(BackendError::InvalidOperation(format!(
                "attachment is {}x{}, target is {}x{}",
                mip_width, mip_height, entry.desc.width, entry.desc.height
            )));
        }
        entry.attachment = Some(attachment);
        self.commands.push(Command::AttachColor { target, attachment });
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(Command::SetViewport(viewport));
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn clear(&mut self, _color: [f32; 4]) -> BackendResult<()> {
        let (target, entry) = self.bound_target()?;
        let attachment = Self::color_output(entry)?;
        self.commands.push(Command::Clear { target, attachment });
        Ok(())
    }

    fn create_program(&mut self, desc: &ShaderDescriptor) -> BackendResult<ProgramHandle> {
        if self.failing_programs.contains(&desc.label) {
            return Err(BackendError::ShaderCreationFailed {
                label: desc.label.clone(),
                message: "injected failure".into(),
            });
        }
        if !desc.vertex_source.contains("vs_main") || !desc.fragment_source.contains("fs_main") {
            return Err(BackendError::ShaderCreationFailed {
                label: desc.label.clone(),
                message: "missing vs_main or fs_main entry point".into(),
            });
        }
        log::trace!("DummyBackend: creating program {}", desc.label);

        let handle = ProgramHandle(self.next_program_id);
        self.next_program_id += 1;
        self.programs.insert(
            handle.0,
            DummyProgram {
                desc: desc.clone(),
                uniforms: HashMap::new(),
            },
        );
        self.commands.push(Command::CreateProgram(handle));
        Ok(handle)
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue) {
        match self.programs.get_mut(&program.0) {
            Some(entry) => {
                entry.uniforms.insert(name.to_string(), value);
                self.commands.push(Command::SetUniform {
                    program,
                    name: name.to_string(),
                    value,
                });
            }
            None => log::warn!("DummyBackend: set_uniform on unknown program {:?}", program),
        }
    }

    fn draw_mesh(&mut self, mesh: MeshKind, program: ProgramHandle) -> BackendResult<()> {
        let (target, entry) = self.bound_target()?;
        let attachment = Self::color_output(entry)?;
        let target_size = (entry.desc.width, entry.desc.height);

        let prog = self.programs.get(&program.0).ok_or(BackendError::InvalidHandle {
            kind: "program",
            id: program.0,
        })?;
        if prog.desc.mesh != mesh {
            return Err(BackendError::InvalidOperation(format!(
                "program {} expects {:?}, got {:?}",
                prog.desc.label, prog.desc.mesh, mesh
            )));
        }

        let input = match prog.desc.input {
            Some(kind) => {
                let unit = match prog.uniforms.get(uniform_names::ENVIRONMENT_MAP) {
                    Some(UniformValue::Int(unit)) => *unit as u32,
                    _ => 0,
                };
                let texture = *self.texture_units.get(&unit).ok_or_else(|| {
                    BackendError::InvalidOperation(format!("no texture bound to unit {unit}"))
                })?;
                let bound = self.texture(texture)?;
                if bound.kind != kind {
                    return Err(BackendError::InvalidOperation(format!(
                        "program {} samples a {:?} texture, unit {} holds a {:?}",
                        prog.desc.label, kind, unit, bound.kind
                    )));
                }
                if texture == attachment.texture() {
                    return Err(BackendError::InvalidOperation(
                        "texture is both sampled and rendered to".into(),
                    ));
                }
                Some(texture)
            }
            None => None,
        };

        let viewport = self.viewport;
        if !viewport.fits(target_size.0, target_size.1) {
            return Err(BackendError::InvalidOperation(format!(
                "viewport {viewport:?} exceeds {}x{} target",
                target_size.0, target_size.1
            )));
        }

        self.commands.push(Command::Draw(DrawRecord {
            mesh,
            program,
            target,
            attachment,
            viewport,
            input,
            uniforms: prog.uniforms.clone(),
        }));
        Ok(())
    }

    fn flush(&mut self) -> BackendResult<()> {
        log::trace!("DummyBackend: flush");
        self.commands.push(Command::Flush);
        if self.failing_submission {
            return Err(BackendError::SubmissionFailed("injected failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(backend: &mut DummyBackend, size: u32, mips: u32) -> TextureHandle {
        backend
            .create_texture(
                &TextureDescriptor::new_cube(
                    size,
                    TextureFormat::Rgba16Float,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                )
                .with_mip_levels(mips),
            )
            .unwrap()
    }

    #[test]
    fn test_attach_rejects_size_mismatch() {
        let mut backend = DummyBackend::new();
        let texture = cube(&mut backend, 64, 3);
        let target = backend
            .create_render_target(&RenderTargetDescriptor::new(
                32,
                TextureFormat::Rgba16Float,
                ColorStorage::Dynamic,
            ))
            .unwrap();

        let mip0 = ColorAttachment::CubeFace {
            texture,
            face: CubeFace::PositiveX,
            mip: 0,
        };
        assert!(backend.attach_color(target, mip0).is_err());

        let mip1 = ColorAttachment::CubeFace {
            texture,
            face: CubeFace::PositiveX,
            mip: 1,
        };
        assert!(backend.attach_color(target, mip1).is_ok());
    }

    #[test]
    fn test_draw_requires_bound_target() {
        let mut backend = DummyBackend::new();
        let program = backend
            .create_program(&ShaderDescriptor {
                label: "screen".into(),
                vertex_source: "fn vs_main() {}".into(),
                fragment_source: "fn fs_main() {}".into(),
                mesh: MeshKind::Screen,
                input: None,
            })
            .unwrap();

        let err = backend.draw_mesh(MeshKind::Screen, program).unwrap_err();
        assert!(matches!(err, BackendError::InvalidOperation(_)));
        assert_eq!(backend.draw_count(), 0);
    }

    #[test]
    fn test_owned_target_draw_records_viewport() {
        let mut backend = DummyBackend::new();
        let target = backend
            .create_render_target(&RenderTargetDescriptor::new(
                16,
                TextureFormat::Rgba16Float,
                ColorStorage::Owned,
            ))
            .unwrap();
        let program = backend
            .create_program(&ShaderDescriptor {
                label: "screen".into(),
                vertex_source: "fn vs_main() {}".into(),
                fragment_source: "fn fs_main() {}".into(),
                mesh: MeshKind::Screen,
                input: None,
            })
            .unwrap();

        backend.bind_render_target(Some(target));
        backend.set_viewport(Viewport::square(16));
        backend.draw_mesh(MeshKind::Screen, program).unwrap();

        let draw = backend.draws().next().unwrap();
        assert_eq!(draw.viewport, Viewport::square(16));
        assert_eq!(
            draw.attachment.texture(),
            backend.render_target_texture(target).unwrap()
        );

        backend.set_viewport(Viewport::square(32));
        assert!(backend.draw_mesh(MeshKind::Screen, program).is_err());
    }

    #[test]
    fn test_injected_program_failure() {
        let mut backend = DummyBackend::new();
        backend.fail_program("broken");
        let err = backend
            .create_program(&ShaderDescriptor {
                label: "broken".into(),
                vertex_source: "fn vs_main() {}".into(),
                fragment_source: "fn fs_main() {}".into(),
                mesh: MeshKind::Cube,
                input: None,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::ShaderCreationFailed { .. }));
    }

    #[test]
    fn test_injected_submission_failure() {
        let mut backend = DummyBackend::new();
        assert!(backend.flush().is_ok());

        backend.fail_submission();
        let err = backend.flush().unwrap_err();
        assert!(matches!(err, BackendError::SubmissionFailed(_)));

        backend.clear_failures();
        assert!(backend.flush().is_ok());
    }
}
