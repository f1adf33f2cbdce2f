//! Core backend abstraction traits
//!
//! These traits define the GPU services the environment generator consumes.
//! Both the dummy and the wgpu backends implement them.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create render target: {0}")]
    RenderTargetCreationFailed(String),
    #[error("Failed to create shader program '{label}': {message}")]
    ShaderCreationFailed { label: String, message: String },
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("GPU rejected submitted work: {0}")]
    SubmissionFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture (2D or cube)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to an offscreen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub(crate) u64);

/// Handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

impl TextureHandle {
    /// Raw id, stable for the lifetime of the backend.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl RenderTargetHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl ProgramHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Main graphics backend trait
///
/// The model is a small immediate-mode state machine: one bound render
/// target, one viewport, a table of bound texture units. Draws and clears
/// apply to the current color attachment of the bound target. Work is
/// encoded in order and handed to the device on [`flush`](Self::flush);
/// nothing here waits for GPU completion.
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    // Textures

    /// Create a 2D or cube texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload tightly packed texel data into mip 0 of a 2D texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Bind a texture to a sampling unit
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// Fill mips 1.. of every layer from mip 0
    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()>;

    /// Release a texture. Unknown handles are ignored.
    fn destroy_texture(&mut self, texture: TextureHandle);

    // Offscreen targets

    /// Create a fixed-size render target
    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle>;

    /// Color texture owned by the target, if it was created with owned storage
    fn render_target_texture(&self, target: RenderTargetHandle) -> Option<TextureHandle>;

    /// Make a target current. `None` unbinds every offscreen target.
    fn bind_render_target(&mut self, target: Option<RenderTargetHandle>);

    /// Currently bound target
    fn current_render_target(&self) -> Option<RenderTargetHandle>;

    /// Route the target's color output into a texture (or cube face) at a mip level
    fn attach_color(
        &mut self,
        target: RenderTargetHandle,
        attachment: ColorAttachment,
    ) -> BackendResult<()>;

    /// Set viewport
    fn set_viewport(&mut self, viewport: Viewport);

    /// Current viewport
    fn viewport(&self) -> Viewport;

    /// Clear the current color attachment of the bound target
    fn clear(&mut self, color: [f32; 4]) -> BackendResult<()>;

    // Programs

    /// Compile and link a program
    fn create_program(&mut self, desc: &ShaderDescriptor) -> BackendResult<ProgramHandle>;

    /// Set a named uniform. Values persist until overwritten.
    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue);

    // Geometry

    /// Draw one of the built-in meshes with a program into the bound target
    fn draw_mesh(&mut self, mesh: MeshKind, program: ProgramHandle) -> BackendResult<()>;

    /// Submit everything recorded so far.
    ///
    /// Errors the device raised while the work was recorded or submitted
    /// are reported here.
    fn flush(&mut self) -> BackendResult<()>;
}
