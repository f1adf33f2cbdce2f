//! Common types shared between backends

use glam::Mat4;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Shape of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

impl TextureKind {
    /// Number of array layers backing this kind
    pub fn layers(&self) -> u32 {
        match self {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// 2D texture
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            kind: TextureKind::D2,
            width,
            height,
            mip_levels: 1,
            format,
            usage,
        }
    }

    /// Cube texture with square faces
    pub fn new_cube(size: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            kind: TextureKind::Cube,
            width: size,
            height: size,
            mip_levels: 1,
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_levels = count;
        self
    }

    /// Byte size of mip 0 of one layer
    pub fn layer_size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel() as usize
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self::new_2d(
            1,
            1,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )
    }
}

/// Cube face, in the layer order used by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Array layer index of this face
    pub fn layer(&self) -> u32 {
        *self as u32
    }
}

/// How a render target stores color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorStorage {
    /// No texture of its own; callers attach textures or cube faces per draw
    Dynamic,
    /// The target allocates a 2D color texture of its size and format
    Owned,
}

/// Offscreen render target descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub color: ColorStorage,
}

impl RenderTargetDescriptor {
    pub fn new(size: u32, format: TextureFormat, color: ColorStorage) -> Self {
        Self {
            label: None,
            width: size,
            height: size,
            format,
            color,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Color output of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorAttachment {
    Texture2d {
        texture: crate::backend::TextureHandle,
        mip: u32,
    },
    CubeFace {
        texture: crate::backend::TextureHandle,
        face: CubeFace,
        mip: u32,
    },
}

impl ColorAttachment {
    pub fn texture(&self) -> crate::backend::TextureHandle {
        match self {
            ColorAttachment::Texture2d { texture, .. }
            | ColorAttachment::CubeFace { texture, .. } => *texture,
        }
    }

    pub fn mip(&self) -> u32 {
        match self {
            ColorAttachment::Texture2d { mip, .. } | ColorAttachment::CubeFace { mip, .. } => *mip,
        }
    }

    pub fn layer(&self) -> u32 {
        match self {
            ColorAttachment::Texture2d { .. } => 0,
            ColorAttachment::CubeFace { face, .. } => face.layer(),
        }
    }
}

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Square viewport anchored at the origin
    pub fn square(size: u32) -> Self {
        Self::new(0, 0, size, size)
    }

    /// Whether the viewport is non-empty and lies inside a `width` x `height`
    /// attachment. Draws are rejected otherwise.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        let (Ok(x), Ok(y)) = (u32::try_from(self.x), u32::try_from(self.y)) else {
            return false;
        };
        self.width > 0
            && self.height > 0
            && u64::from(x) + u64::from(self.width) <= u64::from(width)
            && u64::from(y) + u64::from(self.height) <= u64::from(height)
    }
}

/// Built-in meshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshKind {
    /// Unit cube, 36 vertices, position only
    Cube,
    /// Full-screen quad, 6 vertices, position + uv
    Screen,
}

impl MeshKind {
    pub fn vertex_count(&self) -> u32 {
        match self {
            MeshKind::Cube => 36,
            MeshKind::Screen => 6,
        }
    }
}

/// Uniform names understood by every backend
pub mod uniform_names {
    pub const PROJECTION: &str = "projection";
    pub const VIEW: &str = "view";
    pub const ROUGHNESS: &str = "roughness";
    /// Face size of the sampled source cubemap
    pub const RESOLUTION: &str = "resolution";
    /// Texture unit sampled at group 0, binding 1
    pub const ENVIRONMENT_MAP: &str = "environment_map";
}

/// Uniform value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Mat4(Mat4),
}

/// Shader program descriptor
///
/// Vertex and fragment sources are WGSL snippets linked into one module; the
/// vertex stage enters at `vs_main`, the fragment stage at `fs_main`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderDescriptor {
    pub label: String,
    pub vertex_source: String,
    pub fragment_source: String,
    /// Mesh layout the vertex stage consumes
    pub mesh: MeshKind,
    /// Kind of the texture sampled at group 0, binding 1, if any
    pub input: Option<TextureKind>,
}

impl ShaderDescriptor {
    /// Linked WGSL source
    pub fn linked_source(&self) -> String {
        format!("{}\n{}", self.vertex_source, self.fragment_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_size_bytes() {
        let desc = TextureDescriptor::new_2d(
            16,
            8,
            TextureFormat::Rgba16Float,
            TextureUsage::TEXTURE_BINDING,
        );
        assert_eq!(desc.layer_size_bytes(), 16 * 8 * 8);
    }

    #[test]
    fn test_viewport_fits() {
        assert!(Viewport::square(32).fits(32, 32));
        assert!(Viewport::new(8, 8, 24, 24).fits(32, 32));
        assert!(!Viewport::square(64).fits(32, 32));
        assert!(!Viewport::new(-4, 0, 16, 16).fits(32, 32));
        assert!(!Viewport::new(40, 0, 16, 16).fits(32, 32));
        assert!(!Viewport::new(0, 0, 0, 16).fits(32, 32));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_layer_size_bytes_past_u32() {
        let desc = TextureDescriptor::new_2d(
            40_000,
            40_000,
            TextureFormat::Rgba32Float,
            TextureUsage::TEXTURE_BINDING,
        );
        assert_eq!(desc.layer_size_bytes(), 40_000 * 40_000 * 16);
    }
}
