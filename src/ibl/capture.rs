//! Capture geometry: the six cube-face cameras and the mip/roughness mapping.

use glam::{Mat4, Vec3};

use crate::backend::CubeFace;

/// Vertical field of view of every capture camera
pub const CAPTURE_FOV_DEGREES: f32 = 90.0;

/// Look direction and up vector of one capture camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureView {
    pub direction: Vec3,
    pub up: Vec3,
}

/// Capture cameras, in [`CubeFace::ALL`] order.
pub const CAPTURE_VIEWS: [CaptureView; 6] = [
    CaptureView {
        direction: Vec3::X,
        up: Vec3::NEG_Y,
    },
    CaptureView {
        direction: Vec3::NEG_X,
        up: Vec3::NEG_Y,
    },
    CaptureView {
        direction: Vec3::Y,
        up: Vec3::Z,
    },
    CaptureView {
        direction: Vec3::NEG_Y,
        up: Vec3::NEG_Z,
    },
    CaptureView {
        direction: Vec3::Z,
        up: Vec3::NEG_Y,
    },
    CaptureView {
        direction: Vec3::NEG_Z,
        up: Vec3::NEG_Y,
    },
];

pub fn capture_view(face: CubeFace) -> CaptureView {
    CAPTURE_VIEWS[face.layer() as usize]
}

/// View matrix of the camera at the origin looking through `face`.
pub fn face_view(face: CubeFace) -> Mat4 {
    let view = capture_view(face);
    Mat4::look_at_rh(Vec3::ZERO, view.direction, view.up)
}

/// Square 90 degree projection shared by every face.
pub fn capture_projection(near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(CAPTURE_FOV_DEGREES.to_radians(), 1.0, near, far)
}

/// Roughness rendered into prefilter mip `level` of `levels`.
///
/// Spreads 0.0..=1.0 linearly over the chain; a single level is mirror-sharp.
pub fn roughness_for_mip(level: u32, levels: u32) -> f32 {
    if levels <= 1 {
        0.0
    } else {
        level as f32 / (levels - 1) as f32
    }
}

/// Edge length of mip `level` of a chain whose base is `base`. Never below 1.
pub fn mip_size(base: u32, level: u32) -> u32 {
    base.checked_shr(level).unwrap_or(0).max(1)
}

/// Length of a complete mip chain for a `size`-wide texture.
pub fn full_mip_count(size: u32) -> u32 {
    (u32::BITS - size.leading_zeros()).max(1)
}
