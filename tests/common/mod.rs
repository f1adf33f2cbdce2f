//! Common utilities for generator integration tests.

use std::sync::Arc;

use envmap_generator::backend::{
    ColorStorage, DummyBackend, GraphicsBackend, RenderTargetDescriptor, RenderTargetHandle,
    TextureFormat, Viewport,
};
use envmap_generator::{EnvironmentConfig, HdrImage, Scene};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
    /// Headless wgpu device.
    Wgpu,
}

impl Backend {
    /// Create the backend, or `None` when it cannot run here.
    pub fn create(self) -> Option<Box<dyn GraphicsBackend>> {
        match self {
            Backend::Dummy => Some(Box::new(DummyBackend::new())),
            #[cfg(feature = "wgpu-backend")]
            Backend::Wgpu => match envmap_generator::WgpuBackend::new() {
                Ok(backend) => Some(Box::new(backend)),
                Err(e) => {
                    eprintln!("wgpu backend unavailable: {e}");
                    None
                }
            },
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::Wgpu => None,
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

/// Small resolutions so real backends finish quickly.
pub fn small_config() -> EnvironmentConfig {
    EnvironmentConfig {
        skybox_size: 32,
        irradiance_size: 8,
        prefilter_size: 16,
        prefilter_mip_levels: 3,
        brdf_size: 16,
        ..Default::default()
    }
}

/// Equirectangular test image: bright sky over a dark ground.
pub fn sky_image(name: &str) -> Arc<HdrImage> {
    let (width, height) = (16u32, 8u32);
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let value = if y < height / 2 { 4.0 } else { 0.1 };
        for _ in 0..width {
            pixels.extend_from_slice(&[value, value * 0.9, value * 0.8, 1.0]);
        }
    }
    Arc::new(HdrImage::new(name, width, height, pixels).unwrap())
}

pub fn scene_with(image: &Arc<HdrImage>) -> Scene {
    let mut scene = Scene::new();
    scene.add_environment(image.clone());
    scene
}

/// Bind a caller-owned target and an odd viewport, as a frame in progress would.
pub fn bind_caller_state(backend: &mut dyn GraphicsBackend) -> (RenderTargetHandle, Viewport) {
    let target = backend
        .create_render_target(
            &RenderTargetDescriptor::new(64, TextureFormat::Rgba8Unorm, ColorStorage::Owned)
                .with_label("caller"),
        )
        .unwrap();
    let viewport = Viewport::new(3, 5, 40, 30);
    backend.bind_render_target(Some(target));
    backend.set_viewport(viewport);
    (target, viewport)
}
