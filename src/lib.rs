//! Environment map generator for image-based lighting
//!
//! Turns the equirectangular HDR image of a scene's infinite-area light into
//! the GPU resources a PBR renderer samples for ambient lighting: a skybox
//! cubemap, a diffuse irradiance cubemap, a roughness-indexed specular
//! prefilter cubemap and a BRDF lookup texture.
//!
//! GPU work goes through the [`GraphicsBackend`](backend::GraphicsBackend)
//! trait. Two backends ship with the crate:
//! - **wgpu**: headless device, real rendering (feature `wgpu-backend`)
//! - **Dummy**: validates and records calls without a GPU
//!
//! ```no_run
//! use std::sync::Arc;
//! use envmap_generator::{DummyBackend, EnvironmentConfig, EnvironmentMapGenerator, HdrImage, Scene};
//!
//! let mut backend = DummyBackend::new();
//! let mut generator = EnvironmentMapGenerator::init(&mut backend, EnvironmentConfig::default())?;
//!
//! let mut scene = Scene::new();
//! scene.add_environment(Arc::new(HdrImage::from_file("sky.hdr")?));
//! generator.process(&mut backend, Some(&scene))?;
//! # Ok::<(), envmap_generator::EnvError>(())
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod ibl;
pub mod resources;
pub mod scene;

pub use backend::DummyBackend;
#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuBackend;
pub use config::EnvironmentConfig;
pub use error::{EnvError, EnvResult};
pub use ibl::{Cubemap, EnvironmentMapGenerator, ProcessOutcome};
pub use resources::{HdrImage, ImageId};
pub use scene::{EnvironmentScene, InfiniteAreaLight, Light, Scene};
