//! Light types for the scene

use std::sync::Arc;

use glam::Vec3;

use crate::resources::HdrImage;

/// Directional light (like the sun)
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
        }
    }
}

/// Light at infinity surrounding the whole scene, textured by an
/// equirectangular environment image.
///
/// The light shares the image; dropping the light (or replacing the image)
/// is how a scene stops lighting from it.
#[derive(Debug, Clone, Default)]
pub struct InfiniteAreaLight {
    pub image: Option<Arc<HdrImage>>,
}

impl InfiniteAreaLight {
    pub fn new(image: Arc<HdrImage>) -> Self {
        Self { image: Some(image) }
    }

    pub fn image(&self) -> Option<&Arc<HdrImage>> {
        self.image.as_ref()
    }
}

/// Any light the scene can hold
#[derive(Debug, Clone)]
pub enum Light {
    Directional(DirectionalLight),
    InfiniteArea(InfiniteAreaLight),
}
