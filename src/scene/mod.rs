//! Scene management
//!
//! Just enough scene to drive the environment generator: a root node and a
//! list of lights, queried through [`EnvironmentScene`].

mod light;

pub use light::*;

use std::sync::Arc;

use glam::Vec3;

use crate::resources::HdrImage;

/// The one scene query the environment generator needs.
pub trait EnvironmentScene {
    /// Whether the scene has a root node. A rootless scene is not renderable.
    fn has_root(&self) -> bool;

    /// First infinite-area light of the scene, if any.
    fn infinite_area_light(&self) -> Option<&InfiniteAreaLight>;
}

/// Node of the scene hierarchy
#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub name: String,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }
}

/// The scene containing the lights
#[derive(Debug, Clone)]
pub struct Scene {
    pub root: Option<SceneNode>,
    pub lights: Vec<Light>,
}

impl Scene {
    /// Scene with an empty root node and no lights.
    pub fn new() -> Self {
        Self {
            root: Some(SceneNode::new("root")),
            lights: Vec::new(),
        }
    }

    /// Scene without a root node.
    pub fn empty() -> Self {
        Self {
            root: None,
            lights: Vec::new(),
        }
    }

    /// Add a directional light to the scene
    pub fn add_directional_light(&mut self, direction: Vec3, color: Vec3, intensity: f32) {
        self.lights
            .push(Light::Directional(DirectionalLight::new(direction, color, intensity)));
    }

    /// Add an environment light lit by `image`
    pub fn add_environment(&mut self, image: Arc<HdrImage>) {
        self.lights
            .push(Light::InfiniteArea(InfiniteAreaLight::new(image)));
    }

    /// Swap the image of the first infinite-area light, adding one if needed.
    pub fn set_environment(&mut self, image: Option<Arc<HdrImage>>) {
        let existing = self.lights.iter_mut().find_map(|l| match l {
            Light::InfiniteArea(light) => Some(light),
            _ => None,
        });
        match (existing, image) {
            (Some(light), image) => light.image = image,
            (None, Some(image)) => self.add_environment(image),
            (None, None) => {}
        }
    }

    /// Drop every infinite-area light.
    pub fn remove_environment(&mut self) {
        self.lights.retain(|l| !matches!(l, Light::InfiniteArea(_)));
    }

    /// Get the directional light (if any)
    pub fn directional_light(&self) -> Option<&DirectionalLight> {
        self.lights.iter().find_map(|l| match l {
            Light::Directional(d) => Some(d),
            _ => None,
        })
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentScene for Scene {
    fn has_root(&self) -> bool {
        self.root.is_some()
    }

    fn infinite_area_light(&self) -> Option<&InfiniteAreaLight> {
        self.lights.iter().find_map(|l| match l {
            Light::InfiniteArea(light) => Some(light),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_area_light_query() {
        let mut scene = Scene::new();
        scene.add_directional_light(-Vec3::Y, Vec3::ONE, 2.0);
        assert!(scene.infinite_area_light().is_none());

        let image = Arc::new(HdrImage::solid("sky", 4, 2, [1.0; 4]).unwrap());
        scene.add_environment(image.clone());
        let light = scene.infinite_area_light().unwrap();
        assert_eq!(light.image().unwrap().id(), image.id());
        assert!(scene.directional_light().is_some());
    }

    #[test]
    fn test_set_and_remove_environment() {
        let mut scene = Scene::new();
        let a = Arc::new(HdrImage::solid("a", 4, 2, [1.0; 4]).unwrap());
        let b = Arc::new(HdrImage::solid("b", 4, 2, [1.0; 4]).unwrap());

        scene.set_environment(Some(a));
        scene.set_environment(Some(b.clone()));
        let count = scene
            .lights
            .iter()
            .filter(|l| matches!(l, Light::InfiniteArea(_)))
            .count();
        assert_eq!(count, 1);
        assert_eq!(
            scene.infinite_area_light().and_then(|l| l.image()).map(|i| i.id()),
            Some(b.id())
        );

        scene.set_environment(None);
        assert!(scene.infinite_area_light().unwrap().image().is_none());

        scene.remove_environment();
        assert!(scene.infinite_area_light().is_none());
    }

    #[test]
    fn test_empty_scene_has_no_root() {
        assert!(!Scene::empty().has_root());
        assert!(Scene::new().has_root());
    }
}
