//! WGSL sources of the four capture programs
//!
//! The sources are embedded at build time. When a shader directory is
//! configured, any file found there replaces the embedded source of the same
//! name, which allows tweaking the convolutions without rebuilding.

use std::convert::Infallible;
use std::path::Path;

use crate::backend::{MeshKind, ShaderDescriptor, TextureKind};
use crate::error::{EnvError, EnvResult};

pub const SKYBOX_PROGRAM: &str = "equirect_to_cubemap";
pub const IRRADIANCE_PROGRAM: &str = "irradiance_convolution";
pub const PREFILTER_PROGRAM: &str = "prefilter";
pub const BRDF_PROGRAM: &str = "brdf";

const EMBEDDED: [(&str, &str); 7] = [
    ("cubemap.wgsl", include_str!("../../shaders/cubemap.wgsl")),
    ("screen.wgsl", include_str!("../../shaders/screen.wgsl")),
    ("sampling.wgsl", include_str!("../../shaders/sampling.wgsl")),
    (
        "equirect_to_cubemap.wgsl",
        include_str!("../../shaders/equirect_to_cubemap.wgsl"),
    ),
    (
        "irradiance_convolution.wgsl",
        include_str!("../../shaders/irradiance_convolution.wgsl"),
    ),
    ("prefilter.wgsl", include_str!("../../shaders/prefilter.wgsl")),
    ("brdf.wgsl", include_str!("../../shaders/brdf.wgsl")),
];

/// Program descriptors, ready for [`GraphicsBackend::create_program`](crate::backend::GraphicsBackend::create_program)
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub skybox: ShaderDescriptor,
    pub irradiance: ShaderDescriptor,
    pub prefilter: ShaderDescriptor,
    pub brdf: ShaderDescriptor,
}

impl ShaderSet {
    /// Built-in sources only.
    pub fn embedded() -> Self {
        match Self::build(|name| Ok::<_, Infallible>(embedded_source(name).to_string())) {
            Ok(set) => set,
            Err(never) => match never {},
        }
    }

    /// Built-in sources, overridden by files in `shader_dir` when given.
    pub fn load(shader_dir: Option<&Path>) -> EnvResult<Self> {
        match shader_dir {
            None => Ok(Self::embedded()),
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(EnvError::Config(format!(
                        "shader directory {} does not exist",
                        dir.display()
                    )));
                }
                Self::build(|name| {
                    let path = dir.join(name);
                    if path.is_file() {
                        log::info!("Using shader override {}", path.display());
                        std::fs::read_to_string(&path).map_err(|e| EnvError::io(&path, e))
                    } else {
                        Ok(embedded_source(name).to_string())
                    }
                })
            }
        }
    }

    fn build<E>(mut source: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        let cubemap = source("cubemap.wgsl")?;
        let screen = source("screen.wgsl")?;
        let sampling = source("sampling.wgsl")?;

        Ok(Self {
            skybox: ShaderDescriptor {
                label: SKYBOX_PROGRAM.into(),
                vertex_source: cubemap.clone(),
                fragment_source: source("equirect_to_cubemap.wgsl")?,
                mesh: MeshKind::Cube,
                input: Some(TextureKind::D2),
            },
            irradiance: ShaderDescriptor {
                label: IRRADIANCE_PROGRAM.into(),
                vertex_source: cubemap.clone(),
                fragment_source: source("irradiance_convolution.wgsl")?,
                mesh: MeshKind::Cube,
                input: Some(TextureKind::Cube),
            },
            prefilter: ShaderDescriptor {
                label: PREFILTER_PROGRAM.into(),
                vertex_source: cubemap,
                fragment_source: format!("{sampling}\n{}", source("prefilter.wgsl")?),
                mesh: MeshKind::Cube,
                input: Some(TextureKind::Cube),
            },
            brdf: ShaderDescriptor {
                label: BRDF_PROGRAM.into(),
                vertex_source: screen,
                fragment_source: format!("{sampling}\n{}", source("brdf.wgsl")?),
                mesh: MeshKind::Screen,
                input: None,
            },
        })
    }
}

fn embedded_source(name: &str) -> &'static str {
    EMBEDDED
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, source)| *source)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_programs() {
        let set = ShaderSet::embedded();
        for desc in [&set.skybox, &set.irradiance, &set.prefilter, &set.brdf] {
            assert!(desc.vertex_source.contains("fn vs_main"), "{}", desc.label);
            assert!(desc.fragment_source.contains("fn fs_main"), "{}", desc.label);
        }
        assert_eq!(set.brdf.mesh, MeshKind::Screen);
        assert!(set.brdf.input.is_none());
        assert_eq!(set.skybox.input, Some(TextureKind::D2));
        assert!(set.prefilter.fragment_source.contains("fn importance_sample_ggx"));
    }

    #[test]
    fn test_missing_shader_dir() {
        let err = ShaderSet::load(Some(Path::new("/nonexistent/shaders"))).unwrap_err();
        assert!(matches!(err, EnvError::Config(_)));
    }

    #[test]
    fn test_override_replaces_one_file() {
        let dir = std::env::temp_dir().join(format!("envgen-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("brdf.wgsl"), "// custom\n@fragment fn fs_main() {}").unwrap();

        let set = ShaderSet::load(Some(&dir)).unwrap();
        assert!(set.brdf.fragment_source.contains("// custom"));
        assert_eq!(set.skybox, ShaderSet::embedded().skybox);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
