//! Generator configuration
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! skybox_size = 512
//! prefilter_mip_levels = 4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};

/// Resolutions and capture parameters, fixed for the lifetime of a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Face size of the skybox cubemap (mip 0)
    pub skybox_size: u32,
    /// Face size of the diffuse irradiance cubemap
    pub irradiance_size: u32,
    /// Face size of prefilter mip 0
    pub prefilter_size: u32,
    /// Number of roughness levels in the prefilter cubemap
    pub prefilter_mip_levels: u32,
    /// Width and height of the BRDF lookup texture
    pub brdf_size: u32,
    pub capture_near: f32,
    pub capture_far: f32,
    /// Directory with WGSL overrides. Missing files fall back to the built-in sources.
    pub shader_dir: Option<PathBuf>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            skybox_size: 1024,
            irradiance_size: 32,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            brdf_size: 512,
            capture_near: 0.1,
            capture_far: 10.0,
            shader_dir: None,
        }
    }
}

impl EnvironmentConfig {
    pub fn from_toml_str(content: &str) -> EnvResult<Self> {
        toml::from_str(content).map_err(|e| EnvError::Config(e.to_string()))
    }

    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> EnvResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EnvError::io(path, e))?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| EnvError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EnvResult<()> {
        let sizes = [
            ("skybox_size", self.skybox_size),
            ("irradiance_size", self.irradiance_size),
            ("prefilter_size", self.prefilter_size),
            ("brdf_size", self.brdf_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(EnvError::Config(format!("{name} must be non-zero")));
        }
        if self.prefilter_mip_levels == 0 {
            return Err(EnvError::Config(
                "prefilter_mip_levels must be at least 1".into(),
            ));
        }
        if self.prefilter_mip_levels > 32
            || (self.prefilter_size >> (self.prefilter_mip_levels - 1)) == 0
        {
            return Err(EnvError::Config(format!(
                "prefilter_size {} cannot hold {} mip levels",
                self.prefilter_size, self.prefilter_mip_levels
            )));
        }
        if !(self.capture_near > 0.0 && self.capture_near < self.capture_far) {
            return Err(EnvError::Config(format!(
                "capture planes must satisfy 0 < near < far (near {}, far {})",
                self.capture_near, self.capture_far
            )));
        }
        Ok(())
    }
}
