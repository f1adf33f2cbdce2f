//! Image-based lighting environment maps
//!
//! [`EnvironmentMapGenerator`] watches the infinite-area light of a scene and,
//! whenever the light's source image changes, renders from it:
//! - a skybox cubemap with a full mip chain,
//! - a diffuse irradiance cubemap,
//! - a specular prefilter cubemap, one roughness level per mip,
//! - a BRDF integration lookup texture, computed once per generator.
//!
//! The convolutions follow the split-sum approximation described in
//! <https://learnopengl.com/PBR/IBL/Diffuse-irradiance> and
//! <https://learnopengl.com/PBR/IBL/Specular-IBL>.

pub mod capture;
pub mod shaders;
pub mod state;

pub use capture::*;
pub use shaders::*;
pub use state::RenderStateGuard;

use crate::backend::*;
use crate::config::EnvironmentConfig;
use crate::error::{EnvError, EnvResult};
use crate::resources::{HdrImage, ImageId};
use crate::scene::EnvironmentScene;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Unit the capture programs sample their input from
const INPUT_UNIT: u32 = 0;

/// A generated cubemap texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cubemap {
    texture: TextureHandle,
    size: u32,
    mip_levels: u32,
}

impl Cubemap {
    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    /// Face size of mip 0
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

/// What a call to [`EnvironmentMapGenerator::process`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No scene, or a scene without a root. Nothing changed.
    InvalidScene,
    /// The scene has no environment image; derived maps were released.
    Cleared,
    /// The maps already match the scene's image. No GPU work was issued.
    CacheHit,
    /// The maps were rebuilt from a new image.
    Regenerated,
}

struct Programs {
    skybox: ProgramHandle,
    irradiance: ProgramHandle,
    prefilter: ProgramHandle,
    brdf: ProgramHandle,
}

struct Targets {
    skybox: RenderTargetHandle,
    irradiance: RenderTargetHandle,
    /// One per prefilter mip, sized to that mip
    prefilter: Vec<RenderTargetHandle>,
    brdf: RenderTargetHandle,
}

/// Cubemaps of a regeneration in flight. Released as a whole if any stage fails.
#[derive(Default)]
struct PendingMaps {
    source: Option<TextureHandle>,
    skybox: Option<Cubemap>,
    irradiance: Option<Cubemap>,
    prefilter: Option<Cubemap>,
}

impl PendingMaps {
    fn release<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        let cubemaps = [self.skybox, self.irradiance, self.prefilter];
        let textures = cubemaps.into_iter().flatten().map(|c| c.texture);
        for texture in self.source.into_iter().chain(textures) {
            backend.destroy_texture(texture);
        }
    }
}

/// Derives IBL maps from a scene's environment image, caching them per image.
pub struct EnvironmentMapGenerator {
    config: EnvironmentConfig,
    programs: Programs,
    targets: Targets,
    brdf_lut: TextureHandle,
    brdf_ready: bool,

    current_image: Option<ImageId>,
    skybox: Option<Cubemap>,
    irradiance: Option<Cubemap>,
    prefilter: Option<Cubemap>,
}

impl EnvironmentMapGenerator {
    /// Allocate render targets and compile the capture programs.
    pub fn init<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        config: EnvironmentConfig,
    ) -> EnvResult<Self> {
        config.validate()?;
        let shaders = ShaderSet::load(config.shader_dir.as_deref())?;

        let cube_target = |backend: &mut B, size: u32, label: String| {
            backend.create_render_target(
                &RenderTargetDescriptor::new(size, TextureFormat::Rgba16Float, ColorStorage::Dynamic)
                    .with_label(label),
            )
        };
        let targets = Targets {
            skybox: cube_target(backend, config.skybox_size, "skybox capture".into())?,
            irradiance: cube_target(backend, config.irradiance_size, "irradiance capture".into())?,
            prefilter: (0..config.prefilter_mip_levels)
                .map(|mip| {
                    cube_target(
                        backend,
                        mip_size(config.prefilter_size, mip),
                        format!("prefilter capture mip {mip}"),
                    )
                })
                .collect::<BackendResult<Vec<_>>>()?,
            brdf: backend.create_render_target(
                &RenderTargetDescriptor::new(
                    config.brdf_size,
                    TextureFormat::Rgba16Float,
                    ColorStorage::Owned,
                )
                .with_label("brdf lut"),
            )?,
        };
        let brdf_lut = backend.render_target_texture(targets.brdf).ok_or_else(|| {
            BackendError::RenderTargetCreationFailed("BRDF target has no color texture".into())
        })?;

        let programs = Programs {
            skybox: compile(backend, &shaders.skybox)?,
            irradiance: compile(backend, &shaders.irradiance)?,
            prefilter: compile(backend, &shaders.prefilter)?,
            brdf: compile(backend, &shaders.brdf)?,
        };

        let projection = capture_projection(config.capture_near, config.capture_far);
        for program in [programs.skybox, programs.irradiance, programs.prefilter] {
            backend.set_uniform(program, uniform_names::PROJECTION, UniformValue::Mat4(projection));
            backend.set_uniform(
                program,
                uniform_names::ENVIRONMENT_MAP,
                UniformValue::Int(INPUT_UNIT as i32),
            );
        }
        backend.set_uniform(
            programs.prefilter,
            uniform_names::RESOLUTION,
            UniformValue::Float(config.skybox_size as f32),
        );

        log::info!(
            "Environment generator ready on {} (skybox {}, irradiance {}, prefilter {} x{} mips, brdf {})",
            backend.name(),
            config.skybox_size,
            config.irradiance_size,
            config.prefilter_size,
            config.prefilter_mip_levels,
            config.brdf_size
        );

        Ok(Self {
            config,
            programs,
            targets,
            brdf_lut,
            brdf_ready: false,
            current_image: None,
            skybox: None,
            irradiance: None,
            prefilter: None,
        })
    }

    /// Bring the derived maps in line with the scene's environment image.
    ///
    /// Call once per frame. Work is only issued when the image changed since
    /// the previous call. The caller's render target and viewport are
    /// restored before returning, on success and on error. On error the
    /// generator is left cleared and the next call retries.
    pub fn process<B, S>(&mut self, backend: &mut B, scene: Option<&S>) -> EnvResult<ProcessOutcome>
    where
        B: GraphicsBackend + ?Sized,
        S: EnvironmentScene + ?Sized,
    {
        let Some(scene) = scene.filter(|s| s.has_root()) else {
            log::error!("Environment generator: scene or scene root is missing");
            return Ok(ProcessOutcome::InvalidScene);
        };

        let Some(image) = scene.infinite_area_light().and_then(|light| light.image()) else {
            self.clear(backend);
            return Ok(ProcessOutcome::Cleared);
        };

        if self.current_image == Some(image.id()) {
            return Ok(ProcessOutcome::CacheHit);
        }

        log::info!(
            "Regenerating environment maps from {} ({}x{}, {})",
            image.name(),
            image.width(),
            image.height(),
            image.id()
        );
        self.current_image = Some(image.id());

        let mut pending = PendingMaps::default();
        let result = {
            let mut guard = RenderStateGuard::new(backend);
            self.run_stages(&mut *guard, image, &mut pending)
        };

        match result {
            Ok(()) => {
                self.commit(backend, pending);
                Ok(ProcessOutcome::Regenerated)
            }
            Err(e) => {
                log::error!("Environment regeneration failed: {e}");
                pending.release(backend);
                self.clear(backend);
                Err(e)
            }
        }
    }

    /// Forget the current image and release the per-image cubemaps.
    ///
    /// The BRDF lookup is independent of the image and survives.
    pub fn clear<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        self.current_image = None;
        for cubemap in [self.skybox.take(), self.irradiance.take(), self.prefilter.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_texture(cubemap.texture);
        }
    }

    pub fn skybox(&self, image: &HdrImage) -> Option<&Cubemap> {
        self.check_image(image, "skybox");
        self.skybox.as_ref()
    }

    pub fn irradiance_map(&self, image: &HdrImage) -> Option<&Cubemap> {
        self.check_image(image, "irradiance map");
        self.irradiance.as_ref()
    }

    pub fn prefilter_map(&self, image: &HdrImage) -> Option<&Cubemap> {
        self.check_image(image, "prefilter map");
        self.prefilter.as_ref()
    }

    /// BRDF lookup texture, once it has been rendered.
    pub fn brdf_lut(&self) -> Option<TextureHandle> {
        self.brdf_ready.then_some(self.brdf_lut)
    }

    /// Image the current maps were generated from
    pub fn current_image(&self) -> Option<ImageId> {
        self.current_image
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    fn check_image(&self, image: &HdrImage, what: &str) {
        if self.current_image != Some(image.id()) {
            log::warn!(
                "{what} requested for {} ({}) but the generator holds {}",
                image.name(),
                image.id(),
                self.current_image
                    .map_or_else(|| "nothing".to_string(), |id| id.to_string())
            );
        }
    }

    fn commit<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, pending: PendingMaps) {
        for old in [self.skybox.take(), self.irradiance.take(), self.prefilter.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_texture(old.texture);
        }
        self.skybox = pending.skybox;
        self.irradiance = pending.irradiance;
        self.prefilter = pending.prefilter;
    }

    fn run_stages<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        image: &HdrImage,
        pending: &mut PendingMaps,
    ) -> EnvResult<()> {
        let skybox = self.render_skybox(backend, image, pending)?;
        self.render_irradiance(backend, skybox, pending)?;
        self.render_prefilter(backend, skybox, pending)?;
        if !self.brdf_ready {
            self.render_brdf(backend)?;
        }
        backend.flush()?;
        Ok(())
    }

    fn render_skybox<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        image: &HdrImage,
        pending: &mut PendingMaps,
    ) -> EnvResult<Cubemap> {
        log::debug!("Projecting {} onto the skybox", image.name());

        let source = backend.create_texture(
            &TextureDescriptor::new_2d(
                image.width(),
                image.height(),
                TextureFormat::Rgba16Float,
                TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            )
            .with_label(format!("{} source", image.name())),
        )?;
        pending.source = Some(source);
        backend.write_texture(source, &image.to_rgba16f_bytes())?;

        let size = self.config.skybox_size;
        let skybox = allocate_cubemap(backend, "skybox", size, full_mip_count(size))?;
        pending.skybox = Some(skybox);

        backend.bind_texture(INPUT_UNIT, source);
        capture_faces(backend, self.targets.skybox, self.programs.skybox, skybox.texture, 0, size)?;
        backend.generate_mipmaps(skybox.texture)?;

        backend.destroy_texture(source);
        pending.source = None;
        Ok(skybox)
    }

    fn render_irradiance<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        skybox: Cubemap,
        pending: &mut PendingMaps,
    ) -> EnvResult<()> {
        log::debug!("Convolving irradiance");

        let size = self.config.irradiance_size;
        let irradiance = allocate_cubemap(backend, "irradiance", size, 1)?;
        pending.irradiance = Some(irradiance);

        backend.bind_texture(INPUT_UNIT, skybox.texture);
        capture_faces(
            backend,
            self.targets.irradiance,
            self.programs.irradiance,
            irradiance.texture,
            0,
            size,
        )
    }

    fn render_prefilter<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        skybox: Cubemap,
        pending: &mut PendingMaps,
    ) -> EnvResult<()> {
        let levels = self.config.prefilter_mip_levels;
        log::debug!("Prefiltering specular over {levels} roughness levels");

        let prefilter = allocate_cubemap(backend, "prefilter", self.config.prefilter_size, levels)?;
        pending.prefilter = Some(prefilter);

        backend.bind_texture(INPUT_UNIT, skybox.texture);
        for (mip, &target) in (0..levels).zip(&self.targets.prefilter) {
            backend.set_uniform(
                self.programs.prefilter,
                uniform_names::ROUGHNESS,
                UniformValue::Float(roughness_for_mip(mip, levels)),
            );
            capture_faces(
                backend,
                target,
                self.programs.prefilter,
                prefilter.texture,
                mip,
                mip_size(self.config.prefilter_size, mip),
            )?;
        }
        Ok(())
    }

    fn render_brdf<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> EnvResult<()> {
        log::debug!("Integrating BRDF lookup");

        backend.bind_render_target(Some(self.targets.brdf));
        backend.set_viewport(Viewport::square(self.config.brdf_size));
        backend.clear(CLEAR_COLOR)?;
        backend.draw_mesh(MeshKind::Screen, self.programs.brdf)?;
        self.brdf_ready = true;
        Ok(())
    }
}

fn compile<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    desc: &ShaderDescriptor,
) -> EnvResult<ProgramHandle> {
    backend.create_program(desc).map_err(|e| match e {
        BackendError::ShaderCreationFailed { label, message } => EnvError::Shader { label, message },
        other => EnvError::Backend(other),
    })
}

fn allocate_cubemap<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    size: u32,
    mip_levels: u32,
) -> EnvResult<Cubemap> {
    let texture = backend.create_texture(
        &TextureDescriptor::new_cube(
            size,
            TextureFormat::Rgba16Float,
            TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
        )
        .with_mip_levels(mip_levels)
        .with_label(label),
    )?;
    Ok(Cubemap {
        texture,
        size,
        mip_levels,
    })
}

/// Render the six faces of `texture` at `mip` through `program`.
fn capture_faces<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    target: RenderTargetHandle,
    program: ProgramHandle,
    texture: TextureHandle,
    mip: u32,
    size: u32,
) -> EnvResult<()> {
    backend.bind_render_target(Some(target));
    backend.set_viewport(Viewport::square(size));
    for face in CubeFace::ALL {
        backend.set_uniform(program, uniform_names::VIEW, UniformValue::Mat4(face_view(face)));
        backend.attach_color(target, ColorAttachment::CubeFace { texture, face, mip })?;
        backend.clear(CLEAR_COLOR)?;
        backend.draw_mesh(MeshKind::Cube, program)?;
    }
    Ok(())
}
