//! Bake IBL environment maps from HDR images on a headless GPU.
//!
//! Each image is set as the scene's environment and processed for a number
//! of frames, the way a viewer would. The first frame regenerates, the rest
//! should be cache hits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use envmap_generator::{
    EnvError, EnvironmentConfig, EnvironmentMapGenerator, HdrImage, ProcessOutcome, Scene,
    WgpuBackend,
};

#[derive(Parser, Debug)]
#[command(
    name = "envgen",
    about = "Generate IBL environment maps from equirectangular HDR images"
)]
struct Args {
    /// TOML file overriding the default resolutions.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames to process per image.
    #[arg(short, long, default_value = "2")]
    frames: u32,

    /// Radiance .hdr files.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn run(args: Args) -> Result<(), EnvError> {
    let config = match &args.config {
        Some(path) => EnvironmentConfig::from_file(path)?,
        None => EnvironmentConfig::default(),
    };

    let mut backend = WgpuBackend::new()?;
    let mut generator = EnvironmentMapGenerator::init(&mut backend, config)?;
    let mut scene = Scene::new();

    for path in &args.images {
        let image = Arc::new(HdrImage::from_file(path)?);
        scene.set_environment(Some(image.clone()));

        let mut hits = 0;
        for frame in 0..args.frames {
            let outcome = generator.process(&mut backend, Some(&scene))?;
            log::debug!("{} frame {frame}: {outcome:?}", image.name());
            if outcome == ProcessOutcome::CacheHit {
                hits += 1;
            }
        }
        backend.wait_idle();

        if let (Some(skybox), Some(irradiance), Some(prefilter)) = (
            generator.skybox(&image),
            generator.irradiance_map(&image),
            generator.prefilter_map(&image),
        ) {
            log::info!(
                "{}: skybox {}px/{} mips, irradiance {}px, prefilter {}px/{} mips, {hits}/{} cache hits",
                image.name(),
                skybox.size(),
                skybox.mip_levels(),
                irradiance.size(),
                prefilter.size(),
                prefilter.mip_levels(),
                args.frames
            );
        }
    }

    scene.remove_environment();
    generator.process(&mut backend, Some(&scene))?;
    log::info!(
        "Done, BRDF lookup {}",
        if generator.brdf_lut().is_some() {
            "computed"
        } else {
            "not computed"
        }
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
