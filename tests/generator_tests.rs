//! Integration tests for the environment map generator.
//!
//! Backend-agnostic behavior is parameterized with `rstest` over the dummy
//! and wgpu backends; wgpu cases skip when no adapter is available. Tests
//! that inspect the issued work use the dummy backend's command log.

mod common;

use std::collections::BTreeMap;

use rstest::rstest;

use common::{bind_caller_state, init_logging, scene_with, sky_image, small_config, Backend};
use envmap_generator::backend::{
    uniform_names, BackendError, ColorAttachment, ColorStorage, Command, DummyBackend,
    GraphicsBackend, MeshKind, RenderTargetDescriptor, TextureFormat, TextureKind, UniformValue,
    Viewport,
};
use envmap_generator::ibl::{
    mip_size, roughness_for_mip, ShaderSet, BRDF_PROGRAM, IRRADIANCE_PROGRAM, PREFILTER_PROGRAM,
    SKYBOX_PROGRAM,
};
use envmap_generator::{
    EnvError, EnvironmentConfig, EnvironmentMapGenerator, ProcessOutcome, Scene,
};

fn dummy_generator(config: EnvironmentConfig) -> (DummyBackend, EnvironmentMapGenerator) {
    init_logging();
    let mut backend = DummyBackend::new();
    let generator = EnvironmentMapGenerator::init(&mut backend, config).unwrap();
    (backend, generator)
}

// ============================================================================
// Backend-parameterized Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_first_process_regenerates_then_hits_cache(#[case] kind: Backend) {
    init_logging();
    let Some(mut backend) = kind.create() else {
        eprintln!("Backend {:?} not available, skipping", kind);
        return;
    };
    let mut generator = EnvironmentMapGenerator::init(backend.as_mut(), small_config()).unwrap();

    let image = sky_image("sky");
    let scene = scene_with(&image);

    let outcome = generator.process(backend.as_mut(), Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
    assert_eq!(generator.current_image(), Some(image.id()));

    let skybox = generator.skybox(&image).unwrap();
    assert_eq!(skybox.size(), 32);
    assert_eq!(skybox.mip_levels(), 6);
    assert_eq!(generator.irradiance_map(&image).unwrap().size(), 8);
    let prefilter = generator.prefilter_map(&image).unwrap();
    assert_eq!((prefilter.size(), prefilter.mip_levels()), (16, 3));
    assert!(generator.brdf_lut().is_some());

    for _ in 0..3 {
        let outcome = generator.process(backend.as_mut(), Some(&scene)).unwrap();
        assert_eq!(outcome, ProcessOutcome::CacheHit);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_render_state_is_restored(#[case] kind: Backend) {
    init_logging();
    let Some(mut backend) = kind.create() else {
        eprintln!("Backend {:?} not available, skipping", kind);
        return;
    };
    let mut generator = EnvironmentMapGenerator::init(backend.as_mut(), small_config()).unwrap();
    let (target, viewport) = bind_caller_state(backend.as_mut());

    let image = sky_image("sky");
    generator
        .process(backend.as_mut(), Some(&scene_with(&image)))
        .unwrap();

    assert_eq!(backend.current_render_target(), Some(target));
    assert_eq!(backend.viewport(), viewport);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn test_viewport_outside_target_is_rejected(#[case] kind: Backend) {
    init_logging();
    let Some(mut backend) = kind.create() else {
        eprintln!("Backend {:?} not available, skipping", kind);
        return;
    };
    let program = backend.create_program(&ShaderSet::embedded().brdf).unwrap();
    let target = backend
        .create_render_target(&RenderTargetDescriptor::new(
            16,
            TextureFormat::Rgba16Float,
            ColorStorage::Owned,
        ))
        .unwrap();
    backend.bind_render_target(Some(target));

    for viewport in [
        Viewport::square(32),
        Viewport::new(8, 0, 16, 16),
        Viewport::new(-1, 0, 8, 8),
        Viewport::new(0, 0, 0, 16),
    ] {
        backend.set_viewport(viewport);
        let err = backend.draw_mesh(MeshKind::Screen, program).unwrap_err();
        assert!(matches!(err, BackendError::InvalidOperation(_)), "{viewport:?}: {err}");
    }

    backend.set_viewport(Viewport::new(8, 8, 8, 8));
    backend.draw_mesh(MeshKind::Screen, program).unwrap();
    backend.flush().unwrap();
}

// ============================================================================
// Caching
// ============================================================================

#[test]
fn test_cache_hit_issues_no_backend_calls() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let image = sky_image("sky");
    let scene = scene_with(&image);

    generator.process(&mut backend, Some(&scene)).unwrap();
    assert!(backend.draw_count() > 0);

    backend.reset_commands();
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::CacheHit);
    assert!(backend.commands().is_empty());
}

#[test]
fn test_switching_images_regenerates_and_releases_old_maps() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let a = sky_image("a");
    let b = sky_image("b");
    let mut scene = scene_with(&a);

    generator.process(&mut backend, Some(&scene)).unwrap();
    let old = [
        generator.skybox(&a).unwrap().texture(),
        generator.irradiance_map(&a).unwrap().texture(),
        generator.prefilter_map(&a).unwrap().texture(),
    ];

    scene.set_environment(Some(b.clone()));
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
    assert_eq!(generator.current_image(), Some(b.id()));

    for texture in old {
        assert!(!backend.is_live(texture), "{texture:?} leaked");
    }
    let new = generator.skybox(&b).unwrap().texture();
    assert!(backend.is_live(new));
    assert!(!old.contains(&new));

    scene.set_environment(Some(a.clone()));
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
    assert_eq!(generator.current_image(), Some(a.id()));
}

#[test]
fn test_same_pixels_in_a_new_image_regenerate() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let image = sky_image("sky");
    let mut scene = scene_with(&image);
    generator.process(&mut backend, Some(&scene)).unwrap();

    let twin = sky_image("sky");
    assert_ne!(twin.id(), image.id());
    scene.set_environment(Some(twin.clone()));
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
    assert_eq!(generator.current_image(), Some(twin.id()));
}

// ============================================================================
// Clearing and Invalid Scenes
// ============================================================================

#[test]
fn test_missing_environment_clears_but_keeps_brdf() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let image = sky_image("sky");
    let mut scene = scene_with(&image);
    generator.process(&mut backend, Some(&scene)).unwrap();

    let skybox = generator.skybox(&image).unwrap().texture();
    let brdf = generator.brdf_lut().unwrap();

    scene.remove_environment();
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Cleared);
    assert_eq!(generator.current_image(), None);
    assert!(generator.skybox(&image).is_none());
    assert!(generator.irradiance_map(&image).is_none());
    assert!(generator.prefilter_map(&image).is_none());
    assert!(!backend.is_live(skybox));

    assert_eq!(generator.brdf_lut(), Some(brdf));
    assert!(backend.is_live(brdf));

    backend.reset_commands();
    generator.clear(&mut backend);
    assert!(backend.commands().is_empty());
}

#[test]
fn test_light_without_image_clears() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let image = sky_image("sky");
    let mut scene = scene_with(&image);
    generator.process(&mut backend, Some(&scene)).unwrap();

    scene.set_environment(None);
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Cleared);
    assert!(generator.current_image().is_none());

    // Coming back to the same image regenerates
    scene.set_environment(Some(image.clone()));
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
}

#[test]
fn test_invalid_scene_changes_nothing() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let image = sky_image("sky");
    generator
        .process(&mut backend, Some(&scene_with(&image)))
        .unwrap();

    backend.reset_commands();
    let outcome = generator.process(&mut backend, None::<&Scene>).unwrap();
    assert_eq!(outcome, ProcessOutcome::InvalidScene);

    let mut rootless = Scene::empty();
    rootless.add_environment(sky_image("other"));
    let outcome = generator.process(&mut backend, Some(&rootless)).unwrap();
    assert_eq!(outcome, ProcessOutcome::InvalidScene);

    assert!(backend.commands().is_empty());
    assert_eq!(generator.current_image(), Some(image.id()));
    assert!(generator.skybox(&image).is_some());
}

#[test]
fn test_accessor_with_other_image_returns_cached_maps() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let a = sky_image("a");
    let b = sky_image("b");
    generator.process(&mut backend, Some(&scene_with(&a))).unwrap();

    let cached = generator.skybox(&a).copied();
    assert_eq!(generator.skybox(&b).copied(), cached);
    assert_eq!(generator.current_image(), Some(a.id()));
}

// ============================================================================
// Pipeline Work
// ============================================================================

#[test]
fn test_pipeline_stages_issue_expected_draws() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let image = sky_image("sky");
    generator
        .process(&mut backend, Some(&scene_with(&image)))
        .unwrap();

    let skybox = generator.skybox(&image).unwrap().texture();

    let skybox_draws = backend.draws_with(SKYBOX_PROGRAM);
    assert_eq!(skybox_draws.len(), 6);
    for draw in &skybox_draws {
        assert_eq!(draw.mesh, MeshKind::Cube);
        assert_eq!(draw.attachment.texture(), skybox);
        assert_eq!(draw.attachment.mip(), 0);
        assert_eq!(draw.viewport.width, 32);
        // The source upload is released once the skybox exists
        let source = draw.input.unwrap();
        assert!(!backend.is_live(source), "source texture still alive");
    }
    let faces: Vec<u32> = skybox_draws.iter().map(|d| d.attachment.layer()).collect();
    assert_eq!(faces, vec![0, 1, 2, 3, 4, 5]);

    let irradiance_draws = backend.draws_with(IRRADIANCE_PROGRAM);
    assert_eq!(irradiance_draws.len(), 6);
    assert!(irradiance_draws.iter().all(|d| d.input == Some(skybox)));
    assert!(irradiance_draws.iter().all(|d| d.viewport.width == 8));

    let mipmapped = backend
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::GenerateMipmaps(t) if *t == skybox))
        .count();
    assert_eq!(mipmapped, 1);

    let skybox_desc = backend.texture_descriptor(skybox).unwrap();
    assert_eq!(skybox_desc.kind, TextureKind::Cube);
    assert_eq!(skybox_desc.mip_levels, 6);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(5)]
fn test_prefilter_roughness_per_mip(#[case] levels: u32) {
    let config = EnvironmentConfig {
        prefilter_size: 128,
        prefilter_mip_levels: levels,
        ..small_config()
    };
    let (mut backend, mut generator) = dummy_generator(config);
    let image = sky_image("sky");
    generator
        .process(&mut backend, Some(&scene_with(&image)))
        .unwrap();

    let prefilter = generator.prefilter_map(&image).unwrap().texture();
    let draws = backend.draws_with(PREFILTER_PROGRAM);
    assert_eq!(draws.len(), 6 * levels as usize);

    let mut faces_per_mip: BTreeMap<u32, usize> = BTreeMap::new();
    for draw in &draws {
        let ColorAttachment::CubeFace { texture, mip, .. } = draw.attachment else {
            panic!("prefilter drew into {:?}", draw.attachment);
        };
        assert_eq!(texture, prefilter);
        *faces_per_mip.entry(mip).or_default() += 1;

        assert_eq!(draw.viewport.width, mip_size(128, mip));
        assert_eq!(draw.viewport.height, mip_size(128, mip));
        assert_eq!(
            draw.uniform(uniform_names::ROUGHNESS),
            Some(UniformValue::Float(roughness_for_mip(mip, levels)))
        );
        assert_eq!(
            draw.uniform(uniform_names::RESOLUTION),
            Some(UniformValue::Float(32.0))
        );
    }
    assert_eq!(faces_per_mip.len(), levels as usize);
    assert!(faces_per_mip.values().all(|&count| count == 6));

    let first = draws.first().unwrap().uniform(uniform_names::ROUGHNESS);
    let last = draws.last().unwrap().uniform(uniform_names::ROUGHNESS);
    assert_eq!(first, Some(UniformValue::Float(0.0)));
    let expected_last = if levels == 1 { 0.0 } else { 1.0 };
    assert_eq!(last, Some(UniformValue::Float(expected_last)));
}

#[test]
fn test_brdf_is_rendered_once() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    assert!(generator.brdf_lut().is_none());

    let mut scene = Scene::new();
    for name in ["a", "b", "c"] {
        scene.set_environment(Some(sky_image(name)));
        let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
        assert_eq!(outcome, ProcessOutcome::Regenerated);
    }

    let brdf_draws = backend.draws_with(BRDF_PROGRAM);
    assert_eq!(brdf_draws.len(), 1);
    let draw = brdf_draws[0];
    assert_eq!(draw.mesh, MeshKind::Screen);
    assert_eq!(draw.viewport.width, 16);
    assert_eq!(Some(draw.attachment.texture()), generator.brdf_lut());
}

#[test]
fn test_every_regeneration_is_flushed() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let mut scene = Scene::new();
    for name in ["a", "b"] {
        scene.set_environment(Some(sky_image(name)));
        generator.process(&mut backend, Some(&scene)).unwrap();
    }
    let flushes = backend
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Flush))
        .count();
    assert_eq!(flushes, 2);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_failed_regeneration_restores_state_and_clears() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let (target, viewport) = bind_caller_state(&mut backend);
    let live_before = backend.live_texture_count();

    backend.fail_texture("prefilter");
    let image = sky_image("sky");
    let scene = scene_with(&image);
    let err = generator.process(&mut backend, Some(&scene)).unwrap_err();
    assert!(matches!(err, EnvError::Backend(_)), "{err}");

    assert_eq!(backend.current_render_target(), Some(target));
    assert_eq!(backend.viewport(), viewport);
    assert_eq!(generator.current_image(), None);
    assert!(generator.skybox(&image).is_none());
    assert!(generator.irradiance_map(&image).is_none());
    assert_eq!(backend.live_texture_count(), live_before);

    // The next frame retries
    backend.clear_failures();
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
    assert_eq!(backend.current_render_target(), Some(target));
    assert_eq!(backend.viewport(), viewport);
}

#[test]
fn test_rejected_submission_restores_state_and_clears() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let (target, viewport) = bind_caller_state(&mut backend);
    let live_before = backend.live_texture_count();

    backend.fail_submission();
    let image = sky_image("sky");
    let scene = scene_with(&image);
    let err = generator.process(&mut backend, Some(&scene)).unwrap_err();
    assert!(
        matches!(err, EnvError::Backend(BackendError::SubmissionFailed(_))),
        "{err}"
    );

    assert_eq!(backend.current_render_target(), Some(target));
    assert_eq!(backend.viewport(), viewport);
    assert_eq!(generator.current_image(), None);
    assert!(generator.prefilter_map(&image).is_none());
    assert_eq!(backend.live_texture_count(), live_before);

    backend.clear_failures();
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
}

#[test]
fn test_failed_regeneration_keeps_nothing_from_previous_image() {
    let (mut backend, mut generator) = dummy_generator(small_config());
    let a = sky_image("a");
    let mut scene = scene_with(&a);
    generator.process(&mut backend, Some(&scene)).unwrap();
    let old_skybox = generator.skybox(&a).unwrap().texture();

    backend.fail_texture("irradiance");
    scene.set_environment(Some(sky_image("b")));
    assert!(generator.process(&mut backend, Some(&scene)).is_err());

    assert!(generator.skybox(&a).is_none());
    assert!(!backend.is_live(old_skybox));
}

#[test]
fn test_init_reports_shader_failure() {
    init_logging();
    let mut backend = DummyBackend::new();
    backend.fail_program(PREFILTER_PROGRAM);

    let err = EnvironmentMapGenerator::init(&mut backend, small_config())
        .err()
        .unwrap();
    match err {
        EnvError::Shader { label, .. } => assert_eq!(label, PREFILTER_PROGRAM),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_init_rejects_invalid_config() {
    init_logging();
    let mut backend = DummyBackend::new();
    let config = EnvironmentConfig {
        irradiance_size: 0,
        ..small_config()
    };
    let err = EnvironmentMapGenerator::init(&mut backend, config).err().unwrap();
    assert!(matches!(err, EnvError::Config(_)));
    assert!(backend.commands().is_empty());
}

#[test]
fn test_init_uploads_capture_uniforms() {
    let (backend, _generator) = dummy_generator(small_config());
    let programs: Vec<_> = backend
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::CreateProgram(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(programs.len(), 4);

    for program in programs {
        let label = backend.program_label(program).unwrap();
        let projection = backend.uniform(program, uniform_names::PROJECTION);
        if label == BRDF_PROGRAM {
            assert!(projection.is_none());
        } else {
            assert!(matches!(projection, Some(UniformValue::Mat4(_))), "{label}");
            assert_eq!(
                backend.uniform(program, uniform_names::ENVIRONMENT_MAP),
                Some(UniformValue::Int(0))
            );
        }
    }
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn test_viewer_frame_loop() {
    let (mut backend, mut generator) = dummy_generator(EnvironmentConfig::default());
    let (target, viewport) = bind_caller_state(&mut backend);
    let image = sky_image("studio");
    let scene = scene_with(&image);

    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::Regenerated);
    // 6 skybox + 6 irradiance + 5 x 6 prefilter + 1 BRDF
    assert_eq!(backend.draw_count(), 43);

    let skybox = generator.skybox(&image).unwrap();
    assert_eq!((skybox.size(), skybox.mip_levels()), (1024, 11));
    let prefilter = generator.prefilter_map(&image).unwrap();
    assert_eq!((prefilter.size(), prefilter.mip_levels()), (128, 5));

    backend.reset_commands();
    let outcome = generator.process(&mut backend, Some(&scene)).unwrap();
    assert_eq!(outcome, ProcessOutcome::CacheHit);
    assert_eq!(backend.draw_count(), 0);

    assert_eq!(backend.current_render_target(), Some(target));
    assert_eq!(backend.viewport(), viewport);
}

// ============================================================================
// Rendered Output (wgpu)
// ============================================================================

#[cfg(feature = "wgpu-backend")]
mod rendered {
    use std::sync::Arc;

    use super::*;
    use envmap_generator::{HdrImage, WgpuBackend};

    const COLOR: [f32; 4] = [0.5, 1.0, 2.0, 1.0];

    fn assert_near_color(texel: [f32; 4], tolerance: f32, what: &str) {
        for (channel, (&got, &want)) in texel.iter().zip(&COLOR).take(3).enumerate() {
            assert!(got.is_finite(), "{what}: channel {channel} is {got}");
            assert!(
                (got - want).abs() <= want * tolerance,
                "{what}: channel {channel} is {got}, expected {want}"
            );
        }
    }

    #[test]
    fn test_solid_environment_renders_solid_maps() {
        init_logging();
        let mut backend = match WgpuBackend::new() {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("wgpu backend unavailable, skipping: {e}");
                return;
            }
        };
        let mut generator = EnvironmentMapGenerator::init(&mut backend, small_config()).unwrap();
        let image = Arc::new(HdrImage::solid("solid", 16, 8, COLOR).unwrap());
        let outcome = generator
            .process(&mut backend, Some(&scene_with(&image)))
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Regenerated);
        backend.wait_idle();

        // Every mip of the skybox, down to 1x1, comes from the blit chain
        let skybox = *generator.skybox(&image).unwrap();
        for mip in [0, 1, skybox.mip_levels() - 1] {
            let faces = backend.sample_cube_faces(skybox.texture(), mip).unwrap();
            for (face, texel) in faces.into_iter().enumerate() {
                assert_near_color(texel, 0.01, &format!("skybox mip {mip} face {face}"));
            }
        }

        let irradiance = generator.irradiance_map(&image).unwrap().texture();
        let faces = backend.sample_cube_faces(irradiance, 0).unwrap();
        for (face, texel) in faces.into_iter().enumerate() {
            assert_near_color(texel, 0.05, &format!("irradiance face {face}"));
        }

        let prefilter = *generator.prefilter_map(&image).unwrap();
        for mip in 0..prefilter.mip_levels() {
            let faces = backend.sample_cube_faces(prefilter.texture(), mip).unwrap();
            for (face, texel) in faces.into_iter().enumerate() {
                assert_near_color(texel, 0.05, &format!("prefilter mip {mip} face {face}"));
            }
        }
    }

    #[test]
    fn test_brdf_lut_values() {
        init_logging();
        let mut backend = match WgpuBackend::new() {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("wgpu backend unavailable, skipping: {e}");
                return;
            }
        };
        let config = small_config();
        let mut generator = EnvironmentMapGenerator::init(&mut backend, config.clone()).unwrap();
        let image = Arc::new(HdrImage::solid("solid", 16, 8, COLOR).unwrap());
        generator
            .process(&mut backend, Some(&scene_with(&image)))
            .unwrap();

        let lut = backend.read_texture(generator.brdf_lut().unwrap()).unwrap();
        let size = config.brdf_size as usize;
        assert_eq!(lut.len(), size * size);
        for (i, texel) in lut.iter().enumerate() {
            let (scale, bias) = (texel[0], texel[1]);
            assert!(scale.is_finite() && bias.is_finite(), "texel {i}: {texel:?}");
            assert!((0.0..=1.05).contains(&scale), "texel {i}: scale {scale}");
            assert!((0.0..=1.05).contains(&bias), "texel {i}: bias {bias}");
        }

        // Head-on view of a smooth surface reflects everything
        let smooth = lut[size - 1];
        assert!((smooth[0] + smooth[1] - 1.0).abs() < 0.1, "{smooth:?}");
        // Grazing view of a rough surface loses most of it
        let rough = lut[(size - 1) * size];
        assert!(rough[0] + rough[1] < smooth[0] + smooth[1], "{rough:?}");
    }
}
