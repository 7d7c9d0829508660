//! Render Pass Tests
//!
//! Tests for:
//! - PingPongPass draw ordering
//! - BloomPass mip schedule and blend state
//! - Cubemap face rendering and equirect conversion
//! - IBL precomputation (irradiance, GGX prefilter, BRDF LUT)
//! - SSAO kernel and buffers
//! - G-buffer layout
//!
//! Every test runs against the recording headless backend and inspects the
//! draws it logged.

use glam::{Vec3, Vec4};
use quark::core::headless::{Command, DrawRecord};
use quark::core::{AttachmentPoint, AttachmentResource, BlendMode, RenderTarget, UniformValue, Viewport};
use quark::passes::{
    BloomPass, CubemapIrradianceCalculator, DeferredGeometryPassShader, EquirectCubemapConverter,
    GBuffer, GgxBrdfIntegrationCalculator, GgxPrefilteredEnvMapCalculator, MAX_SSAO_KERNEL_SIZE,
    PingPongPass, SsaoBlurShader, SsaoBuffer, SsaoKernel, SsaoSettings, SsaoShader,
    cube_face_views,
};
use quark::resources::texture::calculate_mip_level;
use quark::resources::{
    TextureFiltering, TextureFormat, TextureParams, TextureWrapMode, CUBEMAP_FACES,
};
use quark::shader::GaussianBlurShader;
use quark::{
    BufferType, Context, ContextSettings, Framebuffer, HeadlessBackend, QuarkError, Texture,
    UniformSource,
};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn headless() -> Context {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::headless(ContextSettings::default())
}

fn draw_count(ctx: &Context) -> usize {
    ctx.inspect(|h: &HeadlessBackend| h.draws().count())
        .expect("headless backend")
}

/// Draws recorded after the first `skip`.
fn draws_since(ctx: &Context, skip: usize) -> Vec<DrawRecord> {
    ctx.inspect(|h: &HeadlessBackend| h.draws().skip(skip).cloned().collect())
        .expect("headless backend")
}

fn open_debug_groups(ctx: &Context) -> usize {
    ctx.inspect(|h: &HeadlessBackend| h.debug_groups().len())
        .expect("headless backend")
}

fn target_face(draw: &DrawRecord) -> Option<u32> {
    match draw.target {
        RenderTarget::Framebuffer { face, .. } => face,
        RenderTarget::Default => None,
    }
}

fn target_mip(draw: &DrawRecord) -> u32 {
    match draw.target {
        RenderTarget::Framebuffer { mip, .. } => mip,
        RenderTarget::Default => 0,
    }
}

fn float_uniform(draw: &DrawRecord, name: &str) -> f32 {
    match draw.uniform(name) {
        Some(UniformValue::Float(v)) => v,
        other => panic!("{name} is not a float: {other:?}"),
    }
}

fn hdr_source(ctx: &Context, width: u32, height: u32) -> anyhow::Result<Framebuffer> {
    let mut fb = Framebuffer::new(ctx, width, height)?;
    fb.attach_texture(BufferType::ColorHdrAlpha)?;
    Ok(fb)
}

fn environment_cubemap(ctx: &Context) -> anyhow::Result<Texture> {
    Ok(Texture::create_cubemap(
        ctx,
        32,
        TextureFormat::Rgba16F,
        &TextureParams::bilinear_clamped(),
    )?)
}

// ============================================================================
// PingPongPass
// ============================================================================

#[test]
fn test_ping_pong_alternates_buffers() -> anyhow::Result<()> {
    let ctx = headless();
    let source = hdr_source(&ctx, 64, 64)?;
    let source_texture = source.attachment(BufferType::ColorHdrAlpha)?.as_texture()?;
    let shader = GaussianBlurShader::new(&ctx)?;
    let mut pass = PingPongPass::new(&ctx, 64, 64)?;

    let mut iterations = Vec::new();
    let before = draw_count(&ctx);
    pass.multipass_draw(
        &source_texture,
        &shader,
        2,
        |i| {
            iterations.push(i);
            shader.set_horizontal(i % 2 == 0);
        },
        None,
    )?;
    let draws = draws_since(&ctx, before);

    assert_eq!(iterations, vec![0, 1, 2, 3]);
    assert_eq!(draws.len(), 4, "two passes are four draws");

    let sampled: Vec<_> = draws
        .iter()
        .map(|d| d.sampled("qrk_screenTexture").and_then(|s| s.texture))
        .collect();
    assert_eq!(sampled[0], Some(source_texture.id()), "first draw reads the source");
    assert_eq!(sampled[1], sampled[3], "draws 1 and 3 read the same buffer");
    assert_eq!(sampled[2], Some(pass.output()?.id()));
    assert_ne!(sampled[1], sampled[2]);

    assert_eq!(draws[0].target, draws[2].target);
    assert_ne!(draws[0].target, draws[1].target);
    assert_eq!(draws[0].uniform("horizontal"), Some(UniformValue::Bool(true)));
    assert_eq!(draws[1].uniform("horizontal"), Some(UniformValue::Bool(false)));

    // The last draw lands in the output buffer.
    let RenderTarget::Framebuffer { id, .. } = draws[3].target else {
        panic!("ping-pong draws into framebuffers");
    };
    let output_id = pass.output()?.id();
    let holds_output = ctx
        .inspect(|h: &HeadlessBackend| {
            h.framebuffer(id).is_some_and(|fb| {
                fb.attachments
                    .iter()
                    .any(|(_, r)| *r == AttachmentResource::Texture(output_id))
            })
        })
        .expect("headless backend");
    assert!(holds_output);

    let target = ctx
        .inspect(|h: &HeadlessBackend| h.render_target())
        .expect("headless backend");
    assert_eq!(target, RenderTarget::Default);
    assert_eq!(open_debug_groups(&ctx), 0);
    Ok(())
}

// ============================================================================
// BloomPass
// ============================================================================

#[test]
fn test_bloom_mip_schedule() -> anyhow::Result<()> {
    let ctx = headless();
    let source = hdr_source(&ctx, 64, 64)?;
    let mut bloom = BloomPass::new(&ctx, 64, 64)?;
    assert_eq!(bloom.num_mips(), 7);

    let before = draw_count(&ctx);
    bloom.multipass_draw(&source)?;
    let draws = draws_since(&ctx, before);
    assert_eq!(draws.len(), 12, "six downsamples and six upsamples");

    let (down, up) = draws.split_at(6);
    for (i, draw) in down.iter().enumerate() {
        let dest = i as u32 + 1;
        let size = calculate_mip_level(64, 64, dest);
        assert_eq!(target_mip(draw), dest);
        assert_eq!(draw.viewport, Viewport::new(size.width, size.height));
        assert_eq!(draw.blend, BlendMode::Disabled);
        let sampled = draw.sampled("qrk_bloomMipChain").expect("mip chain sampled");
        assert_eq!(sampled.mip_range, Some((dest - 1, dest - 1)));
    }
    for (i, draw) in up.iter().enumerate() {
        let dest = 5 - i as u32;
        assert_eq!(target_mip(draw), dest);
        assert_eq!(draw.blend, BlendMode::Additive);
        let sampled = draw.sampled("qrk_bloomMipChain").expect("mip chain sampled");
        assert_eq!(sampled.mip_range, Some((dest + 1, dest + 1)));
    }

    let chain_id = bloom.output()?.id();
    let mip_range = ctx
        .inspect(|h: &HeadlessBackend| h.texture(chain_id).map(|t| t.mip_range))
        .flatten();
    assert_eq!(mip_range, None, "every mip is visible again afterwards");
    Ok(())
}

#[test]
fn test_bloom_starts_with_color_blit() -> anyhow::Result<()> {
    let ctx = headless();
    let source = hdr_source(&ctx, 32, 32)?;
    let mut bloom = BloomPass::new(&ctx, 32, 32)?;
    bloom.multipass_draw(&source)?;

    let blit = ctx
        .inspect(|h: &HeadlessBackend| {
            h.commands().iter().find_map(|c| match c {
                Command::Blit { source, dest, .. } => Some((*source, *dest)),
                _ => None,
            })
        })
        .flatten()
        .expect("blit recorded");
    assert_eq!(blit, (Some(source.id()), Some(bloom.buffer().id())));
    Ok(())
}

#[test]
fn test_bloom_restores_blend_mode() -> anyhow::Result<()> {
    let ctx = headless();
    let source = hdr_source(&ctx, 32, 32)?;
    let mut bloom = BloomPass::new(&ctx, 32, 32)?;

    ctx.set_blend_mode(BlendMode::Alpha);
    bloom.multipass_draw(&source)?;
    assert_eq!(ctx.blend_mode(), BlendMode::Alpha);
    assert_eq!(open_debug_groups(&ctx), 0);
    Ok(())
}

#[test]
fn test_bloom_source_mip_bounds() -> anyhow::Result<()> {
    let ctx = headless();
    let bloom = BloomPass::new(&ctx, 16, 16)?;
    let buffer = bloom.buffer();

    buffer.set_source_mip(4)?;
    assert!(matches!(
        buffer.set_source_mip(5),
        Err(QuarkError::SourceMipOutOfRange { level: 5, num_mips: 5 })
    ));
    assert!(matches!(
        buffer.set_source_mip(-1),
        Err(QuarkError::SourceMipOutOfRange { level: -1, .. })
    ));
    Ok(())
}

#[test]
fn test_bloom_filter_radius() -> anyhow::Result<()> {
    let ctx = headless();
    let source = hdr_source(&ctx, 16, 16)?;
    let mut bloom = BloomPass::new(&ctx, 16, 16)?;
    bloom.set_filter_radius(0.01);
    assert!(approx(bloom.filter_radius(), 0.01));

    let before = draw_count(&ctx);
    bloom.multipass_draw(&source)?;
    let last = draws_since(&ctx, before).pop().expect("upsample draw");
    assert!(approx(float_uniform(&last, "qrk_filterRadius"), 0.01));
    Ok(())
}

// ============================================================================
// Cubemaps
// ============================================================================

#[test]
fn test_face_views_look_along_axes() {
    let targets = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    for (face, (view, target)) in cube_face_views().iter().zip(targets).enumerate() {
        let forward = view.transform_vector3(target);
        assert!(
            (forward - Vec3::NEG_Z).length() < EPSILON,
            "face {face} looks along {forward}"
        );
    }
}

#[test]
fn test_equirect_conversion_renders_six_faces() -> anyhow::Result<()> {
    let ctx = headless();
    let equirect = Texture::create(
        &ctx,
        64,
        32,
        TextureFormat::Rgba16F,
        &TextureParams::bilinear_clamped(),
    )?;
    let mut converter = EquirectCubemapConverter::new(&ctx, 16, 16)?;

    let before = draw_count(&ctx);
    converter.multipass_draw(&equirect)?;
    let draws = draws_since(&ctx, before);

    assert_eq!(draws.len(), CUBEMAP_FACES as usize);
    for (face, draw) in draws.iter().enumerate() {
        assert_eq!(target_face(draw), Some(face as u32));
        assert_eq!(draw.viewport, Viewport::new(16, 16));
        let sampled = draw.sampled("qrk_equirectMap").expect("equirect sampled");
        assert_eq!(sampled.texture, Some(equirect.id()));
    }
    assert_eq!(converter.cubemap()?.num_mips(), 1);
    Ok(())
}

// ============================================================================
// IBL
// ============================================================================

#[test]
fn test_irradiance_convolves_every_face() -> anyhow::Result<()> {
    let ctx = headless();
    let environment = environment_cubemap(&ctx)?;
    let mut irradiance = CubemapIrradianceCalculator::new(&ctx)?;
    irradiance.set_hemisphere_sample_delta(0.1);

    let before = draw_count(&ctx);
    irradiance.multipass_draw(&environment)?;
    let draws = draws_since(&ctx, before);

    assert_eq!(draws.len(), 6);
    for draw in &draws {
        assert_eq!(draw.viewport, Viewport::new(32, 32));
        assert!(approx(float_uniform(draw, "qrk_hemisphereSampleDelta"), 0.1));
        let sampled = draw.sampled("qrk_environmentMap").expect("environment sampled");
        assert_eq!(sampled.texture, Some(environment.id()));
    }
    Ok(())
}

#[test]
fn test_prefilter_roughness_rises_with_mip() -> anyhow::Result<()> {
    let ctx = headless();
    let environment = environment_cubemap(&ctx)?;
    let mut prefilter = GgxPrefilteredEnvMapCalculator::new(&ctx, 64, 64, Some(5))?;
    assert_eq!(prefilter.num_mips(), 5);

    let before = draw_count(&ctx);
    prefilter.multipass_draw(&environment)?;
    let draws = draws_since(&ctx, before);
    assert_eq!(draws.len(), 5 * 6);

    for (mip, faces) in draws.chunks(6).enumerate() {
        let mip = mip as u32;
        let size = calculate_mip_level(64, 64, mip);
        for (face, draw) in faces.iter().enumerate() {
            assert_eq!(target_mip(draw), mip);
            assert_eq!(target_face(draw), Some(face as u32));
            assert_eq!(draw.viewport, Viewport::new(size.width, size.height));
            let roughness = float_uniform(draw, "qrk_roughness");
            assert!(approx(roughness, mip as f32 / 4.0), "mip {mip}: {roughness}");
        }
    }
    Ok(())
}

#[test]
fn test_prefilter_sample_count_reaches_shader() -> anyhow::Result<()> {
    let ctx = headless();
    let environment = environment_cubemap(&ctx)?;
    let mut prefilter = GgxPrefilteredEnvMapCalculator::new(&ctx, 16, 16, Some(1))?;
    prefilter.set_num_samples(64);

    let before = draw_count(&ctx);
    prefilter.multipass_draw(&environment)?;
    let draw = draws_since(&ctx, before).pop().expect("prefilter draw");
    assert_eq!(draw.uniform("qrk_numSamples"), Some(UniformValue::UInt(64)));
    assert!(approx(float_uniform(&draw, "qrk_roughness"), 0.0));
    Ok(())
}

#[test]
fn test_brdf_lut_is_one_screen_draw() -> anyhow::Result<()> {
    let ctx = headless();
    let mut brdf = GgxBrdfIntegrationCalculator::new(&ctx, 128, 128)?;

    let before = draw_count(&ctx);
    brdf.draw()?;
    let draws = draws_since(&ctx, before);

    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].viewport, Viewport::new(128, 128));
    assert_eq!(target_face(&draws[0]), None);
    assert_eq!(brdf.brdf_lut()?.size().width, 128);
    assert_eq!(open_debug_groups(&ctx), 0);
    Ok(())
}

// ============================================================================
// SSAO
// ============================================================================

fn seeded(seed: u64) -> SsaoSettings {
    SsaoSettings {
        seed: Some(seed),
        ..SsaoSettings::default()
    }
}

#[test]
fn test_ssao_kernel_uniforms() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = SsaoShader::new(&ctx)?;
    let mut kernel = SsaoKernel::with_settings(&ctx, seeded(11))?;
    kernel.set_radius(0.75);

    kernel.update_uniforms(&shader)?;
    let uniform = |name: &str| {
        ctx.inspect(|h: &HeadlessBackend| h.uniform(shader.id(), name))
            .flatten()
    };

    assert_eq!(uniform("qrk_ssaoKernelSize"), Some(UniformValue::Int(64)));
    assert_eq!(uniform("qrk_ssaoSampleRadius"), Some(UniformValue::Float(0.75)));
    assert_eq!(uniform("qrk_ssaoSampleBias"), Some(UniformValue::Float(0.025)));
    assert_eq!(
        uniform("qrk_ssaoKernel[63]"),
        Some(UniformValue::Vec3(kernel.kernel()[63]))
    );
    Ok(())
}

#[test]
fn test_ssao_seed_makes_kernel_reproducible() -> anyhow::Result<()> {
    let ctx = headless();
    let a = SsaoKernel::with_settings(&ctx, seeded(5))?;
    let b = SsaoKernel::with_settings(&ctx, seeded(5))?;
    let c = SsaoKernel::with_settings(&ctx, seeded(6))?;

    assert_eq!(a.kernel(), b.kernel());
    assert_ne!(a.kernel(), c.kernel());
    assert!(a.kernel().iter().all(|s| s.z >= 0.0 && s.length() <= 1.0));
    Ok(())
}

#[test]
fn test_ssao_kernel_size_limit() {
    let ctx = headless();
    let settings = SsaoSettings {
        kernel_size: MAX_SSAO_KERNEL_SIZE + 1,
        ..seeded(1)
    };
    let err = SsaoKernel::with_settings(&ctx, settings).unwrap_err();
    assert!(matches!(err, QuarkError::SsaoKernelSize { size: 65, max: 64 }), "got {err}");

    let settings = SsaoSettings {
        noise_texture_side_length: 0,
        ..seeded(1)
    };
    assert!(matches!(
        SsaoKernel::with_settings(&ctx, settings),
        Err(QuarkError::InvalidTextureSize(_))
    ));
}

#[test]
fn test_ssao_noise_texture_tiles() -> anyhow::Result<()> {
    let ctx = headless();
    let settings = SsaoSettings {
        noise_texture_side_length: 8,
        ..seeded(2)
    };
    let kernel = SsaoKernel::with_settings(&ctx, settings)?;
    let noise_id = kernel.noise_texture().id();

    let texture = ctx
        .inspect(|h: &HeadlessBackend| h.texture(noise_id).cloned())
        .flatten()
        .expect("noise texture exists");
    assert_eq!((texture.desc.width, texture.desc.height), (8, 8));
    assert_eq!(texture.params.filtering, TextureFiltering::Nearest);
    assert_eq!(texture.params.wrap_mode, TextureWrapMode::Repeat);
    Ok(())
}

#[test]
fn test_ssao_blur_matches_noise_tile() -> anyhow::Result<()> {
    let ctx = headless();
    let kernel = SsaoKernel::with_settings(
        &ctx,
        SsaoSettings {
            noise_texture_side_length: 6,
            ..seeded(3)
        },
    )?;
    let buffer = SsaoBuffer::new(&ctx, 64, 64)?;
    let blur = SsaoBlurShader::new(&ctx)?;

    blur.configure_with(&kernel, &buffer)?;
    let (side, unit0) = ctx
        .inspect(|h: &HeadlessBackend| {
            (
                h.uniform(blur.id(), "qrk_ssaoNoiseTextureSideLength"),
                h.texture_at_unit(0),
            )
        })
        .expect("headless backend");
    assert_eq!(side, Some(UniformValue::Int(6)));
    assert_eq!(unit0, Some(buffer.occlusion()?.id()));

    assert_eq!(buffer.clear_color(), Vec4::ZERO);
    assert_eq!(buffer.attachment(BufferType::Grayscale)?.num_mips(), 1);
    Ok(())
}

// ============================================================================
// G-buffer
// ============================================================================

#[test]
fn test_gbuffer_layout() -> anyhow::Result<()> {
    let ctx = headless();
    let gbuffer = GBuffer::new(&ctx, 128, 72)?;
    DeferredGeometryPassShader::new(&ctx)?;

    assert_eq!(gbuffer.draw_buffers().as_slice(), &[0, 1, 2, 3]);
    assert_eq!(gbuffer.clear_color(), Vec4::ZERO);
    assert!(gbuffer.has_depth_attachment() && gbuffer.has_stencil_attachment());

    let formats: Vec<_> = [
        gbuffer.position_ao()?,
        gbuffer.normal_roughness()?,
        gbuffer.albedo_metallic()?,
        gbuffer.emission()?,
    ]
    .iter()
    .map(Texture::format)
    .collect();
    assert_eq!(formats[0], formats[1]);
    assert_eq!(formats[2], formats[3]);
    assert_ne!(formats[0], formats[2], "geometry planes are HDR, material planes are not");

    let points = ctx
        .inspect(|h: &HeadlessBackend| {
            h.framebuffer(gbuffer.id())
                .map(|fb| fb.attachments.iter().map(|(p, _)| *p).collect::<Vec<_>>())
        })
        .flatten()
        .expect("framebuffer exists");
    assert_eq!(
        points,
        vec![
            AttachmentPoint::DepthStencil,
            AttachmentPoint::Color(0),
            AttachmentPoint::Color(1),
            AttachmentPoint::Color(2),
            AttachmentPoint::Color(3),
        ]
    );
    Ok(())
}

#[test]
fn test_gbuffer_activation_and_clear() -> anyhow::Result<()> {
    let ctx = headless();
    let gbuffer = GBuffer::new(&ctx, 40, 30)?;

    gbuffer.activate()?;
    gbuffer.clear();
    let viewport = ctx
        .inspect(|h: &HeadlessBackend| h.viewport())
        .expect("headless backend");
    assert_eq!(viewport, Viewport::new(40, 30));
    assert!(gbuffer.activate_at(1, None).is_err(), "G-buffer has a single mip");
    Ok(())
}
