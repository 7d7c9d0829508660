//! Texture Registry Tests
//!
//! Tests for:
//! - Unit assignment across several texture sources
//! - Counter reset on every update
//! - Usage blocks around per-draw texture binds

use std::cell::RefCell;
use std::rc::Rc;

use quark::core::UniformValue;
use quark::passes::{GBuffer, SsaoKernel, SsaoSettings};
use quark::resources::ScreenQuadMesh;
use quark::scene::ShadowMap;
use quark::shader::ScreenShader;
use quark::{
    BufferType, Context, ContextSettings, Framebuffer, HeadlessBackend, QuarkError,
    TextureRegistry, UniformSource,
};

fn headless() -> Context {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::headless(ContextSettings::default())
}

fn sampler_unit(ctx: &Context, shader: &ScreenShader, name: &str) -> Option<i32> {
    ctx.inspect(|h: &HeadlessBackend| h.uniform(shader.id(), name))
        .flatten()
        .and_then(|value| match value {
            UniformValue::Int(unit) => Some(unit),
            _ => None,
        })
}

// ============================================================================
// Unit Assignment
// ============================================================================

#[test]
fn test_sources_receive_consecutive_units() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;

    let gbuffer = Rc::new(RefCell::new(GBuffer::new(&ctx, 64, 64)?));
    let kernel = Rc::new(RefCell::new(SsaoKernel::with_settings(
        &ctx,
        SsaoSettings {
            seed: Some(1),
            ..SsaoSettings::default()
        },
    )?));
    let shadow_map = Rc::new(RefCell::new(ShadowMap::with_size(&ctx, 128, 128)?));

    let mut registry = TextureRegistry::new();
    registry.add_texture_source(gbuffer.clone());
    registry.add_texture_source(kernel.clone());
    registry.add_texture_source(shadow_map.clone());
    assert_eq!(registry.num_sources(), 3);

    registry.update_uniforms(&shader)?;

    // The G-buffer claims four units, the others one each.
    assert_eq!(registry.peek_texture_unit(), 6);
    assert_eq!(sampler_unit(&ctx, &shader, "gPositionAO"), Some(0));
    assert_eq!(sampler_unit(&ctx, &shader, "gEmission"), Some(3));
    assert_eq!(sampler_unit(&ctx, &shader, "qrk_ssaoNoise"), Some(4));
    assert_eq!(sampler_unit(&ctx, &shader, "shadowMap"), Some(5));

    let position_id = gbuffer.borrow().position_ao()?.id();
    let noise_id = kernel.borrow().noise_texture().id();
    let (unit0, unit4) = ctx
        .inspect(|h: &HeadlessBackend| (h.texture_at_unit(0), h.texture_at_unit(4)))
        .expect("headless backend");
    assert_eq!(unit0, Some(position_id));
    assert_eq!(unit4, Some(noise_id));
    Ok(())
}

#[test]
fn test_update_resets_counter_and_stack() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let gbuffer = Rc::new(RefCell::new(GBuffer::new(&ctx, 32, 32)?));

    let mut registry = TextureRegistry::new();
    registry.add_texture_source(gbuffer);

    registry.update_uniforms(&shader)?;
    registry.push_usage_block();
    registry.next_texture_unit();
    registry.next_texture_unit();

    registry.update_uniforms(&shader)?;
    assert_eq!(registry.peek_texture_unit(), 4);
    assert_eq!(registry.usage_depth(), 0);
    assert!(matches!(
        registry.pop_usage_block(),
        Err(QuarkError::TextureUnitStackUnderflow)
    ));
    Ok(())
}

#[test]
fn test_empty_registry_starts_at_zero() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut registry = TextureRegistry::new();

    registry.next_texture_unit();
    registry.update_uniforms(&shader)?;
    assert_eq!(registry.peek_texture_unit(), 0);
    Ok(())
}

// ============================================================================
// Usage Blocks
// ============================================================================

#[test]
fn test_screen_quad_binds_after_registry_units() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let gbuffer = Rc::new(RefCell::new(GBuffer::new(&ctx, 32, 32)?));

    let registry = TextureRegistry::shared();
    registry.borrow_mut().add_texture_source(gbuffer);
    shader.add_uniform_source(registry.clone());
    shader.update_uniforms()?;

    let mut source = Framebuffer::new(&ctx, 32, 32)?;
    let color = source.attach_texture(BufferType::ColorHdrAlpha)?;
    let quad = ScreenQuadMesh::with_texture(&ctx, color.as_texture()?)?;

    quad.draw(&shader, Some(&mut *registry.borrow_mut()))?;

    assert_eq!(sampler_unit(&ctx, &shader, "qrk_screenTexture"), Some(4));
    // The draw-local unit is released again.
    assert_eq!(registry.borrow().peek_texture_unit(), 4);
    assert_eq!(registry.borrow().usage_depth(), 0);

    let sampled = ctx
        .inspect(|h: &HeadlessBackend| {
            h.draws()
                .last()
                .and_then(|d| d.sampled("qrk_screenTexture").map(|s| (s.unit, s.texture)))
        })
        .flatten()
        .expect("draw recorded");
    assert_eq!(sampled, (4, Some(color.as_texture()?.id())));
    Ok(())
}
