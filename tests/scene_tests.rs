//! Scene Tests
//!
//! Tests for:
//! - The view-transform precondition of lights
//! - Per-program change tracking of light uniforms
//! - LightRegistry slots, counts and view sources
//! - Camera, ShadowCamera and WindowUniforms as uniform sources

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3};
use quark::core::UniformValue;
use quark::scene::light::LightDirty;
use quark::scene::{
    Camera, DirectionalLight, Light, LightKind, LightRegistry, PointLight, ShadowCamera, SpotLight,
    WindowUniforms,
};
use quark::shader::ScreenShader;
use quark::{Context, ContextSettings, HeadlessBackend, QuarkError, UniformSource};

const EPSILON: f32 = 1e-4;

fn approx(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() < EPSILON
}

fn headless() -> Context {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::headless(ContextSettings::default())
}

fn uniform(ctx: &Context, shader: &ScreenShader, name: &str) -> Option<UniformValue> {
    ctx.inspect(|h: &HeadlessBackend| h.uniform(shader.id(), name))
        .flatten()
}

fn vec3_uniform(ctx: &Context, shader: &ScreenShader, name: &str) -> Vec3 {
    match uniform(ctx, shader, name) {
        Some(UniformValue::Vec3(v)) => v,
        other => panic!("{name} is not a vec3: {other:?}"),
    }
}

// ============================================================================
// View-Transform Precondition
// ============================================================================

#[test]
fn test_fresh_light_requires_view_transform() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut light = PointLight::new(Vec3::ONE);

    let err = light.update_uniforms(&shader).unwrap_err();
    assert!(
        matches!(err, QuarkError::LightViewTransformNotApplied),
        "got {err}"
    );
    Ok(())
}

#[test]
fn test_moved_light_requires_view_transform_again() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut light = PointLight::new(Vec3::ONE);

    light.apply_view_transform(&Mat4::IDENTITY);
    light.update_uniforms(&shader)?;

    light.set_position(Vec3::new(2.0, 0.0, 0.0));
    assert!(light.update_uniforms(&shader).is_err());

    light.apply_view_transform(&Mat4::IDENTITY);
    light.update_uniforms(&shader)?;
    Ok(())
}

#[test]
fn test_color_change_does_not_need_view_transform() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut light = PointLight::new(Vec3::ONE);
    light.apply_view_transform(&Mat4::IDENTITY);
    light.update_uniforms(&shader)?;

    light.set_diffuse(Vec3::new(1.0, 0.0, 0.0));
    light.update_uniforms(&shader)?;
    assert_eq!(
        vec3_uniform(&ctx, &shader, "qrk_pointLights[0].diffuse"),
        Vec3::new(1.0, 0.0, 0.0)
    );
    Ok(())
}

#[test]
fn test_point_light_position_is_sent_in_view_space() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut light = PointLight::new(Vec3::new(1.0, 2.0, 3.0));

    light.apply_view_transform(&Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
    light.update_uniforms(&shader)?;

    let position = vec3_uniform(&ctx, &shader, "qrk_pointLights[0].position");
    assert!(approx(position, Vec3::new(1.0, 2.0, -2.0)), "got {position}");
    Ok(())
}

#[test]
fn test_directional_light_ignores_translation() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut light = DirectionalLight::new(Vec3::new(0.0, -1.0, 0.0));

    let view = Mat4::from_translation(Vec3::new(3.0, 4.0, 5.0))
        * Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
    light.apply_view_transform(&view);
    light.update_uniforms(&shader)?;

    let direction = vec3_uniform(&ctx, &shader, "qrk_directionalLights[0].direction");
    assert!(approx(direction, Vec3::new(1.0, 0.0, 0.0)), "got {direction}");
    Ok(())
}

#[test]
fn test_world_space_lights_skip_the_view() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut light = SpotLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::NEG_Z);
    light.set_use_view_transform(false);

    light.apply_view_transform(&Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
    light.update_uniforms(&shader)?;

    let position = vec3_uniform(&ctx, &shader, "qrk_spotLights[0].position");
    assert!(approx(position, Vec3::new(1.0, 2.0, 3.0)), "got {position}");
    Ok(())
}

// ============================================================================
// Change Tracking
// ============================================================================

#[test]
fn test_dirty_state_is_tracked_per_program() -> anyhow::Result<()> {
    let ctx = headless();
    let first = ScreenShader::new(&ctx)?;
    let second = ScreenShader::new(&ctx)?;
    let mut light = PointLight::new(Vec3::ONE);
    light.apply_view_transform(&Mat4::IDENTITY);

    assert_eq!(light.dirty(first.id()), LightDirty::Both);
    light.update_uniforms(&first)?;
    assert_eq!(light.dirty(first.id()), LightDirty::Clean);
    assert_eq!(
        light.dirty(second.id()),
        LightDirty::Both,
        "a program that never received the light is fully dirty"
    );

    light.set_specular(Vec3::ZERO);
    assert_eq!(light.dirty(first.id()), LightDirty::ValueDirty);

    light.update_uniforms(&first)?;
    light.update_uniforms(&second)?;
    assert_eq!(light.dirty(first.id()), LightDirty::Clean);
    assert_eq!(light.dirty(second.id()), LightDirty::Clean);

    light.set_position(Vec3::ZERO);
    light.apply_view_transform(&Mat4::IDENTITY);
    assert_eq!(light.dirty(first.id()), LightDirty::ViewDirty);
    assert_eq!(light.dirty(second.id()), LightDirty::ViewDirty);
    Ok(())
}

#[test]
fn test_unchanged_view_keeps_light_clean() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let view = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
    let mut light = PointLight::new(Vec3::ONE);

    light.apply_view_transform(&view);
    light.update_uniforms(&shader)?;
    light.apply_view_transform(&view);
    assert_eq!(light.dirty(shader.id()), LightDirty::Clean);

    light.apply_view_transform(&Mat4::IDENTITY);
    assert_eq!(light.dirty(shader.id()), LightDirty::ViewDirty);
    Ok(())
}

// ============================================================================
// LightRegistry
// ============================================================================

#[test]
fn test_registry_assigns_slots_per_kind() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;

    let mut registry = LightRegistry::new();
    registry.add_light(PointLight::new(Vec3::X).shared());
    registry.add_light(DirectionalLight::new(Vec3::NEG_Y).shared());
    registry.add_light(PointLight::new(Vec3::Y).shared());

    assert_eq!(registry.count(LightKind::Point), 2);
    assert_eq!(registry.count(LightKind::Directional), 1);
    assert_eq!(registry.count(LightKind::Spot), 0);

    registry.apply_view_transform(&Mat4::IDENTITY);
    registry.update_uniforms(&shader)?;

    assert_eq!(
        uniform(&ctx, &shader, "qrk_pointLightCount"),
        Some(UniformValue::Int(2))
    );
    assert_eq!(
        uniform(&ctx, &shader, "qrk_spotLightCount"),
        Some(UniformValue::Int(0))
    );
    assert_eq!(vec3_uniform(&ctx, &shader, "qrk_pointLights[1].position"), Vec3::Y);
    Ok(())
}

#[test]
fn test_registry_without_view_fails() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut registry = LightRegistry::new();
    registry.add_light(PointLight::new(Vec3::X).shared());

    assert!(matches!(
        registry.update_uniforms(&shader),
        Err(QuarkError::LightViewTransformNotApplied)
    ));
    Ok(())
}

#[test]
fn test_registry_applies_view_source_on_update() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let camera = Rc::new(RefCell::new(Camera::new(Vec3::new(0.0, 0.0, 5.0))));
    let light = PointLight::new(Vec3::ZERO).shared();

    let registry = LightRegistry::shared();
    registry.borrow_mut().add_light(light.clone());
    registry.borrow_mut().set_view_source(camera.clone());
    shader.add_uniform_source(registry.clone());

    shader.update_uniforms()?;
    let expected = camera.borrow().view_transform().transform_point3(Vec3::ZERO);
    let position = vec3_uniform(&ctx, &shader, "qrk_pointLights[0].position");
    assert!(approx(position, expected), "got {position}, expected {expected}");

    // Moving the light between frames is fine with a view source.
    light.borrow_mut().set_position(Vec3::X);
    camera.borrow_mut().set_position(Vec3::new(0.0, 0.0, 10.0));
    shader.update_uniforms()?;
    let expected = camera.borrow().view_transform().transform_point3(Vec3::X);
    let position = vec3_uniform(&ctx, &shader, "qrk_pointLights[0].position");
    assert!(approx(position, expected), "got {position}, expected {expected}");
    Ok(())
}

// ============================================================================
// Cameras & Window
// ============================================================================

#[test]
fn test_camera_sets_view_and_projection() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let mut camera = Camera::new(Vec3::new(0.0, 1.0, 4.0));

    camera.update_uniforms(&shader)?;
    assert_eq!(
        uniform(&ctx, &shader, "view"),
        Some(UniformValue::Mat4(camera.view_transform()))
    );
    assert_eq!(
        uniform(&ctx, &shader, "projection"),
        Some(UniformValue::Mat4(camera.projection_transform()))
    );
    Ok(())
}

#[test]
fn test_shadow_camera_centers_origin() {
    let light = DirectionalLight::new(Vec3::new(-1.0, -1.0, -1.0)).shared();
    let shadow_camera = ShadowCamera::new(light.clone());

    let clip = shadow_camera.light_view_projection() * Vec3::ZERO.extend(1.0);
    assert!(clip.x.abs() < EPSILON && clip.y.abs() < EPSILON);
    assert!((0.0..=1.0).contains(&clip.z), "origin must lie inside the depth range");

    // Straight down is parallel to the default up vector.
    light.borrow_mut().set_direction(Vec3::NEG_Y);
    let matrix = shadow_camera.light_view_projection();
    assert!(matrix.is_finite());
}

#[test]
fn test_window_uniforms() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let window = Rc::new(RefCell::new(WindowUniforms::new(640, 480)));
    shader.add_uniform_source(window.clone());

    window.borrow_mut().set_frame(0.016, 1024, 768);
    shader.update_uniforms()?;

    assert_eq!(
        uniform(&ctx, &shader, "qrk_deltaTime"),
        Some(UniformValue::Float(0.016))
    );
    assert_eq!(
        uniform(&ctx, &shader, "qrk_windowWidth"),
        Some(UniformValue::Int(1024))
    );
    assert!(uniform(&ctx, &shader, "qrk_time").is_some());
    Ok(())
}
