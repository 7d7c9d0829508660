//! Context Tests
//!
//! Tests for:
//! - Frame and debug-group bookkeeping
//! - Fixed-function state tracking
//! - Shutdown semantics
//! - Meshes drawn through the context

use glam::{Mat4, Vec3};
use quark::core::headless::Command;
use quark::core::{BlendMode, DepthFunc, RenderTarget, Viewport};
use quark::errors::ErrorCategory;
use quark::resources::{
    CubeMesh, Mesh, MeshData, PlaneMesh, ScreenQuadMesh, SphereMesh, VertexLayout,
};
use quark::shader::{ScreenShader, SkyboxShader};
use quark::{
    BufferType, Context, ContextSettings, Framebuffer, HeadlessBackend, QuarkError, WgpuBackend,
};

fn headless() -> Context {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::headless(ContextSettings::default())
}

fn commands(ctx: &Context) -> Vec<Command> {
    ctx.inspect(|h: &HeadlessBackend| h.commands().to_vec())
        .expect("headless backend")
}

// ============================================================================
// Frames & Debug Groups
// ============================================================================

#[test]
fn test_frame_brackets_are_recorded() -> anyhow::Result<()> {
    let ctx = headless();
    ctx.begin_frame()?;
    ctx.clear_default();
    ctx.end_frame()?;

    let commands = commands(&ctx);
    assert!(matches!(commands.first(), Some(Command::BeginFrame)));
    assert!(matches!(commands.last(), Some(Command::EndFrame)));
    assert!(commands.iter().any(|c| matches!(
        c,
        Command::Clear {
            target: RenderTarget::Default,
            ..
        }
    )));
    Ok(())
}

#[test]
fn test_debug_groups_nest_and_close() {
    let ctx = headless();
    {
        let _outer = ctx.debug_group("outer");
        {
            let _inner = ctx.debug_group("inner");
            let open = ctx
                .inspect(|h: &HeadlessBackend| h.debug_groups().to_vec())
                .expect("headless backend");
            assert_eq!(open, vec!["outer".to_string(), "inner".to_string()]);
        }
    }
    let open = ctx
        .inspect(|h: &HeadlessBackend| h.debug_groups().len())
        .expect("headless backend");
    assert_eq!(open, 0);
}

#[test]
fn test_debug_group_closes_on_error() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 8, 8)?;
    fb.attach_texture(BufferType::ColorHdr)?;

    let result: quark::Result<()> = (|| {
        let _group = ctx.debug_group("failing");
        fb.activate_at(3, None)?;
        Ok(())
    })();
    assert!(result.is_err());

    let open = ctx
        .inspect(|h: &HeadlessBackend| h.debug_groups().len())
        .expect("headless backend");
    assert_eq!(open, 0);
    Ok(())
}

// ============================================================================
// State
// ============================================================================

#[test]
fn test_blend_and_depth_state_round_trip_through_backend() {
    let ctx = headless();
    ctx.set_blend_mode(BlendMode::Additive);
    ctx.set_depth_func(DepthFunc::LessEqual);

    let (blend, depth) = ctx
        .inspect(|h: &HeadlessBackend| (h.blend_mode(), h.depth_state()))
        .expect("headless backend");
    assert_eq!(blend, BlendMode::Additive);
    assert_eq!(depth.func, DepthFunc::LessEqual);
    assert_eq!(ctx.depth_state(), depth);
}

#[test]
fn test_skybox_draws_with_less_equal_then_restores() -> anyhow::Result<()> {
    let ctx = headless();
    let skybox = SkyboxShader::new(&ctx)?;
    let cube = CubeMesh::new(&ctx, Vec::new())?;

    cube.draw(&skybox, None)?;
    let draw_depth = ctx
        .inspect(|h: &HeadlessBackend| h.draws().last().map(|d| d.depth.func))
        .flatten()
        .expect("draw recorded");
    assert_eq!(draw_depth, DepthFunc::LessEqual);
    assert_eq!(ctx.depth_state().func, DepthFunc::Less);
    Ok(())
}

#[test]
fn test_resize_moves_default_viewport() -> anyhow::Result<()> {
    let ctx = headless();
    ctx.resize(1024, 768);
    assert_eq!(ctx.default_target_size(), (1024, 768));

    let mut fb = Framebuffer::new(&ctx, 16, 16)?;
    fb.attach_texture(BufferType::Color)?;
    fb.activate()?;
    fb.deactivate();

    let viewport = ctx
        .inspect(|h: &HeadlessBackend| h.viewport())
        .expect("headless backend");
    assert_eq!(viewport, Viewport::new(1024, 768));
    Ok(())
}

#[test]
fn test_inspect_requires_matching_backend() {
    let ctx = headless();
    assert_eq!(ctx.backend_name(), "headless");
    assert!(ctx.inspect(|_: &WgpuBackend| ()).is_none());
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_shutdown_is_idempotent_and_blocks_creation() -> anyhow::Result<()> {
    let ctx = headless();
    let fb = Framebuffer::new(&ctx, 8, 8)?;

    ctx.shutdown();
    ctx.shutdown();
    assert!(!ctx.is_active());

    let err = Framebuffer::new(&ctx, 8, 8).unwrap_err();
    assert!(matches!(err, QuarkError::ContextShutdown), "got {err}");
    assert_eq!(err.category(), ErrorCategory::Context);
    assert!(ctx.begin_frame().is_err());

    // Dropping after shutdown must not touch the backend.
    drop(fb);
    let live = ctx
        .inspect(|h: &HeadlessBackend| h.live_resources())
        .expect("headless backend");
    assert_eq!(live, (0, 0, 0));
    Ok(())
}

// ============================================================================
// Meshes
// ============================================================================

#[test]
fn test_primitives_draw_expected_vertex_counts() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;

    ScreenQuadMesh::new(&ctx)?.draw(&shader, None)?;
    CubeMesh::new(&ctx, Vec::new())?.draw(&shader, None)?;
    PlaneMesh::new(&ctx, Vec::new())?.draw(&shader, None)?;

    let counts: Vec<u32> = ctx
        .inspect(|h: &HeadlessBackend| h.draws().map(|d| d.vertex_count).collect())
        .expect("headless backend");
    assert_eq!(counts, vec![6, 36, 6]);
    Ok(())
}

#[test]
fn test_sphere_and_instancing() -> anyhow::Result<()> {
    let ctx = headless();
    let shader = ScreenShader::new(&ctx)?;
    let sphere = SphereMesh::new(&ctx, Vec::new())?;
    sphere.draw(&shader, None)?;

    let (count, instances) = ctx
        .inspect(|h: &HeadlessBackend| h.draws().last().map(|d| (d.vertex_count, d.instances)))
        .flatten()
        .expect("draw recorded");
    assert!(count > 0 && count % 3 == 0, "sphere is a triangle list, got {count}");
    assert_eq!(instances, 1);

    let triangle = MeshData {
        layout: VertexLayout::new().with(3),
        vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        indices: None,
    };
    let mut mesh = Mesh::instanced(&ctx, "triangles", triangle, Vec::new())?;
    let before = ctx
        .inspect(|h: &HeadlessBackend| h.draws().count())
        .expect("headless backend");
    mesh.draw(&shader, None)?;
    let after = ctx
        .inspect(|h: &HeadlessBackend| h.draws().count())
        .expect("headless backend");
    assert_eq!(before, after, "no instances loaded, nothing drawn");

    let models: Vec<Mat4> = (0..4)
        .map(|i| Mat4::from_translation(Vec3::X * i as f32))
        .collect();
    mesh.load_instance_models(&models)?;
    mesh.draw(&shader, None)?;

    let instances = ctx
        .inspect(|h: &HeadlessBackend| h.draws().last().map(|d| d.instances))
        .flatten()
        .expect("draw recorded");
    assert_eq!(instances, 4);
    Ok(())
}
