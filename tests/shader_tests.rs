//! Shader Loading Tests
//!
//! Tests for:
//! - `#pragma qrk_include` resolution (built-in and relative)
//! - `#pragma once` across includes and stages
//! - Circular include and extension diagnostics
//! - Program creation and uniform sources
//! - Compute programs and texture dispatches

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use glam::Vec4;
use quark::core::UniformValue;
use quark::errors::ErrorCategory;
use quark::resources::{TextureFormat, TextureParams};
use quark::shader::{ComputeShader, ShaderLoader, ShaderStage};
use quark::{
    Context, ContextSettings, HeadlessBackend, QuarkError, ShaderProgram, ShaderSource, Texture,
    UniformSource,
};

const VERTEX: &str = r"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
";

const FRAGMENT: &str = r"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
";

const COMPUTE: &str = r"
struct Uniforms {
    qrk_tint: vec4<f32>,
};
@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var qrk_output: texture_storage_2d<rgba16float, write>;

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (all(id.xy < textureDimensions(qrk_output))) {
        textureStore(qrk_output, id.xy, u.qrk_tint);
    }
}
";

fn headless() -> Context {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::headless(ContextSettings::default())
}

/// A fresh directory under the system temp dir, populated with `files`.
fn scratch_dir(name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("quark-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    for (path, contents) in files {
        let path = dir.join(path);
        fs::create_dir_all(path.parent().unwrap_or(Path::new("."))).unwrap();
        fs::write(&path, contents).unwrap();
    }
    dir
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

// ============================================================================
// Includes
// ============================================================================

#[test]
fn test_builtin_include() -> anyhow::Result<()> {
    let source = ShaderSource::inline("#pragma qrk_include <common/constants.wgsl>\nfn f() {}\n");
    let code = ShaderLoader::new().load(&source, ShaderStage::Fragment)?;

    assert!(code.contains("const PI"), "constants were not inlined:\n{code}");
    assert!(code.contains("fn f() {}"));
    assert!(!code.contains("#pragma"));
    Ok(())
}

#[test]
fn test_relative_includes_resolve_against_includer() -> anyhow::Result<()> {
    let dir = scratch_dir(
        "relative",
        &[
            ("main.frag", "#pragma qrk_include \"lib/lighting.wgsl\"\nfn main_body() {}\n"),
            ("lib/lighting.wgsl", "#pragma qrk_include \"math.wgsl\"\nfn lighting() {}\n"),
            ("lib/math.wgsl", "fn math() {}\n"),
        ],
    );

    let code = ShaderLoader::new().load(&ShaderSource::path(dir.join("main.frag")), ShaderStage::Fragment)?;
    let math = code.find("fn math()").expect("math included");
    let lighting = code.find("fn lighting()").expect("lighting included");
    let body = code.find("fn main_body()").expect("body kept");
    assert!(math < lighting && lighting < body, "includes are spliced in place");
    Ok(())
}

#[test]
fn test_once_suppresses_repeats_across_stages() -> anyhow::Result<()> {
    let dir = scratch_dir(
        "once",
        &[
            ("shared.wgsl", "#pragma once\nstruct Shared { x: f32, }\n"),
            ("plain.wgsl", "fn plain() {}\n"),
            (
                "a.vert",
                "#pragma qrk_include \"shared.wgsl\"\n#pragma qrk_include \"shared.wgsl\"\n\
                 #pragma qrk_include \"plain.wgsl\"\n",
            ),
            (
                "a.frag",
                "#pragma qrk_include \"shared.wgsl\"\n#pragma qrk_include \"plain.wgsl\"\n",
            ),
        ],
    );

    let mut loader = ShaderLoader::new();
    let vertex = loader.load(&ShaderSource::path(dir.join("a.vert")), ShaderStage::Vertex)?;
    let fragment = loader.load(&ShaderSource::path(dir.join("a.frag")), ShaderStage::Fragment)?;

    assert_eq!(count(&vertex, "struct Shared"), 1);
    assert_eq!(count(&fragment, "struct Shared"), 0, "already emitted by the vertex stage");
    assert_eq!(count(&vertex, "fn plain()"), 1);
    assert_eq!(count(&fragment, "fn plain()"), 1, "files without once repeat");
    Ok(())
}

#[test]
fn test_circular_include_is_reported() {
    let dir = scratch_dir(
        "circular",
        &[
            ("a.wgsl", "#pragma qrk_include \"b.wgsl\"\n"),
            ("b.wgsl", "#pragma qrk_include \"a.wgsl\"\n"),
        ],
    );

    let err = ShaderLoader::new()
        .load(&ShaderSource::path(dir.join("a.wgsl")), ShaderStage::Fragment)
        .unwrap_err();
    match &err {
        QuarkError::CircularInclude { path, traceback } => {
            assert!(path.ends_with("a.wgsl"), "got {}", path.display());
            assert!(traceback.contains("b.wgsl"), "traceback: {traceback}");
        }
        other => panic!("expected a circular include, got {other}"),
    }
    assert_eq!(err.category(), ErrorCategory::Shader);
}

#[test]
fn test_malformed_include() {
    let source = ShaderSource::inline("#pragma qrk_include common/constants.wgsl\n");
    let err = ShaderLoader::new()
        .load(&source, ShaderStage::Vertex)
        .unwrap_err();
    assert!(matches!(err, QuarkError::InvalidInclude { .. }), "got {err}");
}

#[test]
fn test_unknown_pragma_is_dropped() -> anyhow::Result<()> {
    let source = ShaderSource::inline("#pragma optimize(on)\nfn f() {}\n");
    let code = ShaderLoader::new().load(&source, ShaderStage::Vertex)?;
    assert!(!code.contains("optimize"));
    assert!(code.contains("fn f() {}"));
    Ok(())
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_stage_extension_is_checked() {
    let dir = scratch_dir("extension", &[("quad.frag", FRAGMENT)]);

    let err = ShaderLoader::new()
        .load(&ShaderSource::path(dir.join("quad.frag")), ShaderStage::Vertex)
        .unwrap_err();
    match err {
        QuarkError::ShaderExtensionMismatch { stage, expected, .. } => {
            assert_eq!(stage, ShaderStage::Vertex);
            assert_eq!(expected, ".vert");
        }
        other => panic!("expected an extension mismatch, got {other}"),
    }
}

#[test]
fn test_missing_file_reports_io() {
    let dir = scratch_dir("missing", &[("main.frag", "#pragma qrk_include \"gone.wgsl\"\n")]);

    let err = ShaderLoader::new()
        .load(&ShaderSource::path(dir.join("main.frag")), ShaderStage::Fragment)
        .unwrap_err();
    match &err {
        QuarkError::ShaderIo { path, traceback, .. } => {
            assert!(path.ends_with("gone.wgsl"));
            assert!(traceback.contains("main.frag"), "traceback: {traceback}");
        }
        other => panic!("expected an I/O error, got {other}"),
    }
    assert_eq!(err.category(), ErrorCategory::Io);
}

// ============================================================================
// Programs
// ============================================================================

#[test]
fn test_inline_program_links() -> anyhow::Result<()> {
    let ctx = headless();
    let program = ShaderProgram::new(
        &ctx,
        &ShaderSource::inline(VERTEX),
        &ShaderSource::inline(FRAGMENT),
    )?;
    assert_eq!(program.label(), "<inline> + <inline>");

    let registered = ctx
        .inspect(|h: &HeadlessBackend| h.program(program.id()).is_some())
        .expect("headless backend");
    assert!(registered);
    Ok(())
}

#[test]
fn test_missing_entry_point_fails_to_link() {
    let ctx = headless();
    let err = ShaderProgram::new(
        &ctx,
        &ShaderSource::inline(VERTEX),
        &ShaderSource::inline("fn helper() {}\n"),
    )
    .unwrap_err();
    assert!(matches!(err, QuarkError::ShaderLink(_)), "got {err}");
    assert_eq!(err.category(), ErrorCategory::Shader);
}

#[test]
fn test_every_builtin_program_builds() -> anyhow::Result<()> {
    let ctx = headless();
    quark::shader::ScreenShader::new(&ctx)?;
    quark::shader::ScreenLodShader::new(&ctx)?;
    quark::shader::SkyboxShader::new(&ctx)?;
    quark::shader::ShadowMapShader::new(&ctx)?;
    quark::shader::GaussianBlurShader::new(&ctx)?;
    quark::passes::BloomDownsampleShader::new(&ctx)?;
    quark::passes::BloomUpsampleShader::new(&ctx)?;
    quark::passes::EquirectCubemapShader::new(&ctx)?;
    quark::passes::SsaoShader::new(&ctx)?;
    quark::passes::SsaoBlurShader::new(&ctx)?;
    quark::passes::DeferredGeometryPassShader::new(&ctx)?;
    Ok(())
}

#[test]
fn test_pass_programs_deref_to_shader_program() -> anyhow::Result<()> {
    let ctx = headless();
    let equirect = quark::passes::EquirectCubemapShader::new(&ctx)?;
    let program: &ShaderProgram = &equirect;
    assert_eq!(program.label(), "<ibl/cubemap.vert> + <ibl/equirect_cubemap.frag>");

    let registered = ctx
        .inspect(|h: &HeadlessBackend| h.program(equirect.id()).is_some())
        .expect("headless backend");
    assert!(registered);
    Ok(())
}

#[test]
fn test_const_expression_array_lengths_are_reflected() -> anyhow::Result<()> {
    let ctx = headless();
    let fragment = r"
        const KERNEL_SIZE: u32 = 2u * 32u;
        alias Kernel = array<vec4<f32>, KERNEL_SIZE>;
        struct Uniforms { kernel: Kernel, count: i32, };
        @group(0) @binding(0) var<uniform> u: Uniforms;

        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return u.kernel[u.count];
        }
    ";
    let program = ShaderProgram::new(
        &ctx,
        &ShaderSource::inline(VERTEX),
        &ShaderSource::inline(fragment),
    )?;

    let (last, count, size) = ctx
        .inspect(|h: &HeadlessBackend| {
            let reflection = &h.program(program.id()).expect("program").reflection;
            (
                reflection.uniform("kernel[63]").map(|f| f.offset),
                reflection.uniform("count").map(|f| f.offset),
                reflection.uniforms.as_ref().map(|block| block.size),
            )
        })
        .expect("headless backend");
    assert_eq!(last, Some(63 * 16));
    assert_eq!(count, Some(64 * 16));
    assert_eq!(size, Some(64 * 16 + 16));
    Ok(())
}

struct Tint(f32);

impl UniformSource for Tint {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> quark::Result<()> {
        shader.set_float("tint", self.0);
        Ok(())
    }
}

#[test]
fn test_uniform_sources_run_on_update() -> anyhow::Result<()> {
    let ctx = headless();
    let program = ShaderProgram::new(
        &ctx,
        &ShaderSource::inline(VERTEX),
        &ShaderSource::inline(FRAGMENT),
    )?;
    let tint = Rc::new(RefCell::new(Tint(0.25)));
    program.add_uniform_source(tint.clone());

    program.update_uniforms()?;
    let value = ctx
        .inspect(|h: &HeadlessBackend| h.uniform(program.id(), "tint"))
        .flatten();
    assert_eq!(value, Some(UniformValue::Float(0.25)));

    tint.borrow_mut().0 = 0.5;
    program.update_uniforms()?;
    let value = ctx
        .inspect(|h: &HeadlessBackend| h.uniform(program.id(), "tint"))
        .flatten();
    assert_eq!(value, Some(UniformValue::Float(0.5)));
    Ok(())
}

#[test]
fn test_skybox_view_drops_translation() -> anyhow::Result<()> {
    use glam::{Mat4, Vec3};

    let ctx = headless();
    let skybox = quark::shader::SkyboxShader::new(&ctx)?;
    skybox.set_mat4("view", Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));

    let view = ctx
        .inspect(|h: &HeadlessBackend| h.uniform(skybox.id(), "view"))
        .flatten();
    assert_eq!(view, Some(UniformValue::Mat4(Mat4::IDENTITY)));
    Ok(())
}

// ============================================================================
// Compute
// ============================================================================

#[test]
fn test_compute_dispatch_covers_the_texture() -> anyhow::Result<()> {
    let ctx = headless();
    let compute = ComputeShader::new(&ctx, &ShaderSource::inline(COMPUTE))?;
    let texture = Texture::create(&ctx, 100, 64, TextureFormat::Rgba16F, &TextureParams::default())?;

    let tint = Vec4::new(1.0, 0.5, 0.25, 1.0);
    compute.set_vec4("qrk_tint", tint);
    compute.dispatch_to_texture(&texture)?;

    let dispatches = ctx
        .inspect(|h: &HeadlessBackend| h.dispatches().cloned().collect::<Vec<_>>())
        .expect("headless backend");
    assert_eq!(dispatches.len(), 1);
    let dispatch = &dispatches[0];
    assert_eq!(dispatch.program, compute.id());
    assert_eq!(dispatch.texture, texture.id());
    assert_eq!(dispatch.binding, "qrk_output");
    // 100 / 8 rounds up.
    assert_eq!(dispatch.workgroups, [13, 8, 1]);
    assert_eq!(dispatch.uniforms.get("qrk_tint"), Some(&UniformValue::Vec4(tint)));
    Ok(())
}

#[test]
fn test_compute_target_format_must_match() -> anyhow::Result<()> {
    let ctx = headless();
    let compute = ComputeShader::new(&ctx, &ShaderSource::inline(COMPUTE))?;

    let rgb = Texture::create(&ctx, 16, 16, TextureFormat::Rgb16F, &TextureParams::default())?;
    compute.dispatch_to_texture(&rgb)?;

    let bytes = Texture::create(&ctx, 16, 16, TextureFormat::Rgba8, &TextureParams::default())?;
    let err = compute.dispatch_to_texture(&bytes).unwrap_err();
    assert!(matches!(err, QuarkError::InvalidTextureType(_)), "got {err}");

    let dispatched = ctx
        .inspect(|h: &HeadlessBackend| h.dispatches().count())
        .expect("headless backend");
    assert_eq!(dispatched, 1);
    Ok(())
}

#[test]
fn test_compute_programs_need_cs_main() {
    let ctx = headless();
    let err = ComputeShader::new(&ctx, &ShaderSource::inline(FRAGMENT)).unwrap_err();
    assert!(matches!(err, QuarkError::ShaderLink(_)), "got {err}");
}

#[test]
fn test_render_programs_cannot_dispatch() -> anyhow::Result<()> {
    use quark::core::backend::{ProgramKind, ProgramSource, RenderBackend, TextureDescriptor};
    use quark::resources::TextureKind;

    let mut backend = HeadlessBackend::new(8, 8);
    let program = backend.create_program(&ProgramSource {
        label: "quad".into(),
        code: format!("{VERTEX}\n{FRAGMENT}"),
        fragment_offset: VERTEX.len() + 1,
        kind: ProgramKind::Render,
    })?;
    let texture = backend.create_texture(&TextureDescriptor {
        label: "target".into(),
        kind: TextureKind::Texture2D,
        width: 8,
        height: 8,
        num_mips: 1,
        format: TextureFormat::Rgba16F,
        samples: 1,
    })?;

    let err = backend.dispatch_compute(program, texture).unwrap_err();
    assert!(matches!(err, QuarkError::ShaderLink(_)), "got {err}");
    assert_eq!(backend.dispatches().count(), 0);
    Ok(())
}

#[test]
fn test_compute_files_use_the_comp_extension() {
    let dir = scratch_dir("compute", &[("fill.frag", COMPUTE), ("fill.comp", COMPUTE)]);

    let mut loader = ShaderLoader::new();
    assert!(loader.load(&ShaderSource::path(dir.join("fill.comp")), ShaderStage::Compute).is_ok());
    let err = ShaderLoader::new()
        .load(&ShaderSource::path(dir.join("fill.frag")), ShaderStage::Compute)
        .unwrap_err();
    match err {
        QuarkError::ShaderExtensionMismatch { stage, expected, .. } => {
            assert_eq!(stage, ShaderStage::Compute);
            assert_eq!(expected, ".comp");
        }
        other => panic!("expected an extension mismatch, got {other}"),
    }
}
