//! Shader Programs & Uniform Sources
//!
//! A [`ShaderProgram`] is a linked GPU program built from a vertex and a
//! fragment [`ShaderSource`], or from a single compute stage (see
//! [`ComputeShader`]). Uniforms are addressed by name and every setter
//! activates the program first, so callers never need an explicit
//! activate-then-set sequence.
//!
//! Objects that own shader inputs (cameras, lights, the texture registry,
//! shadow maps) implement [`UniformSource`] and are registered on the program.
//! [`ShaderProgram::update_uniforms`] then asks each of them, in registration
//! order, to push its current values:
//!
//! ```rust,ignore
//! let shader = ShaderProgram::new(&ctx, &ShaderSource::path("lit.vert"), &ShaderSource::path("lit.frag"))?;
//! shader.add_uniform_source(camera.clone());
//! shader.add_uniform_source(lights.clone());
//! shader.add_uniform_source(registry.clone());
//!
//! shader.update_uniforms()?;
//! mesh.draw(&shader, Some(&mut registry.borrow_mut()))?;
//! ```

pub mod builtin;
pub mod compute;
pub mod loader;
pub mod primitives;
pub mod reflect;

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::core::backend::{DepthFunc, ProgramId, ProgramKind, ProgramSource, UniformValue};
use crate::core::Context;
use crate::errors::Result;

pub use compute::ComputeShader;
pub use loader::ShaderLoader;
pub use primitives::{
    GaussianBlurShader, ScreenLodShader, ScreenShader, ShadowMapShader, SkyboxShader,
};

/// A programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// File extension a stage-specific shader file must carry.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => ".vert",
            Self::Fragment => ".frag",
            Self::Compute => ".comp",
        }
    }

    /// WGSL entry point of the stage.
    #[must_use]
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "vs_main",
            Self::Fragment => "fs_main",
            Self::Compute => "cs_main",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "VERTEX",
            Self::Fragment => "FRAGMENT",
            Self::Compute => "COMPUTE",
        })
    }
}

/// Where shader text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// Source text given directly.
    Inline(Cow<'static, str>),
    /// A file on disk.
    Path(PathBuf),
    /// A shader shipped with the engine, e.g. `"builtin/skybox.vert"`.
    Builtin(Cow<'static, str>),
}

impl ShaderSource {
    pub fn inline(code: impl Into<Cow<'static, str>>) -> Self {
        Self::Inline(code.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn builtin(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Builtin(name.into())
    }

    #[must_use]
    pub fn is_path(&self) -> bool {
        !matches!(self, Self::Inline(_))
    }
}

bitflags! {
    /// Special behaviors of a program.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ProgramFlags: u32 {
        /// Drop the translation of the `view` matrix (skyboxes follow the camera).
        const SKYBOX_VIEW  = 1 << 0;
        /// Use `LessEqual` depth testing while the program is active.
        const DEPTH_LEQUAL = 1 << 1;
    }
}

/// Something that pushes named uniform values into a shader.
pub trait UniformSource {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()>;
}

/// Something that binds textures to units and points sampler uniforms at them.
pub trait TextureSource {
    /// Binds one or more textures starting at `next_texture_unit` and returns
    /// the next unit that is still free.
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32>;
}

/// Shared handle under which uniform sources are registered.
pub type SharedUniformSource = Rc<RefCell<dyn UniformSource>>;

/// A linked vertex + fragment program.
pub struct ShaderProgram {
    ctx: Context,
    id: ProgramId,
    label: String,
    flags: ProgramFlags,
    uniform_sources: RefCell<Vec<SharedUniformSource>>,
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("label", &self.label)
            .field("flags", &self.flags)
            .field("uniform_sources", &self.uniform_sources.borrow().len())
            .finish_non_exhaustive()
    }
}

impl ShaderProgram {
    pub fn new(ctx: &Context, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<Self> {
        Self::with_flags(ctx, vertex, fragment, ProgramFlags::empty())
    }

    /// Loads, preprocesses, compiles and links both stages.
    pub fn with_flags(
        ctx: &Context,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        flags: ProgramFlags,
    ) -> Result<Self> {
        let mut loader = ShaderLoader::new();
        let vertex_code = loader.load(vertex, ShaderStage::Vertex)?;
        let fragment_code = loader.load(fragment, ShaderStage::Fragment)?;

        let label = program_label(vertex, fragment);
        let mut code = vertex_code;
        code.push('\n');
        let fragment_offset = code.len();
        code.push_str(&fragment_code);

        let source = ProgramSource {
            label: label.clone(),
            code,
            fragment_offset,
            kind: ProgramKind::Render,
        };
        let id = ctx.create(|b| b.create_program(&source))?;
        log::debug!("Linked shader program '{label}'");

        Ok(Self::from_parts(ctx, id, label, flags))
    }

    /// Loads, preprocesses and compiles a compute stage.
    pub fn compute(ctx: &Context, compute: &ShaderSource) -> Result<Self> {
        let code = ShaderLoader::new().load(compute, ShaderStage::Compute)?;
        let label = describe_source(compute);
        let source = ProgramSource {
            label: label.clone(),
            fragment_offset: code.len(),
            code,
            kind: ProgramKind::Compute,
        };
        let id = ctx.create(|b| b.create_program(&source))?;
        log::debug!("Compiled compute program '{label}'");

        Ok(Self::from_parts(ctx, id, label, ProgramFlags::empty()))
    }

    fn from_parts(ctx: &Context, id: ProgramId, label: String, flags: ProgramFlags) -> Self {
        Self {
            ctx: ctx.clone(),
            id,
            label,
            flags,
            uniform_sources: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn flags(&self) -> ProgramFlags {
        self.flags
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Makes this the active program.
    pub fn activate(&self) {
        if self.flags.contains(ProgramFlags::DEPTH_LEQUAL) {
            self.ctx.set_depth_func(DepthFunc::LessEqual);
        }
        let id = self.id;
        self.ctx.command(|b| b.use_program(Some(id)));
    }

    pub fn deactivate(&self) {
        self.ctx.command(|b| b.use_program(None));
        if self.flags.contains(ProgramFlags::DEPTH_LEQUAL) {
            self.ctx.set_depth_func(DepthFunc::Less);
        }
    }

    // ------------------------------------------------------------------------
    // Uniform sources
    // ------------------------------------------------------------------------

    pub fn add_uniform_source<S: UniformSource + 'static>(&self, source: Rc<RefCell<S>>) {
        self.uniform_sources.borrow_mut().push(source);
    }

    pub fn add_shared_uniform_source(&self, source: SharedUniformSource) {
        self.uniform_sources.borrow_mut().push(source);
    }

    /// Sets `qrk_time`, then lets every registered source push its uniforms.
    pub fn update_uniforms(&self) -> Result<()> {
        self.set_float("qrk_time", self.ctx.time());

        let sources = self.uniform_sources.borrow().clone();
        for source in sources {
            source.borrow_mut().update_uniforms(self)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------------

    pub fn set_uniform(&self, name: &str, value: UniformValue) {
        self.activate();
        let id = self.id;
        self.ctx.command(|b| b.set_uniform(id, name, value));
    }

    pub fn set_bool(&self, name: &str, value: bool) {
        self.set_uniform(name, UniformValue::Bool(value));
    }

    pub fn set_int(&self, name: &str, value: i32) {
        self.set_uniform(name, UniformValue::Int(value));
    }

    pub fn set_uint(&self, name: &str, value: u32) {
        self.set_uniform(name, UniformValue::UInt(value));
    }

    pub fn set_float(&self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    pub fn set_vec2(&self, name: &str, value: Vec2) {
        self.set_uniform(name, UniformValue::Vec2(value));
    }

    pub fn set_vec3(&self, name: &str, value: Vec3) {
        self.set_uniform(name, UniformValue::Vec3(value));
    }

    pub fn set_vec4(&self, name: &str, value: Vec4) {
        self.set_uniform(name, UniformValue::Vec4(value));
    }

    pub fn set_mat3(&self, name: &str, value: Mat3) {
        self.set_uniform(name, UniformValue::Mat3(value));
    }

    pub fn set_mat4(&self, name: &str, value: Mat4) {
        let value = if name == "view" && self.flags.contains(ProgramFlags::SKYBOX_VIEW) {
            Mat4::from_mat3(Mat3::from_mat4(value))
        } else {
            value
        };
        self.set_uniform(name, UniformValue::Mat4(value));
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if self.ctx.is_active() {
            let id = self.id;
            self.ctx.command(|b| b.destroy_program(id));
        }
    }
}

fn describe_source(source: &ShaderSource) -> String {
    match source {
        ShaderSource::Inline(_) => "<inline>".to_string(),
        ShaderSource::Path(path) => path.display().to_string(),
        ShaderSource::Builtin(name) => format!("<{name}>"),
    }
}

fn program_label(vertex: &ShaderSource, fragment: &ShaderSource) -> String {
    format!("{} + {}", describe_source(vertex), describe_source(fragment))
}
