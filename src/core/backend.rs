//! Render Backend Seam
//!
//! [`RenderBackend`] is the one place where the engine talks to a GPU. Its
//! command set mirrors a GL-style state machine: a bound render
//! target addressed by `(framebuffer, mip, face)`, numbered texture units,
//! programs whose uniforms are written by *name*, and explicit draw-buffer
//! lists. Everything above this trait (framebuffers, the texture registry,
//! uniform sources, multi-pass effects) is backend-agnostic.
//!
//! Two implementations exist:
//!
//! - [`HeadlessBackend`](super::headless::HeadlessBackend): a recorder used by
//!   tests and offline tooling.
//! - [`WgpuBackend`](super::gpu::WgpuBackend): the real renderer.

use std::any::Any;
use std::ops::Range;

use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::errors::{QuarkError, Result};
use crate::resources::texture::{TextureFormat, TextureKind, TextureParams};
use crate::shader::ShaderStage;
use crate::shader::reflect::{ProgramReflection, StorageTextureBinding};

new_key_type! {
    /// Backend handle of a texture.
    pub struct TextureId;
    /// Backend handle of a renderbuffer.
    pub struct RenderbufferId;
    /// Backend handle of a framebuffer.
    pub struct FramebufferId;
    /// Backend handle of a linked shader program.
    pub struct ProgramId;
    /// Backend handle of a vertex array.
    pub struct VertexArrayId;
}

bitflags! {
    /// Buffer planes for clears and blits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BufferBits: u32 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

// ============================================================================
// Resource descriptors
// ============================================================================

/// Storage for a new texture.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: String,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub num_mips: u32,
    pub format: TextureFormat,
    pub samples: u32,
}

/// Texel data handed to [`RenderBackend::upload_texture`].
#[derive(Debug, Clone, Copy)]
pub enum TexelData<'a> {
    U8(&'a [u8]),
    F32(&'a [f32]),
}

/// One image (mip 0 of one layer) to upload.
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    /// Array layer; the cubemap face for cubemaps.
    pub layer: u32,
    pub width: u32,
    pub height: u32,
    /// Channels per texel in `data` (1 to 4).
    pub channels: u8,
    pub data: TexelData<'a>,
}

/// Storage for a new renderbuffer.
#[derive(Debug, Clone)]
pub struct RenderbufferDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub samples: u32,
}

/// Where an attachment is bound on a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

/// What is bound at an attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentResource {
    Texture(TextureId),
    Renderbuffer(RenderbufferId),
}

/// Result of a framebuffer completeness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(String),
}

/// The bound render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTarget {
    /// The window surface (or the offscreen default target).
    #[default]
    Default,
    /// A framebuffer, with every texture attachment retargeted to `mip` and,
    /// for cubemaps, to `face`.
    Framebuffer {
        id: FramebufferId,
        mip: u32,
        face: Option<u32>,
    },
}

/// A pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

// ============================================================================
// Pipeline state
// ============================================================================

/// Color blending applied to draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// `src * alpha + dst * (1 - alpha)`.
    Alpha,
    /// `src + dst`, used by the bloom upsample chain.
    Additive,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthFunc {
    #[default]
    Less,
    LessEqual,
    Always,
}

/// Depth test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub func: DepthFunc,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            func: DepthFunc::Less,
        }
    }
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Back,
    Front,
}

// ============================================================================
// Programs & uniforms
// ============================================================================

/// Pipeline a program is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProgramKind {
    /// `vs_main` + `fs_main`.
    #[default]
    Render,
    /// `cs_main`.
    Compute,
}

/// Preprocessed program text, ready for compilation.
///
/// Both stages of a render program live in one WGSL module: `code` is the
/// vertex-stage text followed by the fragment-stage text. `fragment_offset` is
/// the byte offset at which the fragment part starts, so diagnostics can be
/// attributed to a stage. Compute programs set it to `code.len()`.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub label: String,
    pub code: String,
    pub fragment_offset: usize,
    pub kind: ProgramKind,
}

impl ProgramSource {
    /// Checks that `reflection` has the entry points `kind` needs.
    pub(crate) fn check_entry_points(&self, reflection: &ProgramReflection) -> Result<()> {
        let stages: &[ShaderStage] = match self.kind {
            ProgramKind::Render => &[ShaderStage::Vertex, ShaderStage::Fragment],
            ProgramKind::Compute => &[ShaderStage::Compute],
        };
        for stage in stages {
            if !reflection.has_entry_point(stage.entry_point()) {
                return Err(QuarkError::ShaderLink(format!(
                    "'{}' has no {stage} entry point '{}'",
                    self.label,
                    stage.entry_point()
                )));
            }
        }
        Ok(())
    }
}

/// A value written to a named uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    /// Integer view of the value, used when an int is written to a sampler.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Bool(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::UInt(v) => Some(i64::from(v)),
            _ => None,
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// One float vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Number of `f32` components (1 to 4).
    pub components: u8,
    /// 0 for per-vertex data; non-zero for per-instance data.
    pub instance_divisor: u32,
}

/// Buffers and layout of a vertex array.
#[derive(Debug, Clone, Default)]
pub struct VertexArrayDescriptor {
    pub label: String,
    pub attributes: Vec<VertexAttribute>,
    /// Interleaved per-vertex attributes.
    pub vertex_data: Vec<f32>,
    /// Interleaved per-instance attributes.
    pub instance_data: Vec<f32>,
    pub indices: Option<Vec<u32>>,
}

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

/// A draw of the active program.
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub vertex_array: VertexArrayId,
    pub topology: Topology,
    /// Vertex range, or index range when `indexed`.
    pub elements: Range<u32>,
    pub indexed: bool,
    pub instances: u32,
}

// ============================================================================
// The backend trait
// ============================================================================

/// GPU command interface.
///
/// State commands (bind, viewport, uniforms, blend) never fail: as with GL, a
/// stale handle is ignored. Resource creation and draws return errors.
pub trait RenderBackend {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Releases every resource. Handles become stale.
    fn shutdown(&mut self);

    fn as_any(&self) -> &dyn Any;

    // --- frame -------------------------------------------------------------

    fn begin_frame(&mut self) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;
    fn resize(&mut self, width: u32, height: u32);
    fn default_target_size(&self) -> (u32, u32);

    // --- textures ----------------------------------------------------------

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId>;
    fn upload_texture(&mut self, texture: TextureId, upload: &TextureUpload<'_>) -> Result<()>;
    fn apply_texture_params(&mut self, texture: TextureId, params: &TextureParams);
    /// Restricts the mip levels visible to samplers to `range` (inclusive), or
    /// lifts the restriction with `None`.
    fn set_texture_mip_range(&mut self, texture: TextureId, range: Option<(u32, u32)>);
    fn generate_mips(&mut self, texture: TextureId) -> Result<()>;
    fn destroy_texture(&mut self, texture: TextureId);
    fn bind_texture_unit(&mut self, unit: u32, texture: TextureId);

    // --- renderbuffers -----------------------------------------------------

    fn create_renderbuffer(&mut self, desc: &RenderbufferDescriptor) -> Result<RenderbufferId>;
    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    // --- framebuffers ------------------------------------------------------

    fn create_framebuffer(&mut self, label: &str, samples: u32) -> Result<FramebufferId>;
    fn attach(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        resource: AttachmentResource,
    ) -> Result<()>;
    /// Sets which color attachments receive fragment outputs, in output order.
    /// An empty list disables color output.
    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, buffers: &[u32]);
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn bind_render_target(&mut self, target: RenderTarget);
    fn set_viewport(&mut self, viewport: Viewport);
    fn clear(&mut self, bits: BufferBits, color: Vec4, depth: f32, stencil: u32);
    /// Copies mip 0 of `bits` from `source` to `dest` (`None` is the default target).
    fn blit(
        &mut self,
        source: Option<FramebufferId>,
        dest: Option<FramebufferId>,
        bits: BufferBits,
    ) -> Result<()>;

    // --- fixed-function state ---------------------------------------------

    fn set_blend_mode(&mut self, mode: BlendMode);
    fn set_depth_state(&mut self, state: DepthState);
    fn set_cull_mode(&mut self, mode: CullMode);

    // --- programs ------------------------------------------------------------

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId>;
    fn destroy_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue);
    /// Runs a compute program once per texel of mip 0 of `texture`, which is
    /// bound to the program's storage texture. Later commands see the writes.
    fn dispatch_compute(&mut self, program: ProgramId, texture: TextureId) -> Result<()>;

    // --- geometry ------------------------------------------------------------

    fn create_vertex_array(&mut self, desc: &VertexArrayDescriptor) -> Result<VertexArrayId>;
    fn update_instance_data(&mut self, vertex_array: VertexArrayId, data: &[f32]) -> Result<()>;
    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayId);
    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    // --- debugging -----------------------------------------------------------

    fn push_debug_group(&mut self, label: &str);
    fn pop_debug_group(&mut self);
}

/// Draw-buffer list for `count` color attachments: `[0, 1, .., count - 1]`.
#[must_use]
pub fn sequential_draw_buffers(count: u32) -> SmallVec<[u32; 4]> {
    (0..count).collect()
}

/// Workgroups covering a `width × height` grid.
#[must_use]
pub fn workgroup_count(width: u32, height: u32, workgroup_size: [u32; 3]) -> [u32; 3] {
    [
        width.div_ceil(workgroup_size[0].max(1)),
        height.div_ceil(workgroup_size[1].max(1)),
        1,
    ]
}

/// The storage binding `texture` is written through by a dispatch of the
/// program described by `reflection`.
pub(crate) fn storage_target<'a>(
    label: &str,
    reflection: &'a ProgramReflection,
    texture: &TextureDescriptor,
) -> Result<&'a StorageTextureBinding> {
    let Some(binding) = reflection.storage_textures.first() else {
        return Err(QuarkError::ShaderLink(format!("'{label}' has no storage texture")));
    };
    if texture.kind != TextureKind::Texture2D || texture.samples > 1 {
        return Err(QuarkError::InvalidTextureType(format!(
            "'{}' must be a single-sampled 2D texture to be written by '{label}'",
            texture.label
        )));
    }
    if texture.format.padded() != binding.format {
        return Err(QuarkError::InvalidTextureType(format!(
            "'{}' is {:?} but '{}' of '{label}' is {:?}",
            texture.label, texture.format, binding.name, binding.format
        )));
    }
    Ok(binding)
}

/// Checks an upload against the texture it targets.
pub(crate) fn validate_upload(desc: &TextureDescriptor, upload: &TextureUpload<'_>) -> Result<()> {
    let layers = match desc.kind {
        TextureKind::Texture2D => 1,
        TextureKind::Cubemap => 6,
    };
    if upload.layer >= layers {
        return Err(QuarkError::InvalidTextureArgument(format!(
            "layer {} out of range for '{}' ({layers} layers)",
            upload.layer, desc.label
        )));
    }
    if upload.width != desc.width || upload.height != desc.height {
        return Err(QuarkError::InvalidTextureSize(format!(
            "upload of {}x{} does not match '{}' ({}x{})",
            upload.width, upload.height, desc.label, desc.width, desc.height
        )));
    }
    if !(1..=4).contains(&upload.channels) {
        return Err(QuarkError::InvalidTextureArgument(format!(
            "unsupported channel count {}",
            upload.channels
        )));
    }
    let expected = (upload.width * upload.height) as usize * usize::from(upload.channels);
    let actual = match upload.data {
        TexelData::U8(data) => data.len(),
        TexelData::F32(data) => data.len(),
    };
    if actual != expected {
        return Err(QuarkError::InvalidTextureArgument(format!(
            "invalid data size: expected {expected} components, got {actual}"
        )));
    }
    Ok(())
}
