//! Headless Recording Backend
//!
//! [`HeadlessBackend`] implements [`RenderBackend`] without a GPU. It keeps the
//! full state a GL-style driver would (bound target, viewport, draw buffers,
//! texture units, sampler mip ranges, per-program uniform values) and appends
//! every state-changing call to a command log.
//!
//! Tests drive the engine through a normal [`Context`](super::Context) and then
//! inspect the recorder:
//!
//! ```rust,ignore
//! let ctx = Context::headless(ContextSettings::default());
//! bloom.multipass_draw(&source)?;
//! let draws = ctx.inspect(|h: &HeadlessBackend| h.draws().count()).unwrap();
//! ```
//!
//! Programs are validated the same way as on the GPU backend: their interface
//! is reflected from the WGSL text, and the `vs_main` / `fs_main` (or, for
//! compute programs, `cs_main`) entry points must exist.

use std::any::Any;

use glam::Vec4;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::backend::{
    AttachmentPoint, AttachmentResource, BlendMode, BufferBits, CullMode, DepthState, DrawCall,
    FramebufferId, FramebufferStatus, ProgramId, ProgramKind, ProgramSource, RenderBackend,
    RenderTarget, RenderbufferDescriptor, RenderbufferId, TextureDescriptor, TextureId,
    TextureUpload, UniformValue, VertexArrayDescriptor, VertexArrayId, Viewport, storage_target,
    validate_upload, workgroup_count,
};
use crate::errors::{QuarkError, Result};
use crate::resources::texture::TextureParams;
use crate::shader::reflect::{ProgramReflection, reflect, texture_identifier};
use crate::shader::ShaderStage;

// ============================================================================
// Recorded state
// ============================================================================

/// A texture as seen by the recorder.
#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    pub desc: TextureDescriptor,
    pub params: TextureParams,
    /// Sampled mip range, `None` when unrestricted.
    pub mip_range: Option<(u32, u32)>,
    /// Layers that received data.
    pub uploaded_layers: Vec<u32>,
    pub mip_generations: u32,
}

/// A framebuffer as seen by the recorder.
#[derive(Debug, Clone, Default)]
pub struct HeadlessFramebuffer {
    pub label: String,
    pub samples: u32,
    pub attachments: Vec<(AttachmentPoint, AttachmentResource)>,
    pub draw_buffers: Vec<u32>,
}

/// A linked program and the last value written to each uniform.
#[derive(Debug, Clone)]
pub struct HeadlessProgram {
    pub label: String,
    pub kind: ProgramKind,
    pub reflection: ProgramReflection,
    pub uniforms: FxHashMap<String, UniformValue>,
}

/// A texture read by a draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledTexture {
    /// WGSL identifier of the texture global.
    pub name: String,
    pub unit: u32,
    pub texture: Option<TextureId>,
    pub mip_range: Option<(u32, u32)>,
}

/// Snapshot of the pipeline state at a draw.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub target: RenderTarget,
    pub viewport: Viewport,
    pub blend: BlendMode,
    pub depth: DepthState,
    pub cull: CullMode,
    pub vertex_array: VertexArrayId,
    pub vertex_count: u32,
    pub instances: u32,
    pub textures: Vec<SampledTexture>,
    pub uniforms: FxHashMap<String, UniformValue>,
}

impl DrawRecord {
    /// The texture bound to the sampler with the given (GL-style) name.
    #[must_use]
    pub fn sampled(&self, name: &str) -> Option<&SampledTexture> {
        let ident = texture_identifier(name);
        self.textures.iter().find(|t| t.name == ident)
    }

    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }
}

/// A compute dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub program: ProgramId,
    /// Texture written through the program's storage binding.
    pub texture: TextureId,
    /// WGSL identifier of the storage texture global.
    pub binding: String,
    pub workgroups: [u32; 3],
    pub uniforms: FxHashMap<String, UniformValue>,
}

/// One entry of the command log.
#[derive(Debug, Clone)]
pub enum Command {
    BeginFrame,
    EndFrame,
    BindTarget(RenderTarget),
    SetViewport(Viewport),
    Clear {
        target: RenderTarget,
        bits: BufferBits,
        color: Vec4,
    },
    Blit {
        source: Option<FramebufferId>,
        dest: Option<FramebufferId>,
        bits: BufferBits,
    },
    BindTextureUnit {
        unit: u32,
        texture: TextureId,
    },
    SetMipRange {
        texture: TextureId,
        range: Option<(u32, u32)>,
    },
    GenerateMips(TextureId),
    UseProgram(Option<ProgramId>),
    Draw(Box<DrawRecord>),
    Dispatch(Box<DispatchRecord>),
    PushDebugGroup(String),
    PopDebugGroup,
}

// ============================================================================
// Backend
// ============================================================================

/// A deterministic, GPU-less [`RenderBackend`].
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,

    textures: SlotMap<TextureId, HeadlessTexture>,
    renderbuffers: SlotMap<RenderbufferId, RenderbufferDescriptor>,
    framebuffers: SlotMap<FramebufferId, HeadlessFramebuffer>,
    programs: SlotMap<ProgramId, HeadlessProgram>,
    vertex_arrays: SlotMap<VertexArrayId, VertexArrayDescriptor>,

    target: RenderTarget,
    viewport: Viewport,
    units: FxHashMap<u32, TextureId>,
    active_program: Option<ProgramId>,
    blend: BlendMode,
    depth: DepthState,
    cull: CullMode,
    debug_groups: Vec<String>,

    commands: Vec<Command>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            textures: SlotMap::with_key(),
            renderbuffers: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            target: RenderTarget::Default,
            viewport: Viewport::new(width, height),
            units: FxHashMap::default(),
            active_program: None,
            blend: BlendMode::Disabled,
            depth: DepthState::default(),
            cull: CullMode::None,
            debug_groups: Vec::new(),
            commands: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Every draw, in issue order.
    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw(record) => Some(record.as_ref()),
            _ => None,
        })
    }

    /// Every compute dispatch, in issue order.
    pub fn dispatches(&self) -> impl Iterator<Item = &DispatchRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::Dispatch(record) => Some(record.as_ref()),
            _ => None,
        })
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[must_use]
    pub fn render_target(&self) -> RenderTarget {
        self.target
    }

    #[must_use]
    pub fn active_program(&self) -> Option<ProgramId> {
        self.active_program
    }

    #[must_use]
    pub fn blend_mode(&self) -> BlendMode {
        self.blend
    }

    #[must_use]
    pub fn depth_state(&self) -> DepthState {
        self.depth
    }

    #[must_use]
    pub fn debug_groups(&self) -> &[String] {
        &self.debug_groups
    }

    #[must_use]
    pub fn texture(&self, id: TextureId) -> Option<&HeadlessTexture> {
        self.textures.get(id)
    }

    #[must_use]
    pub fn texture_at_unit(&self, unit: u32) -> Option<TextureId> {
        self.units.get(&unit).copied()
    }

    #[must_use]
    pub fn framebuffer(&self, id: FramebufferId) -> Option<&HeadlessFramebuffer> {
        self.framebuffers.get(id)
    }

    #[must_use]
    pub fn program(&self, id: ProgramId) -> Option<&HeadlessProgram> {
        self.programs.get(id)
    }

    /// Last value written to `name` on `program`.
    #[must_use]
    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs.get(program)?.uniforms.get(name).copied()
    }

    /// Number of live textures, renderbuffers and framebuffers.
    #[must_use]
    pub fn live_resources(&self) -> (usize, usize, usize) {
        (self.textures.len(), self.renderbuffers.len(), self.framebuffers.len())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn resource_size(&self, resource: AttachmentResource) -> Option<(u32, u32, u32)> {
        match resource {
            AttachmentResource::Texture(id) => self
                .textures
                .get(id)
                .map(|t| (t.desc.width, t.desc.height, t.desc.samples)),
            AttachmentResource::Renderbuffer(id) => self
                .renderbuffers
                .get(id)
                .map(|r| (r.width, r.height, r.samples)),
        }
    }

    /// Mip-0 size of a blit endpoint.
    fn target_size(&self, framebuffer: Option<FramebufferId>) -> Result<(u32, u32)> {
        let Some(id) = framebuffer else {
            return Ok((self.width, self.height));
        };
        let fb = self
            .framebuffers
            .get(id)
            .ok_or(QuarkError::UnknownHandle { kind: "framebuffer" })?;
        fb.attachments
            .first()
            .and_then(|(_, resource)| self.resource_size(*resource))
            .map(|(w, h, _)| (w, h))
            .ok_or_else(|| QuarkError::BlitUnsupported("framebuffer has no attachments".into()))
    }

    fn sampled_textures(&self, program: &HeadlessProgram) -> Vec<SampledTexture> {
        program
            .reflection
            .textures
            .iter()
            .map(|binding| {
                let unit = program
                    .uniforms
                    .iter()
                    .find(|(name, _)| texture_identifier(name) == binding.name)
                    .and_then(|(_, value)| value.as_int())
                    .map_or(0, |unit| unit as u32);
                let texture = self.units.get(&unit).copied();
                SampledTexture {
                    name: binding.name.clone(),
                    unit,
                    texture,
                    mip_range: texture
                        .and_then(|id| self.textures.get(id))
                        .and_then(|t| t.mip_range),
                }
            })
            .collect()
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn shutdown(&mut self) {
        self.textures.clear();
        self.renderbuffers.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.vertex_arrays.clear();
        self.units.clear();
        self.active_program = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.commands.push(Command::EndFrame);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn default_target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    // --- textures ------------------------------------------------------------

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId> {
        Ok(self.textures.insert(HeadlessTexture {
            desc: desc.clone(),
            params: TextureParams::default(),
            mip_range: None,
            uploaded_layers: Vec::new(),
            mip_generations: 0,
        }))
    }

    fn upload_texture(&mut self, texture: TextureId, upload: &TextureUpload<'_>) -> Result<()> {
        let entry = self
            .textures
            .get_mut(texture)
            .ok_or(QuarkError::UnknownHandle { kind: "texture" })?;
        validate_upload(&entry.desc, upload)?;
        entry.uploaded_layers.push(upload.layer);
        Ok(())
    }

    fn apply_texture_params(&mut self, texture: TextureId, params: &TextureParams) {
        if let Some(entry) = self.textures.get_mut(texture) {
            entry.params = *params;
        }
    }

    fn set_texture_mip_range(&mut self, texture: TextureId, range: Option<(u32, u32)>) {
        if let Some(entry) = self.textures.get_mut(texture) {
            entry.mip_range = range;
            self.commands.push(Command::SetMipRange { texture, range });
        }
    }

    fn generate_mips(&mut self, texture: TextureId) -> Result<()> {
        let entry = self
            .textures
            .get_mut(texture)
            .ok_or(QuarkError::UnknownHandle { kind: "texture" })?;
        entry.mip_generations += 1;
        self.commands.push(Command::GenerateMips(texture));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
        self.units.retain(|_, bound| *bound != texture);
    }

    fn bind_texture_unit(&mut self, unit: u32, texture: TextureId) {
        self.units.insert(unit, texture);
        self.commands.push(Command::BindTextureUnit { unit, texture });
    }

    // --- renderbuffers -------------------------------------------------------

    fn create_renderbuffer(&mut self, desc: &RenderbufferDescriptor) -> Result<RenderbufferId> {
        Ok(self.renderbuffers.insert(desc.clone()))
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.renderbuffers.remove(renderbuffer);
    }

    // --- framebuffers --------------------------------------------------------

    fn create_framebuffer(&mut self, label: &str, samples: u32) -> Result<FramebufferId> {
        Ok(self.framebuffers.insert(HeadlessFramebuffer {
            label: label.to_string(),
            samples,
            ..HeadlessFramebuffer::default()
        }))
    }

    fn attach(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        resource: AttachmentResource,
    ) -> Result<()> {
        if self.resource_size(resource).is_none() {
            return Err(QuarkError::UnknownHandle { kind: "attachment" });
        }
        let fb = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(QuarkError::UnknownHandle { kind: "framebuffer" })?;
        fb.attachments.retain(|(p, _)| *p != point);
        fb.attachments.push((point, resource));
        Ok(())
    }

    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, buffers: &[u32]) {
        if let Some(fb) = self.framebuffers.get_mut(framebuffer) {
            fb.draw_buffers = buffers.to_vec();
        }
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".into());
        };
        let mut sizes = fb.attachments.iter().map(|(_, r)| self.resource_size(*r));
        let Some(Some(first)) = sizes.next() else {
            return FramebufferStatus::Incomplete("missing attachment".into());
        };
        if sizes.any(|size| size != Some(first)) {
            return FramebufferStatus::Incomplete("attachments differ in size or samples".into());
        }
        let colors = fb
            .attachments
            .iter()
            .filter(|(p, _)| matches!(p, AttachmentPoint::Color(_)))
            .count();
        if fb.draw_buffers.iter().any(|&b| b as usize >= colors) {
            return FramebufferStatus::Incomplete("draw buffer without attachment".into());
        }
        FramebufferStatus::Complete
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
        if matches!(self.target, RenderTarget::Framebuffer { id, .. } if id == framebuffer) {
            self.target = RenderTarget::Default;
        }
    }

    fn bind_render_target(&mut self, target: RenderTarget) {
        self.target = target;
        self.commands.push(Command::BindTarget(target));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(Command::SetViewport(viewport));
    }

    fn clear(&mut self, bits: BufferBits, color: Vec4, _depth: f32, _stencil: u32) {
        self.commands.push(Command::Clear {
            target: self.target,
            bits,
            color,
        });
    }

    fn blit(
        &mut self,
        source: Option<FramebufferId>,
        dest: Option<FramebufferId>,
        bits: BufferBits,
    ) -> Result<()> {
        let source_size = self.target_size(source)?;
        let dest_size = self.target_size(dest)?;
        if bits.intersects(BufferBits::DEPTH | BufferBits::STENCIL) && source_size != dest_size {
            return Err(QuarkError::BlitUnsupported(format!(
                "depth/stencil blits require equal sizes ({source_size:?} vs {dest_size:?})"
            )));
        }
        self.commands.push(Command::Blit { source, dest, bits });
        Ok(())
    }

    // --- fixed-function state ------------------------------------------------

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.depth = state;
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.cull = mode;
    }

    // --- programs ------------------------------------------------------------

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramId> {
        let reflection = reflect(&source.code).map_err(|log| QuarkError::ShaderCompile {
            stage: match source.kind {
                ProgramKind::Render => ShaderStage::Vertex,
                ProgramKind::Compute => ShaderStage::Compute,
            },
            log,
            shader_source: source.code.clone(),
        })?;
        source.check_entry_points(&reflection)?;
        Ok(self.programs.insert(HeadlessProgram {
            label: source.label.clone(),
            kind: source.kind,
            reflection,
            uniforms: FxHashMap::default(),
        }))
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
        if self.active_program == Some(program) {
            self.active_program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if self.active_program != program {
            self.active_program = program;
            self.commands.push(Command::UseProgram(program));
        }
    }

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        if let Some(entry) = self.programs.get_mut(program) {
            entry.uniforms.insert(name.to_string(), value);
        }
    }

    fn dispatch_compute(&mut self, program: ProgramId, texture: TextureId) -> Result<()> {
        let entry = self
            .programs
            .get(program)
            .ok_or(QuarkError::UnknownHandle { kind: "program" })?;
        if entry.kind != ProgramKind::Compute {
            return Err(QuarkError::ShaderLink(format!(
                "'{}' is not a compute program",
                entry.label
            )));
        }
        let desc = &self
            .textures
            .get(texture)
            .ok_or(QuarkError::UnknownHandle { kind: "texture" })?
            .desc;
        let binding = storage_target(&entry.label, &entry.reflection, desc)?;
        let workgroups = workgroup_count(
            desc.width,
            desc.height,
            entry.reflection.workgroup_size.unwrap_or([1, 1, 1]),
        );
        let record = DispatchRecord {
            program,
            texture,
            binding: binding.name.clone(),
            workgroups,
            uniforms: entry.uniforms.clone(),
        };
        log::trace!("Dispatch {workgroups:?} workgroups of '{}'", entry.label);
        self.commands.push(Command::Dispatch(Box::new(record)));
        Ok(())
    }

    // --- geometry ------------------------------------------------------------

    fn create_vertex_array(&mut self, desc: &VertexArrayDescriptor) -> Result<VertexArrayId> {
        Ok(self.vertex_arrays.insert(desc.clone()))
    }

    fn update_instance_data(&mut self, vertex_array: VertexArrayId, data: &[f32]) -> Result<()> {
        let entry = self
            .vertex_arrays
            .get_mut(vertex_array)
            .ok_or(QuarkError::UnknownHandle { kind: "vertex array" })?;
        entry.instance_data = data.to_vec();
        Ok(())
    }

    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.vertex_arrays.remove(vertex_array);
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let program_id = self.active_program.ok_or(QuarkError::NoActiveProgram)?;
        let program = self
            .programs
            .get(program_id)
            .ok_or(QuarkError::UnknownHandle { kind: "program" })?;
        if program.kind == ProgramKind::Compute {
            return Err(QuarkError::ShaderLink(format!(
                "compute program '{}' cannot draw",
                program.label
            )));
        }
        if !self.vertex_arrays.contains_key(call.vertex_array) {
            return Err(QuarkError::UnknownHandle { kind: "vertex array" });
        }
        if let RenderTarget::Framebuffer { id, mip, .. } = self.target {
            let fb = self
                .framebuffers
                .get(id)
                .ok_or(QuarkError::UnknownHandle { kind: "framebuffer" })?;
            // Sampling the mip that is being rendered into is a feedback loop.
            for sampled in self.sampled_textures(program) {
                let Some(texture) = sampled.texture else { continue };
                let targeted = fb
                    .attachments
                    .iter()
                    .any(|(_, r)| *r == AttachmentResource::Texture(texture));
                let mip_visible = sampled.mip_range.is_none_or(|(lo, hi)| (lo..=hi).contains(&mip));
                if targeted && mip_visible {
                    log::warn!(
                        "Draw samples '{}' while rendering into mip {mip} of the same texture",
                        sampled.name
                    );
                }
            }
        }

        let record = DrawRecord {
            program: program_id,
            target: self.target,
            viewport: self.viewport,
            blend: self.blend,
            depth: self.depth,
            cull: self.cull,
            vertex_array: call.vertex_array,
            vertex_count: call.elements.end - call.elements.start,
            instances: call.instances,
            textures: self.sampled_textures(program),
            uniforms: program.uniforms.clone(),
        };
        log::trace!("Draw {} vertices into {:?}", record.vertex_count, record.target);
        self.commands.push(Command::Draw(Box::new(record)));
        Ok(())
    }

    // --- debugging -------------------------------------------------------------

    fn push_debug_group(&mut self, label: &str) {
        self.debug_groups.push(label.to_string());
        self.commands.push(Command::PushDebugGroup(label.to_string()));
    }

    fn pop_debug_group(&mut self) {
        self.debug_groups.pop();
        self.commands.push(Command::PopDebugGroup);
    }
}
