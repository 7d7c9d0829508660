//! wgpu Backend
//!
//! [`WgpuBackend`] implements the GL-style [`RenderBackend`] command set on top
//! of wgpu:
//!
//! - **Targets**: the bound `(framebuffer, mip, face)` is resolved into
//!   texture views when a pass is recorded. Every draw and clear records its
//!   own render pass that loads and stores the attachments.
//! - **Uniforms**: see [`uniforms`]. Each program has one uniform block at
//!   `@group(0) @binding(0)`; values are snapshotted per draw.
//! - **Texture units**: sampler uniforms select a unit; the texture bound to
//!   that unit is bound at `@group(1)` together with a sampler derived from the
//!   texture's parameters. Unbound or mismatched bindings read a 1×1 black
//!   texture.
//! - **Compute**: a dispatch records its own compute pass; the target texture
//!   is bound to the program's storage texture next to its sampled textures.
//! - **Submission**: commands go into one encoder that is submitted at
//!   [`end_frame`](RenderBackend::end_frame), when the uniform arena fills up,
//!   and before queue writes that must not overtake recorded commands.
//!
//! The viewport origin is the top-left corner of the target.

mod blit;
mod format;
mod pipeline;
mod uniforms;

use std::any::Any;

use glam::Vec4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use self::blit::Blitter;
use self::format::{SamplerKey, SamplerUse, bytes_per_texel, encode_texels, wgpu_format};
use self::pipeline::{GpuProgram, PipelineCache, PipelineKey};
use self::uniforms::{UniformArena, write_field};
use super::backend::{
    AttachmentPoint, AttachmentResource, BlendMode, BufferBits, CullMode, DepthState, DrawCall,
    FramebufferId, FramebufferStatus, ProgramId, ProgramSource, RenderBackend, RenderTarget,
    RenderbufferDescriptor, RenderbufferId, TextureDescriptor, TextureId, TextureUpload,
    UniformValue, VertexArrayDescriptor, VertexArrayId, Viewport, storage_target,
    validate_upload, workgroup_count,
};
use crate::errors::{QuarkError, Result};
use crate::resources::texture::{TextureKind, TextureParams, calculate_mip_level};
use crate::settings::ContextSettings;
use crate::shader::reflect::{TextureBinding, TextureSampleKind, TextureShape};

const RESOURCE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT);

/// Usage of a texture created through [`RenderBackend::create_texture`].
fn texture_usage(format: wgpu::TextureFormat, samples: u32) -> wgpu::TextureUsages {
    let storage = samples == 1
        && matches!(
            format,
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba16Float
        );
    if storage {
        RESOURCE_USAGE | wgpu::TextureUsages::STORAGE_BINDING
    } else {
        RESOURCE_USAGE
    }
}

// ============================================================================
// Resources
// ============================================================================

struct GpuTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
    params: TextureParams,
    mip_range: Option<(u32, u32)>,
}

#[derive(Default)]
struct GpuFramebuffer {
    samples: u32,
    attachments: Vec<(AttachmentPoint, AttachmentResource)>,
    draw_buffers: Vec<u32>,
}

struct GpuVertexArray {
    desc: VertexArrayDescriptor,
    vertex_buffer: Option<wgpu::Buffer>,
    instance_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    frame: Option<wgpu::SurfaceTexture>,
    /// Set when the acquired frame was suboptimal.
    reconfigure: bool,
}

/// Views of the bound target for one render pass.
struct ResolvedTarget {
    /// One entry per draw buffer.
    colors: SmallVec<[(wgpu::TextureView, wgpu::TextureFormat); 4]>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    samples: u32,
    size: (u32, u32),
}

/// Texture views a blit reads from or writes to.
struct BlitEndpoint {
    color: Option<(wgpu::TextureView, wgpu::TextureFormat, bool)>,
    depth: Option<(wgpu::Texture, wgpu::TextureFormat)>,
    samples: u32,
    size: (u32, u32),
}

struct Fallbacks {
    d2: wgpu::TextureView,
    cube: wgpu::TextureView,
    depth: wgpu::TextureView,
}

// ============================================================================
// Backend
// ============================================================================

/// [`RenderBackend`] that renders through wgpu, to a window surface or to an
/// offscreen default target.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<SurfaceState>,
    /// Default color target when there is no surface.
    offscreen: Option<wgpu::Texture>,
    default_depth: wgpu::Texture,
    depth_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    clamp_to_border: bool,

    textures: SlotMap<TextureId, GpuTexture>,
    renderbuffers: SlotMap<RenderbufferId, wgpu::Texture>,
    framebuffers: SlotMap<FramebufferId, GpuFramebuffer>,
    programs: SlotMap<ProgramId, GpuProgram>,
    vertex_arrays: SlotMap<VertexArrayId, GpuVertexArray>,

    encoder: Option<wgpu::CommandEncoder>,
    arena: UniformArena,
    pipelines: PipelineCache,
    samplers: FxHashMap<SamplerKey, wgpu::Sampler>,
    blitter: Blitter,
    fallbacks: Fallbacks,
    empty_buffer: wgpu::Buffer,

    target: RenderTarget,
    viewport: Viewport,
    units: FxHashMap<u32, TextureId>,
    active_program: Option<ProgramId>,
    blend: BlendMode,
    depth: DepthState,
    cull: CullMode,
    debug_groups: Vec<String>,
}

impl WgpuBackend {
    /// Creates a backend presenting to `window`.
    pub async fn new<W>(window: W, settings: &ContextSettings) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window)?;
        Self::bring_up(&instance, Some(surface), settings).await
    }

    /// Creates a backend whose default target is an offscreen texture of
    /// `settings.width × settings.height`.
    pub async fn offscreen(settings: &ContextSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        Self::bring_up(&instance, None, settings).await
    }

    async fn bring_up(
        instance: &wgpu::Instance,
        surface: Option<wgpu::Surface<'static>>,
        settings: &ContextSettings,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| QuarkError::AdapterRequestFailed(e.to_string()))?;

        let optional = wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let required_features = settings.required_features | (adapter.features() & optional);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let width = settings.width.max(1);
        let height = settings.height.max(1);

        let surface = match surface {
            Some(surface) => {
                let mut config = surface
                    .get_default_config(&adapter, width, height)
                    .ok_or_else(|| {
                        QuarkError::SurfaceError("Surface not supported by adapter".to_string())
                    })?;
                config.present_mode = if settings.vsync {
                    wgpu::PresentMode::AutoVsync
                } else {
                    wgpu::PresentMode::AutoNoVsync
                };
                surface.configure(&device, &config);
                Some(SurfaceState {
                    surface,
                    config,
                    frame: None,
                    reconfigure: false,
                })
            }
            None => None,
        };
        let offscreen = surface
            .is_none()
            .then(|| create_offscreen_color(&device, width, height));

        let depth_format = if settings.stencil {
            wgpu::TextureFormat::Depth24PlusStencil8
        } else {
            wgpu::TextureFormat::Depth32Float
        };
        let default_depth = create_default_depth(&device, depth_format, width, height);

        log::info!(
            "wgpu backend on '{}' ({:?}), {}",
            adapter.get_info().name,
            adapter.get_info().backend,
            if surface.is_some() { "windowed" } else { "offscreen" }
        );

        Ok(Self {
            arena: UniformArena::new(&device, settings.uniform_arena_size),
            blitter: Blitter::new(&device),
            fallbacks: create_fallbacks(&device),
            empty_buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Quark Empty Vertex Buffer"),
                size: 16,
                usage: wgpu::BufferUsages::VERTEX,
                mapped_at_creation: false,
            }),
            clamp_to_border: device.features().contains(optional),
            device,
            queue,
            surface,
            offscreen,
            default_depth,
            depth_format,
            width,
            height,
            textures: SlotMap::with_key(),
            renderbuffers: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            encoder: None,
            pipelines: PipelineCache::default(),
            samplers: FxHashMap::default(),
            target: RenderTarget::Default,
            viewport: Viewport::new(width, height),
            units: FxHashMap::default(),
            active_program: None,
            blend: BlendMode::Disabled,
            depth: DepthState::default(),
            cull: CullMode::None,
            debug_groups: Vec::new(),
        })
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The offscreen default target, when there is no window surface.
    #[must_use]
    pub fn offscreen_target(&self) -> Option<&wgpu::Texture> {
        self.offscreen.as_ref()
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        if let Some(encoder) = self.encoder.take() {
            return encoder;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Quark Encoder"),
            });
        for label in &self.debug_groups {
            encoder.push_debug_group(label);
        }
        encoder
    }

    /// Submits everything recorded so far.
    fn flush(&mut self) {
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };
        for _ in &self.debug_groups {
            encoder.pop_debug_group();
        }
        self.arena.flush(&self.queue);
        self.queue.submit(Some(encoder.finish()));
    }

    // ------------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------------

    fn acquire_frame(&mut self) -> Result<()> {
        let Some(state) = self.surface.as_mut() else {
            return Ok(());
        };
        if state.frame.is_some() {
            return Ok(());
        }
        let frame = match state.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(frame) => frame,
            wgpu::CurrentSurfaceTexture::Suboptimal(frame) => {
                log::debug!("Surface is suboptimal, reconfiguring after this frame");
                state.reconfigure = true;
                frame
            }
            wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
                state.surface.configure(&self.device, &state.config);
                match state.surface.get_current_texture() {
                    wgpu::CurrentSurfaceTexture::Success(frame)
                    | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => frame,
                    other => return Err(surface_error(&other)),
                }
            }
            other => return Err(surface_error(&other)),
        };
        state.frame = Some(frame);
        Ok(())
    }

    fn default_color(&mut self) -> Result<(wgpu::TextureView, wgpu::TextureFormat)> {
        self.acquire_frame()?;
        if let Some(frame) = self.surface.as_ref().and_then(|s| s.frame.as_ref()) {
            let view = frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            return Ok((view, frame.texture.format()));
        }
        let texture = self
            .offscreen
            .as_ref()
            .ok_or_else(|| QuarkError::SurfaceError("no default color target".into()))?;
        Ok((
            texture.create_view(&wgpu::TextureViewDescriptor::default()),
            texture.format(),
        ))
    }

    fn attachment_texture(&self, resource: AttachmentResource) -> Result<(&wgpu::Texture, u32)> {
        match resource {
            AttachmentResource::Texture(id) => self
                .textures
                .get(id)
                .map(|t| (&t.texture, t.desc.num_mips))
                .ok_or(QuarkError::UnknownHandle { kind: "texture" }),
            AttachmentResource::Renderbuffer(id) => self
                .renderbuffers
                .get(id)
                .map(|texture| (texture, 1))
                .ok_or(QuarkError::UnknownHandle { kind: "renderbuffer" }),
        }
    }

    /// View of one attachment at `mip` / `face`.
    fn attachment_view(
        &self,
        resource: AttachmentResource,
        mip: u32,
        face: Option<u32>,
    ) -> Result<(wgpu::TextureView, wgpu::TextureFormat)> {
        let (texture, num_mips) = self.attachment_texture(resource)?;
        if mip >= num_mips {
            return Err(QuarkError::MipLevelOutOfRange {
                level: mip,
                num_mips,
            });
        }
        let layer = if texture.depth_or_array_layers() == 6 {
            face.unwrap_or(0)
        } else {
            0
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Quark Attachment"),
            format: None,
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: layer,
            array_layer_count: Some(1),
            usage: None,
        });
        Ok((view, texture.format()))
    }

    fn resolve_target(&mut self) -> Result<ResolvedTarget> {
        let RenderTarget::Framebuffer { id, mip, face } = self.target else {
            let color = self.default_color()?;
            let depth = self
                .default_depth
                .create_view(&wgpu::TextureViewDescriptor::default());
            return Ok(ResolvedTarget {
                colors: SmallVec::from_iter([color]),
                depth: Some((depth, self.depth_format)),
                samples: 1,
                size: (self.width, self.height),
            });
        };

        let fb = self
            .framebuffers
            .get(id)
            .ok_or(QuarkError::UnknownHandle { kind: "framebuffer" })?;
        let mut colors = SmallVec::new();
        for &index in &fb.draw_buffers {
            let resource = fb
                .attachments
                .iter()
                .find(|(p, _)| *p == AttachmentPoint::Color(index))
                .map(|(_, r)| *r)
                .ok_or_else(|| {
                    QuarkError::FramebufferIncomplete(format!("draw buffer {index} has no attachment"))
                })?;
            colors.push(self.attachment_view(resource, mip, face)?);
        }
        let depth = fb
            .attachments
            .iter()
            .find(|(p, _)| !matches!(p, AttachmentPoint::Color(_)))
            .map(|(_, r)| self.attachment_view(*r, 0, face))
            .transpose()?;

        let (_, first) = fb
            .attachments
            .first()
            .ok_or_else(|| QuarkError::FramebufferIncomplete("missing attachment".into()))?;
        let (texture, _) = self.attachment_texture(*first)?;
        let size = calculate_mip_level(texture.width(), texture.height(), mip);
        Ok(ResolvedTarget {
            colors,
            depth,
            samples: fb.samples.max(1),
            size: (size.width, size.height),
        })
    }

    /// The viewport clipped to the target, or `None` when nothing is visible.
    fn clipped_viewport(&self, size: (u32, u32)) -> Option<(f32, f32, f32, f32)> {
        let x = self.viewport.x.clamp(0, size.0 as i32) as u32;
        let y = self.viewport.y.clamp(0, size.1 as i32) as u32;
        let width = self.viewport.width.min(size.0 - x);
        let height = self.viewport.height.min(size.1 - y);
        (width > 0 && height > 0).then_some((x as f32, y as f32, width as f32, height as f32))
    }

    fn blit_endpoint(&mut self, framebuffer: Option<FramebufferId>) -> Result<BlitEndpoint> {
        let Some(id) = framebuffer else {
            let surface = self.surface.is_some();
            let (view, format) = self.default_color()?;
            return Ok(BlitEndpoint {
                color: Some((view, format, surface)),
                depth: Some((self.default_depth.clone(), self.depth_format)),
                samples: 1,
                size: (self.width, self.height),
            });
        };
        let fb = self
            .framebuffers
            .get(id)
            .ok_or(QuarkError::UnknownHandle { kind: "framebuffer" })?;
        let color = fb
            .attachments
            .iter()
            .find(|(p, _)| *p == AttachmentPoint::Color(0))
            .map(|(_, r)| self.attachment_view(*r, 0, None))
            .transpose()?
            .map(|(view, format)| (view, format, false));
        let depth = fb
            .attachments
            .iter()
            .find(|(p, _)| !matches!(p, AttachmentPoint::Color(_)))
            .map(|(_, r)| self.attachment_texture(*r).map(|(t, _)| (t.clone(), t.format())))
            .transpose()?;
        let (texture, _) = fb
            .attachments
            .first()
            .map(|(_, r)| self.attachment_texture(*r))
            .transpose()?
            .ok_or_else(|| QuarkError::BlitUnsupported("framebuffer has no attachments".into()))?;
        Ok(BlitEndpoint {
            color,
            depth,
            samples: fb.samples.max(1),
            size: (texture.width(), texture.height()),
        })
    }

    // ------------------------------------------------------------------------
    // Texture bindings
    // ------------------------------------------------------------------------

    fn sampler(&mut self, key: SamplerKey) -> wgpu::Sampler {
        let device = &self.device;
        self.samplers
            .entry(key)
            .or_insert_with(|| device.create_sampler(&key.descriptor()))
            .clone()
    }

    /// View and sampler for one texture global of the active program.
    fn binding_resources(
        &mut self,
        binding: &TextureBinding,
        unit: u32,
    ) -> Result<(wgpu::TextureView, Option<wgpu::Sampler>)> {
        let usage = if binding.comparison {
            SamplerUse::Comparison
        } else if binding.sample == TextureSampleKind::Depth || binding.multisampled {
            SamplerUse::NonFiltering
        } else {
            SamplerUse::Filtering
        };

        let bound = self
            .units
            .get(&unit)
            .and_then(|id| self.textures.get(*id))
            .filter(|t| texture_fits_binding(t, binding));

        let (view, params) = match bound {
            Some(entry) => {
                let (base, count) = match entry.mip_range {
                    Some((lo, hi)) => {
                        let lo = lo.min(entry.desc.num_mips - 1);
                        (lo, hi.clamp(lo, entry.desc.num_mips - 1) - lo + 1)
                    }
                    None => (0, entry.desc.num_mips),
                };
                let depth_only = binding.sample == TextureSampleKind::Depth
                    && entry.texture.format().has_stencil_aspect();
                let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&entry.desc.label),
                    format: None,
                    dimension: Some(match binding.shape {
                        TextureShape::D2 => wgpu::TextureViewDimension::D2,
                        TextureShape::Cube => wgpu::TextureViewDimension::Cube,
                    }),
                    aspect: if depth_only {
                        wgpu::TextureAspect::DepthOnly
                    } else {
                        wgpu::TextureAspect::All
                    },
                    base_mip_level: base,
                    mip_level_count: Some(count),
                    base_array_layer: 0,
                    array_layer_count: Some(match binding.shape {
                        TextureShape::D2 => 1,
                        TextureShape::Cube => 6,
                    }),
                    usage: Some(wgpu::TextureUsages::TEXTURE_BINDING),
                });
                (view, entry.params)
            }
            None => {
                if binding.multisampled {
                    return Err(QuarkError::InvalidTextureType(format!(
                        "no multisampled texture bound for '{}' (unit {unit})",
                        binding.name
                    )));
                }
                log::trace!("'{}' reads the fallback texture", binding.name);
                let view = match (binding.sample, binding.shape) {
                    (TextureSampleKind::Depth, _) => self.fallbacks.depth.clone(),
                    (TextureSampleKind::Float, TextureShape::Cube) => self.fallbacks.cube.clone(),
                    (TextureSampleKind::Float, TextureShape::D2) => self.fallbacks.d2.clone(),
                };
                (view, TextureParams::default())
            }
        };

        let sampler = binding
            .sampler_binding
            .map(|_| self.sampler(SamplerKey::new(&params, usage, self.clamp_to_border)));
        Ok((view, sampler))
    }

    /// Snapshots the program's uniform block into the arena.
    fn push_uniforms(&mut self, program_id: ProgramId) -> SmallVec<[u32; 1]> {
        let block_size = self.programs[program_id].block_size();
        if block_size == 0 {
            return SmallVec::new();
        }
        if !self.arena.fits(block_size) {
            log::debug!("Uniform arena full, submitting early");
            self.flush();
        }
        SmallVec::from_iter([self.arena.push(&self.programs[program_id].block)])
    }

    /// Bind group 1: sampled textures, plus `storage` for compute dispatches.
    fn texture_bind_group(
        &mut self,
        program_id: ProgramId,
        storage: Option<(u32, &wgpu::TextureView)>,
    ) -> Result<wgpu::BindGroup> {
        let program = self
            .programs
            .get(program_id)
            .ok_or(QuarkError::UnknownHandle { kind: "program" })?;
        let bindings: Vec<(TextureBinding, u32)> = program
            .reflection
            .textures
            .iter()
            .map(|b| (b.clone(), program.units.get(&b.name).copied().unwrap_or(0)))
            .collect();

        let mut resources = Vec::with_capacity(bindings.len());
        for (binding, unit) in &bindings {
            resources.push(self.binding_resources(binding, *unit)?);
        }

        let mut entries = Vec::with_capacity(bindings.len() * 2);
        for ((binding, _), (view, sampler)) in bindings.iter().zip(&resources) {
            entries.push(wgpu::BindGroupEntry {
                binding: binding.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            if let (Some(sampler_binding), Some(sampler)) = (binding.sampler_binding, sampler) {
                entries.push(wgpu::BindGroupEntry {
                    binding: sampler_binding,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
        }
        if let Some((binding, view)) = storage {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        let program = &self.programs[program_id];
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Quark Textures"),
            layout: &program.texture_layout,
            entries: &entries,
        }))
    }
}

fn texture_fits_binding(texture: &GpuTexture, binding: &TextureBinding) -> bool {
    let shape = match texture.desc.kind {
        TextureKind::Texture2D => TextureShape::D2,
        TextureKind::Cubemap => TextureShape::Cube,
    };
    let is_depth = texture.desc.format.has_depth();
    let sample_ok = match binding.sample {
        TextureSampleKind::Depth => is_depth,
        TextureSampleKind::Float => texture.desc.format.is_color(),
    };
    let fits = shape == binding.shape
        && sample_ok
        && (texture.desc.samples > 1) == binding.multisampled;
    if !fits {
        log::warn!(
            "Texture '{}' ({:?}, {:?}) does not match binding '{}'",
            texture.desc.label,
            texture.desc.kind,
            texture.desc.format,
            binding.name
        );
    }
    fits
}

fn surface_error(status: &wgpu::CurrentSurfaceTexture) -> QuarkError {
    QuarkError::SurfaceError(format!("could not acquire a surface texture: {status:?}"))
}

fn create_offscreen_color(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Color"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: RESOURCE_USAGE,
        view_formats: &[],
    })
}

fn create_default_depth(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// Zero-initialized 1×1 textures read by unbound samplers.
fn create_fallbacks(device: &wgpu::Device) -> Fallbacks {
    let texture = |label: &str, format: wgpu::TextureFormat, layers: u32| {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
    };
    let cube = texture("Fallback Cube", wgpu::TextureFormat::Rgba8Unorm, 6);
    Fallbacks {
        d2: texture("Fallback 2D", wgpu::TextureFormat::Rgba8Unorm, 1)
            .create_view(&wgpu::TextureViewDescriptor::default()),
        cube: cube.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        }),
        depth: texture("Fallback Depth", wgpu::TextureFormat::Depth32Float, 1)
            .create_view(&wgpu::TextureViewDescriptor::default()),
    }
}

fn texture_size(width: u32, height: u32, layers: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: layers,
    }
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn shutdown(&mut self) {
        self.flush();
        if let Some(state) = self.surface.as_mut() {
            state.frame = None;
        }
        self.textures.clear();
        self.renderbuffers.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.vertex_arrays.clear();
        self.pipelines.clear();
        self.samplers.clear();
        self.units.clear();
        self.active_program = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.acquire_frame()
    }

    fn end_frame(&mut self) -> Result<()> {
        self.flush();
        if let Some(state) = self.surface.as_mut() {
            if let Some(frame) = state.frame.take() {
                frame.present();
            }
            if state.reconfigure {
                state.reconfigure = false;
                state.surface.configure(&self.device, &state.config);
            }
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.flush();
        self.width = width;
        self.height = height;
        if let Some(state) = self.surface.as_mut() {
            state.frame = None;
            state.config.width = width;
            state.config.height = height;
            state.surface.configure(&self.device, &state.config);
        }
        if self.offscreen.is_some() {
            self.offscreen = Some(create_offscreen_color(&self.device, width, height));
        }
        self.default_depth = create_default_depth(&self.device, self.depth_format, width, height);
    }

    fn default_target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    // --- textures ------------------------------------------------------------

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId> {
        let layers = match desc.kind {
            TextureKind::Texture2D => 1,
            TextureKind::Cubemap => 6,
        };
        let samples = desc.samples.max(1);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: texture_size(desc.width.max(1), desc.height.max(1), layers),
            mip_level_count: if samples > 1 { 1 } else { desc.num_mips.max(1) },
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: texture_usage(wgpu_format(desc.format), samples),
            view_formats: &[],
        });
        let mut desc = desc.clone();
        desc.num_mips = texture.mip_level_count();
        desc.samples = samples;
        Ok(self.textures.insert(GpuTexture {
            texture,
            desc,
            params: TextureParams::default(),
            mip_range: None,
        }))
    }

    fn upload_texture(&mut self, texture: TextureId, upload: &TextureUpload<'_>) -> Result<()> {
        let entry = self
            .textures
            .get(texture)
            .ok_or(QuarkError::UnknownHandle { kind: "texture" })?;
        validate_upload(&entry.desc, upload)?;
        let bytes = encode_texels(entry.desc.format, upload)?;
        let texture = entry.texture.clone();

        // Queue writes land before the next submission's commands.
        self.flush();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: upload.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(upload.width * bytes_per_texel(texture.format())),
                rows_per_image: Some(upload.height),
            },
            texture_size(upload.width, upload.height, 1),
        );
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
        }
    }

    fn generate_mips(&mut self, texture: TextureId) -> Result<()> {
        let entry = self
            .textures
            .get(texture)
            .ok_or(QuarkError::UnknownHandle { kind: "texture" })?;
        if !entry.desc.format.is_color() || entry.desc.samples > 1 {
            log::warn!("Cannot generate mips for '{}'", entry.desc.label);
            return Ok(());
        }
        let texture = entry.texture.clone();
        let mut encoder = self.take_encoder();
        self.blitter
            .generate_mips(&self.device, &mut encoder, &texture);
        self.encoder = Some(encoder);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
        self.units.retain(|_, bound| *bound != texture);
    }

    fn bind_texture_unit(&mut self, unit: u32, texture: TextureId) {
        self.units.insert(unit, texture);
    }

    // --- renderbuffers -------------------------------------------------------

    fn create_renderbuffer(&mut self, desc: &RenderbufferDescriptor) -> Result<RenderbufferId> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: texture_size(desc.width.max(1), desc.height.max(1), 1),
            mip_level_count: 1,
            sample_count: desc.samples.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage: RESOURCE_USAGE,
            view_formats: &[],
        });
        Ok(self.renderbuffers.insert(texture))
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.renderbuffers.remove(renderbuffer);
    }

    // --- framebuffers --------------------------------------------------------

    fn create_framebuffer(&mut self, label: &str, samples: u32) -> Result<FramebufferId> {
        log::debug!("Creating framebuffer '{label}' ({samples} samples)");
        Ok(self.framebuffers.insert(GpuFramebuffer {
            samples,
            ..GpuFramebuffer::default()
        }))
    }

    fn attach(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        resource: AttachmentResource,
    ) -> Result<()> {
        self.attachment_texture(resource)?;
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
        let mut shapes = fb.attachments.iter().map(|(_, r)| {
            self.attachment_texture(*r)
                .ok()
                .map(|(t, _)| (t.width(), t.height(), t.sample_count()))
        });
        let Some(Some(first)) = shapes.next() else {
            return FramebufferStatus::Incomplete("missing attachment".into());
        };
        if shapes.any(|shape| shape != Some(first)) {
            return FramebufferStatus::Incomplete("attachments differ in size or samples".into());
        }
        let colors: Vec<u32> = fb
            .attachments
            .iter()
            .filter_map(|(p, _)| match p {
                AttachmentPoint::Color(i) => Some(*i),
                _ => None,
            })
            .collect();
        if fb.draw_buffers.iter().any(|b| !colors.contains(b)) {
            return FramebufferStatus::Incomplete("draw buffer without attachment".into());
        }
        if fb.draw_buffers.len() as u32 > self.device.limits().max_color_attachments {
            return FramebufferStatus::Incomplete("too many color attachments".into());
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
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn clear(&mut self, bits: BufferBits, color: Vec4, depth: f32, stencil: u32) {
        let target = match self.resolve_target() {
            Ok(target) => target,
            Err(e) => {
                log::warn!("Clear skipped: {e}");
                return;
            }
        };
        let clear_color = wgpu::Color {
            r: f64::from(color.x),
            g: f64::from(color.y),
            b: f64::from(color.z),
            a: f64::from(color.w),
        };
        let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment>; 4]> = target
            .colors
            .iter()
            .map(|(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: if bits.contains(BufferBits::COLOR) {
                            wgpu::LoadOp::Clear(clear_color)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment =
            target
                .depth
                .as_ref()
                .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: format.has_depth_aspect().then_some(wgpu::Operations {
                        load: if bits.contains(BufferBits::DEPTH) {
                            wgpu::LoadOp::Clear(depth)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
                        load: if bits.contains(BufferBits::STENCIL) {
                            wgpu::LoadOp::Clear(stencil)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let mut encoder = self.take_encoder();
        drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Quark Clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        }));
        self.encoder = Some(encoder);
    }

    fn blit(
        &mut self,
        source: Option<FramebufferId>,
        dest: Option<FramebufferId>,
        bits: BufferBits,
    ) -> Result<()> {
        let src = self.blit_endpoint(source)?;
        let dst = self.blit_endpoint(dest)?;
        if dst.samples > 1 {
            return Err(QuarkError::BlitUnsupported(
                "cannot blit into a multisampled framebuffer".into(),
            ));
        }
        let mut encoder = self.take_encoder();
        let result = self.record_blit(&mut encoder, &src, &dst, bits);
        self.encoder = Some(encoder);
        result
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
        let program = GpuProgram::compile(&self.device, &self.arena, source)?;
        Ok(self.programs.insert(program))
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
        self.pipelines.evict_program(program);
        if self.active_program == Some(program) {
            self.active_program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.active_program = program;
    }

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        let Some(entry) = self.programs.get_mut(program) else {
            return;
        };
        if let Some(binding) = entry.reflection.texture(name) {
            if let Some(unit) = value.as_int() {
                entry.units.insert(binding.name.clone(), unit.max(0) as u32);
            }
            return;
        }
        match entry.reflection.uniform(name) {
            Some(field) => {
                if !write_field(&mut entry.block, field, value) {
                    log::warn!("Uniform '{name}' of '{}' cannot hold {value:?}", entry.label);
                }
            }
            None => log::trace!("'{}' has no uniform '{name}'", entry.label),
        }
    }

    fn dispatch_compute(&mut self, program_id: ProgramId, texture: TextureId) -> Result<()> {
        let program = self
            .programs
            .get(program_id)
            .ok_or(QuarkError::UnknownHandle { kind: "program" })?;
        let pipeline = program.compute.clone().ok_or_else(|| {
            QuarkError::ShaderLink(format!("'{}' is not a compute program", program.label))
        })?;
        let entry = self
            .textures
            .get(texture)
            .ok_or(QuarkError::UnknownHandle { kind: "texture" })?;
        let binding = storage_target(&program.label, &program.reflection, &entry.desc)?.binding;
        let workgroups = workgroup_count(
            entry.desc.width,
            entry.desc.height,
            program.reflection.workgroup_size.unwrap_or([1, 1, 1]),
        );
        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&entry.desc.label),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: 0,
            mip_level_count: Some(1),
            usage: Some(wgpu::TextureUsages::STORAGE_BINDING),
            ..Default::default()
        });

        let texture_group = self.texture_bind_group(program_id, Some((binding, &view)))?;
        let offsets = self.push_uniforms(program_id);

        let mut encoder = self.take_encoder();
        let program = &self.programs[program_id];
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&program.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &program.uniform_bind_group, &offsets);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        log::trace!("Dispatched {workgroups:?} workgroups of '{}'", program.label);
        self.encoder = Some(encoder);
        Ok(())
    }

    // --- geometry ------------------------------------------------------------

    fn create_vertex_array(&mut self, desc: &VertexArrayDescriptor) -> Result<VertexArrayId> {
        let buffer = |label: &str, contents: &[u8], usage: wgpu::BufferUsages| {
            (!contents.is_empty()).then(|| {
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents,
                        usage,
                    })
            })
        };
        let vertex_buffer = buffer(
            &desc.label,
            bytemuck::cast_slice(&desc.vertex_data),
            wgpu::BufferUsages::VERTEX,
        );
        let instance_buffer = buffer(
            &desc.label,
            bytemuck::cast_slice(&desc.instance_data),
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        );
        let index_buffer = desc.indices.as_ref().and_then(|indices| {
            buffer(
                &desc.label,
                bytemuck::cast_slice(indices),
                wgpu::BufferUsages::INDEX,
            )
        });
        Ok(self.vertex_arrays.insert(GpuVertexArray {
            desc: VertexArrayDescriptor {
                label: desc.label.clone(),
                attributes: desc.attributes.clone(),
                ..VertexArrayDescriptor::default()
            },
            vertex_buffer,
            instance_buffer,
            index_buffer,
        }))
    }

    fn update_instance_data(&mut self, vertex_array: VertexArrayId, data: &[f32]) -> Result<()> {
        if !self.vertex_arrays.contains_key(vertex_array) {
            return Err(QuarkError::UnknownHandle { kind: "vertex array" });
        }
        // Draws already recorded must keep reading the old data.
        self.flush();
        let contents: &[u8] = bytemuck::cast_slice(data);
        let entry = &mut self.vertex_arrays[vertex_array];
        if let Some(buffer) = entry
            .instance_buffer
            .as_ref()
            .filter(|b| b.size() >= contents.len() as u64 && !contents.is_empty())
        {
            self.queue.write_buffer(buffer, 0, contents);
            return Ok(());
        }
        entry.instance_buffer = (!contents.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&entry.desc.label),
                    contents,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                })
        });
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
        if program.compute.is_some() {
            return Err(QuarkError::ShaderLink(format!(
                "compute program '{}' cannot draw",
                program.label
            )));
        }
        let vertex_array = self
            .vertex_arrays
            .get(call.vertex_array)
            .ok_or(QuarkError::UnknownHandle { kind: "vertex array" })?;
        if call.indexed && vertex_array.index_buffer.is_none() {
            return Err(QuarkError::InvalidVertexData(format!(
                "indexed draw of '{}' without an index buffer",
                vertex_array.desc.label
            )));
        }
        if call.instances == 0 || call.elements.is_empty() {
            return Ok(());
        }
        let attributes = vertex_array.desc.attributes.iter().copied().collect();

        let target = self.resolve_target()?;
        let Some((x, y, width, height)) = self.clipped_viewport(target.size) else {
            return Ok(());
        };

        let key = PipelineKey {
            program: program_id,
            attributes,
            color_formats: target.colors.iter().map(|(_, format)| *format).collect(),
            depth_format: target.depth.as_ref().map(|(_, format)| *format),
            samples: target.samples,
            blend: self.blend,
            depth: self.depth,
            cull: self.cull,
            topology: call.topology,
        };
        let pipeline =
            self.pipelines
                .get_or_create(&self.device, &key, &self.programs[program_id])?;
        let texture_group = self.texture_bind_group(program_id, None)?;
        let offsets = self.push_uniforms(program_id);

        let mut encoder = self.take_encoder();
        {
            let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment>; 4]> =
                target
                    .colors
                    .iter()
                    .map(|(view, _)| {
                        Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        })
                    })
                    .collect();
            let load_store = wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            };
            let depth_stencil_attachment =
                target
                    .depth
                    .as_ref()
                    .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: format.has_depth_aspect().then_some(load_store),
                        stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                    });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&self.programs[program_id].label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_viewport(x, y, width, height, 0.0, 1.0);
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &self.programs[program_id].uniform_bind_group, &offsets);
            pass.set_bind_group(1, &texture_group, &[]);

            let vertex_array = &self.vertex_arrays[call.vertex_array];
            let vertex_buffer = vertex_array.vertex_buffer.as_ref().unwrap_or(&self.empty_buffer);
            let instance_buffer = vertex_array
                .instance_buffer
                .as_ref()
                .unwrap_or(&self.empty_buffer);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.set_vertex_buffer(1, instance_buffer.slice(..));

            let instances = 0..call.instances;
            match &vertex_array.index_buffer {
                Some(indices) if call.indexed => {
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(call.elements.clone(), 0, instances);
                }
                _ => pass.draw(call.elements.clone(), instances),
            }
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    // --- debugging -------------------------------------------------------------

    fn push_debug_group(&mut self, label: &str) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.push_debug_group(label);
        }
        self.debug_groups.push(label.to_string());
    }

    fn pop_debug_group(&mut self) {
        if self.debug_groups.pop().is_some()
            && let Some(encoder) = self.encoder.as_mut()
        {
            encoder.pop_debug_group();
        }
    }
}

impl WgpuBackend {
    fn record_blit(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        src: &BlitEndpoint,
        dst: &BlitEndpoint,
        bits: BufferBits,
    ) -> Result<()> {
        if bits.contains(BufferBits::COLOR) {
            let (Some((src_view, src_format, src_is_surface)), Some((dst_view, dst_format, _))) =
                (&src.color, &dst.color)
            else {
                return Err(QuarkError::BlitUnsupported(
                    "color blit needs a color attachment on both sides".into(),
                ));
            };
            if *src_is_surface {
                return Err(QuarkError::BlitUnsupported(
                    "the window surface cannot be read".into(),
                ));
            }
            if src.samples > 1 {
                if src.size != dst.size || src_format != dst_format {
                    return Err(QuarkError::BlitUnsupported(
                        "multisample resolve requires equal size and format".into(),
                    ));
                }
                drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Resolve Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: src_view,
                        resolve_target: Some(dst_view),
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                }));
            } else {
                self.blitter
                    .copy_color(&self.device, encoder, src_view, dst_view, *dst_format);
            }
        }

        if bits.intersects(BufferBits::DEPTH | BufferBits::STENCIL) {
            if src.size != dst.size {
                return Err(QuarkError::BlitUnsupported(format!(
                    "depth/stencil blits require equal sizes ({:?} vs {:?})",
                    src.size, dst.size
                )));
            }
            if src.samples > 1 {
                return Err(QuarkError::BlitUnsupported(
                    "multisampled depth cannot be blitted".into(),
                ));
            }
            let (Some((src_tex, src_format)), Some((dst_tex, dst_format))) = (&src.depth, &dst.depth)
            else {
                return Err(QuarkError::BlitUnsupported(
                    "depth/stencil blit needs a depth attachment on both sides".into(),
                ));
            };
            if bits.contains(BufferBits::DEPTH) {
                if !src_format.has_depth_aspect() || !dst_format.has_depth_aspect() {
                    return Err(QuarkError::BlitUnsupported("missing depth aspect".into()));
                }
                let src_view = src_tex.create_view(&wgpu::TextureViewDescriptor {
                    aspect: if src_format.has_stencil_aspect() {
                        wgpu::TextureAspect::DepthOnly
                    } else {
                        wgpu::TextureAspect::All
                    },
                    usage: Some(wgpu::TextureUsages::TEXTURE_BINDING),
                    ..Default::default()
                });
                let dst_view = dst_tex.create_view(&wgpu::TextureViewDescriptor::default());
                self.blitter
                    .copy_depth(&self.device, encoder, &src_view, &dst_view, *dst_format);
            }
            if bits.contains(BufferBits::STENCIL) {
                if !src_format.has_stencil_aspect() || !dst_format.has_stencil_aspect() {
                    return Err(QuarkError::BlitUnsupported("missing stencil aspect".into()));
                }
                encoder.copy_texture_to_texture(
                    stencil_copy(src_tex),
                    stencil_copy(dst_tex),
                    texture_size(src.size.0, src.size.1, 1),
                );
            }
        }
        Ok(())
    }
}

fn stencil_copy(texture: &wgpu::Texture) -> wgpu::TexelCopyTextureInfo<'_> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d::ZERO,
        aspect: wgpu::TextureAspect::StencilOnly,
    }
}
