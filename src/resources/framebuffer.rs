//! Framebuffers & Attachments
//!
//! A [`Framebuffer`] is an off-screen render target made of attachments. Each
//! attachment is either a sampleable texture or a write-only renderbuffer, and
//! has a semantic [`BufferType`]:
//!
//! - Color types may repeat; each new one takes the next color index and is
//!   appended to the draw-buffer list.
//! - Depth, stencil and combined depth-stencil are singletons. Attaching a
//!   second one is a [`QuarkError::BufferTypeCollision`].
//!
//! Activation can redirect rendering to one mip level and, for cubemap
//! attachments, one face:
//!
//! ```rust,ignore
//! let mut fb = Framebuffer::new(&ctx, 256, 256)?;
//! let params = TextureParams { generate_mips: MipGeneration::Always, ..Default::default() };
//! let attachment = fb.attach_texture_with_params(BufferType::ColorHdrAlpha, &params)?;
//! assert_eq!(attachment.num_mips(), 9);
//! fb.activate_at(3, None)?; // viewport is now 32x32
//! ```
//!
//! The framebuffer owns its attachments and destroys them on drop. Textures
//! obtained through [`Attachment::as_texture`] are non-owning views.

use glam::Vec4;
use smallvec::SmallVec;

use crate::core::backend::{
    AttachmentPoint, AttachmentResource, BufferBits, FramebufferId, FramebufferStatus,
    RenderTarget, RenderbufferDescriptor, TextureDescriptor, Viewport, sequential_draw_buffers,
};
use crate::core::Context;
use crate::errors::{QuarkError, Result};
use crate::resources::texture::{
    ImageSize, MipGeneration, Texture, TextureFormat, TextureKind, TextureParams,
    calculate_mip_level,
};
use crate::settings::DEFAULT_CLEAR_COLOR;

/// Number of faces of a cubemap.
pub const CUBEMAP_FACES: u32 = 6;

// ============================================================================
// Buffer types
// ============================================================================

/// Semantic type of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Color,
    /// HDR color, values may exceed 1.0.
    ColorHdr,
    ColorAlpha,
    ColorHdrAlpha,
    ColorCubemap,
    ColorCubemapHdr,
    ColorCubemapAlpha,
    ColorCubemapHdrAlpha,
    /// Single float channel (e.g. SSAO output).
    Grayscale,
    Depth,
    Stencil,
    DepthAndStencil,
}

impl BufferType {
    #[must_use]
    pub fn is_color(self) -> bool {
        !matches!(self, Self::Depth | Self::Stencil | Self::DepthAndStencil)
    }

    #[must_use]
    pub fn is_cubemap(self) -> bool {
        matches!(
            self,
            Self::ColorCubemap
                | Self::ColorCubemapHdr
                | Self::ColorCubemapAlpha
                | Self::ColorCubemapHdrAlpha
        )
    }

    #[must_use]
    pub fn has_depth(self) -> bool {
        matches!(self, Self::Depth | Self::DepthAndStencil)
    }

    #[must_use]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Stencil | Self::DepthAndStencil)
    }

    /// Storage format backing this buffer type.
    #[must_use]
    pub fn texture_format(self) -> TextureFormat {
        match self {
            Self::Color | Self::ColorCubemap => TextureFormat::Rgb8,
            Self::ColorHdr | Self::ColorCubemapHdr => TextureFormat::Rgb16F,
            Self::ColorAlpha | Self::ColorCubemapAlpha => TextureFormat::Rgba8,
            Self::ColorHdrAlpha | Self::ColorCubemapHdrAlpha => TextureFormat::Rgba16F,
            Self::Grayscale => TextureFormat::R16F,
            Self::Depth => TextureFormat::Depth32F,
            Self::Stencil => TextureFormat::Stencil8,
            Self::DepthAndStencil => TextureFormat::Depth24Stencil8,
        }
    }

    fn attachment_point(self, color_index: u32) -> AttachmentPoint {
        match self {
            Self::Depth => AttachmentPoint::Depth,
            Self::Stencil => AttachmentPoint::Stencil,
            Self::DepthAndStencil => AttachmentPoint::DepthStencil,
            _ => AttachmentPoint::Color(color_index),
        }
    }
}

/// Whether an attachment is backed by a texture or a renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentTarget {
    Texture,
    Renderbuffer,
}

// ============================================================================
// Attachment
// ============================================================================

/// One binding point of a [`Framebuffer`].
///
/// Attachments are created by [`Framebuffer::attach_texture`] and
/// [`Framebuffer::attach_renderbuffer`], and become dangling once the
/// framebuffer is dropped.
#[derive(Debug, Clone)]
pub struct Attachment {
    ctx: Context,
    resource: AttachmentResource,
    width: u32,
    height: u32,
    num_mips: u32,
    buffer_type: BufferType,
    color_attachment_index: Option<u32>,
}

impl Attachment {
    #[must_use]
    pub fn resource(&self) -> AttachmentResource {
        self.resource
    }

    #[must_use]
    pub fn target(&self) -> AttachmentTarget {
        match self.resource {
            AttachmentResource::Texture(_) => AttachmentTarget::Texture,
            AttachmentResource::Renderbuffer(_) => AttachmentTarget::Renderbuffer,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    #[must_use]
    pub fn num_mips(&self) -> u32 {
        self.num_mips
    }

    #[must_use]
    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    /// Index among the framebuffer's color attachments; `None` for depth/stencil.
    #[must_use]
    pub fn color_attachment_index(&self) -> Option<u32> {
        self.color_attachment_index
    }

    #[must_use]
    pub fn is_cubemap(&self) -> bool {
        self.buffer_type.is_cubemap()
    }

    /// A non-owning texture view of this attachment.
    pub fn as_texture(&self) -> Result<Texture> {
        match self.resource {
            AttachmentResource::Texture(id) => {
                let kind = if self.is_cubemap() {
                    TextureKind::Cubemap
                } else {
                    TextureKind::Texture2D
                };
                Ok(Texture::from_parts(
                    &self.ctx,
                    id,
                    kind,
                    self.size(),
                    self.num_mips,
                    self.buffer_type.texture_format(),
                ))
            }
            AttachmentResource::Renderbuffer(_) => Err(QuarkError::InvalidBufferType {
                buffer_type: self.buffer_type,
                reason: "renderbuffer attachments cannot be sampled",
            }),
        }
    }
}

// ============================================================================
// Framebuffer
// ============================================================================

/// An off-screen render target.
#[derive(Debug)]
pub struct Framebuffer {
    ctx: Context,
    id: FramebufferId,
    width: u32,
    height: u32,
    samples: u32,
    attachments: Vec<Attachment>,

    num_color_attachments: u32,
    has_depth_attachment: bool,
    has_stencil_attachment: bool,
    clear_color: Vec4,
}

impl Framebuffer {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        Self::with_samples(ctx, width, height, 1)
    }

    pub fn from_size(ctx: &Context, size: ImageSize) -> Result<Self> {
        Self::with_samples(ctx, size.width, size.height, 1)
    }

    /// A multisampled framebuffer. `samples` of 0 or 1 means no multisampling.
    pub fn with_samples(ctx: &Context, width: u32, height: u32, samples: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(QuarkError::InvalidTextureSize(format!(
                "framebuffer has zero size {width}x{height}"
            )));
        }
        let samples = samples.max(1);
        let id = ctx.create(|b| b.create_framebuffer("Framebuffer", samples))?;
        log::debug!("Created framebuffer {width}x{height} (samples: {samples})");
        Ok(Self {
            ctx: ctx.clone(),
            id,
            width,
            height,
            samples,
            attachments: Vec::new(),
            num_color_attachments: 0,
            has_depth_attachment: false,
            has_stencil_attachment: false,
            clear_color: DEFAULT_CLEAR_COLOR,
        })
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    #[must_use]
    pub fn id(&self) -> FramebufferId {
        self.id
    }

    #[must_use]
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    #[must_use]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    #[must_use]
    pub fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    #[must_use]
    pub fn has_color_attachment(&self) -> bool {
        self.num_color_attachments > 0
    }

    #[must_use]
    pub fn has_depth_attachment(&self) -> bool {
        self.has_depth_attachment
    }

    #[must_use]
    pub fn has_stencil_attachment(&self) -> bool {
        self.has_stencil_attachment
    }

    /// Color attachment indices receiving fragment outputs.
    #[must_use]
    pub fn draw_buffers(&self) -> SmallVec<[u32; 4]> {
        sequential_draw_buffers(self.num_color_attachments)
    }

    /// Returns the first attachment of the given type.
    pub fn attachment(&self, buffer_type: BufferType) -> Result<&Attachment> {
        self.attachments
            .iter()
            .find(|a| a.buffer_type == buffer_type)
            .ok_or(QuarkError::AttachmentNotFound(buffer_type))
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Binds mip 0 of every attachment as the render target.
    pub fn activate(&self) -> Result<()> {
        self.activate_at(0, None)
    }

    /// Binds this framebuffer with every texture attachment retargeted to
    /// `mip` and, if given, to cubemap `face`. The viewport is set to the mip
    /// size.
    pub fn activate_at(&self, mip: u32, face: Option<u32>) -> Result<()> {
        let face_index = face.map_or(-1, |f| f as i32);
        if let Some(face) = face
            && face >= CUBEMAP_FACES
        {
            return Err(QuarkError::InvalidCubemapFace(face as i32));
        }

        for attachment in &self.attachments {
            match attachment.target() {
                AttachmentTarget::Renderbuffer => {
                    if mip != 0 || face.is_some() {
                        return Err(QuarkError::RenderbufferTarget {
                            mip,
                            face: face_index,
                        });
                    }
                }
                AttachmentTarget::Texture => {
                    if face.is_some() && !attachment.is_cubemap() {
                        return Err(QuarkError::NotACubemap(face_index));
                    }
                    if mip >= attachment.num_mips {
                        return Err(QuarkError::MipLevelOutOfRange {
                            level: mip,
                            num_mips: attachment.num_mips,
                        });
                    }
                }
            }
        }

        let size = calculate_mip_level(self.width, self.height, mip);
        let id = self.id;
        log::trace!("Activating framebuffer at mip {mip}, face {face_index} ({size})");
        self.ctx.command(|b| {
            b.bind_render_target(RenderTarget::Framebuffer { id, mip, face });
            b.set_viewport(Viewport::new(size.width, size.height));
        });
        Ok(())
    }

    /// Binds the default target and restores its viewport.
    pub fn deactivate(&self) {
        self.ctx.bind_default_target();
    }

    /// Clears the planes this framebuffer actually has, using the clear color.
    pub fn clear(&self) {
        let mut bits = BufferBits::empty();
        if self.has_color_attachment() {
            bits |= BufferBits::COLOR;
        }
        if self.has_depth_attachment {
            bits |= BufferBits::DEPTH;
        }
        if self.has_stencil_attachment {
            bits |= BufferBits::STENCIL;
        }
        self.ctx.clear(bits, self.clear_color);
    }

    // ------------------------------------------------------------------------
    // Blits
    // ------------------------------------------------------------------------

    /// Copies `bits` of mip 0 into `target`.
    pub fn blit(&self, target: &Framebuffer, bits: BufferBits) -> Result<()> {
        let (source, dest) = (self.id, target.id);
        self.ctx.create(|b| b.blit(Some(source), Some(dest), bits))
    }

    /// Copies `bits` of mip 0 into the default target.
    pub fn blit_to_default(&self, bits: BufferBits) -> Result<()> {
        let source = self.id;
        self.ctx.create(|b| b.blit(Some(source), None, bits))
    }

    // ------------------------------------------------------------------------
    // Attaching
    // ------------------------------------------------------------------------

    /// Attaches a texture with bilinear filtering and clamp-to-edge wrapping.
    pub fn attach_texture(&mut self, buffer_type: BufferType) -> Result<Attachment> {
        self.attach_texture_with_params(buffer_type, &TextureParams::bilinear_clamped())
    }

    pub fn attach_texture_with_params(
        &mut self,
        buffer_type: BufferType,
        params: &TextureParams,
    ) -> Result<Attachment> {
        self.check_flags(buffer_type)?;

        let kind = if buffer_type.is_cubemap() {
            if self.width != self.height {
                return Err(QuarkError::InvalidBufferType {
                    buffer_type,
                    reason: "cubemap attachments require a square framebuffer",
                });
            }
            TextureKind::Cubemap
        } else {
            TextureKind::Texture2D
        };
        let num_mips = if self.samples > 1 {
            1
        } else {
            params.mip_count(self.width, self.height, MipGeneration::Always)
        };

        let desc = TextureDescriptor {
            label: format!("{buffer_type:?}"),
            kind,
            width: self.width,
            height: self.height,
            num_mips,
            format: buffer_type.texture_format(),
            samples: self.samples,
        };
        let texture = self.ctx.create(|b| {
            let id = b.create_texture(&desc)?;
            b.apply_texture_params(id, params);
            Ok(id)
        })?;

        self.save_attachment(AttachmentResource::Texture(texture), buffer_type, num_mips)
    }

    /// Attaches a write-only renderbuffer.
    pub fn attach_renderbuffer(&mut self, buffer_type: BufferType) -> Result<Attachment> {
        if buffer_type.is_cubemap() {
            return Err(QuarkError::InvalidBufferType {
                buffer_type,
                reason: "renderbuffers cannot be cubemaps",
            });
        }
        self.check_flags(buffer_type)?;

        let desc = RenderbufferDescriptor {
            label: format!("{buffer_type:?}"),
            width: self.width,
            height: self.height,
            format: buffer_type.texture_format(),
            samples: self.samples,
        };
        let renderbuffer = self.ctx.create(|b| b.create_renderbuffer(&desc))?;

        self.save_attachment(AttachmentResource::Renderbuffer(renderbuffer), buffer_type, 1)
    }

    fn check_flags(&self, buffer_type: BufferType) -> Result<()> {
        let collides = (buffer_type.has_depth() && self.has_depth_attachment)
            || (buffer_type.has_stencil() && self.has_stencil_attachment);
        if collides {
            return Err(QuarkError::BufferTypeCollision(buffer_type));
        }
        Ok(())
    }

    fn save_attachment(
        &mut self,
        resource: AttachmentResource,
        buffer_type: BufferType,
        num_mips: u32,
    ) -> Result<Attachment> {
        let color_attachment_index = buffer_type.is_color().then_some(self.num_color_attachments);
        let point = buffer_type.attachment_point(self.num_color_attachments);
        let id = self.id;
        let draw_buffers = sequential_draw_buffers(
            self.num_color_attachments + u32::from(color_attachment_index.is_some()),
        );

        let status = self.ctx.create(|b| {
            b.attach(id, point, resource)?;
            b.set_draw_buffers(id, &draw_buffers);
            Ok(b.framebuffer_status(id))
        });
        let status = match status {
            Ok(status) => status,
            Err(err) => {
                destroy_resource(&self.ctx, resource);
                return Err(err);
            }
        };
        if let FramebufferStatus::Incomplete(reason) = status {
            destroy_resource(&self.ctx, resource);
            return Err(QuarkError::FramebufferIncomplete(reason));
        }

        if color_attachment_index.is_some() {
            self.num_color_attachments += 1;
        }
        self.has_depth_attachment |= buffer_type.has_depth();
        self.has_stencil_attachment |= buffer_type.has_stencil();

        let attachment = Attachment {
            ctx: self.ctx.clone(),
            resource,
            width: self.width,
            height: self.height,
            num_mips,
            buffer_type,
            color_attachment_index,
        };
        log::debug!(
            "Attached {buffer_type:?} ({:?}, {num_mips} mips) to framebuffer",
            attachment.target()
        );
        self.attachments.push(attachment.clone());
        Ok(attachment)
    }
}

fn destroy_resource(ctx: &Context, resource: AttachmentResource) {
    ctx.command(|b| match resource {
        AttachmentResource::Texture(id) => b.destroy_texture(id),
        AttachmentResource::Renderbuffer(id) => b.destroy_renderbuffer(id),
    });
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        if !self.ctx.is_active() {
            return;
        }
        for attachment in &self.attachments {
            destroy_resource(&self.ctx, attachment.resource);
        }
        let id = self.id;
        self.ctx.command(|b| b.destroy_framebuffer(id));
    }
}
