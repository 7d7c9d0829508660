//! Deferred shading geometry pass.

use std::ops::{Deref, DerefMut};

use glam::Vec4;

use crate::core::Context;
use crate::errors::Result;
use crate::resources::{Attachment, BufferType, Framebuffer, ImageSize, Texture};
use crate::shader::primitives::program_wrapper;
use crate::shader::{ShaderProgram, ShaderSource, TextureSource};

/// Sampler names of the G-buffer planes, in color-attachment order.
pub const GBUFFER_SAMPLERS: [&str; 4] =
    ["gPositionAO", "gNormalRoughness", "gAlbedoMetallic", "gEmission"];

/// Four color planes plus a depth-stencil renderbuffer.
///
/// | Location | Plane                   | Buffer type     |
/// |----------|-------------------------|-----------------|
/// | 0        | view position + AO      | `ColorHdrAlpha` |
/// | 1        | view normal + roughness | `ColorHdrAlpha` |
/// | 2        | albedo + metallic       | `ColorAlpha`    |
/// | 3        | emission                | `ColorAlpha`    |
#[derive(Debug)]
pub struct GBuffer {
    framebuffer: Framebuffer,
    planes: [Attachment; 4],
}

impl GBuffer {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut framebuffer = Framebuffer::new(ctx, width, height)?;
        // Anything but zero leaks into the lighting pass as geometry.
        framebuffer.set_clear_color(Vec4::ZERO);

        framebuffer.attach_renderbuffer(BufferType::DepthAndStencil)?;
        let planes = [
            framebuffer.attach_texture(BufferType::ColorHdrAlpha)?,
            framebuffer.attach_texture(BufferType::ColorHdrAlpha)?,
            framebuffer.attach_texture(BufferType::ColorAlpha)?,
            framebuffer.attach_texture(BufferType::ColorAlpha)?,
        ];
        log::debug!("GBuffer {width}x{height}");
        Ok(Self {
            framebuffer,
            planes,
        })
    }

    pub fn from_size(ctx: &Context, size: ImageSize) -> Result<Self> {
        Self::new(ctx, size.width, size.height)
    }

    pub fn position_ao(&self) -> Result<Texture> {
        self.planes[0].as_texture()
    }

    pub fn normal_roughness(&self) -> Result<Texture> {
        self.planes[1].as_texture()
    }

    pub fn albedo_metallic(&self) -> Result<Texture> {
        self.planes[2].as_texture()
    }

    pub fn emission(&self) -> Result<Texture> {
        self.planes[3].as_texture()
    }
}

impl Deref for GBuffer {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        &self.framebuffer
    }
}

impl DerefMut for GBuffer {
    fn deref_mut(&mut self) -> &mut Framebuffer {
        &mut self.framebuffer
    }
}

impl TextureSource for GBuffer {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        let mut unit = next_texture_unit;
        for (plane, sampler) in self.planes.iter().zip(GBUFFER_SAMPLERS) {
            plane.as_texture()?.bind_to_unit(unit);
            shader.set_int(sampler, unit as i32);
            unit += 1;
        }
        Ok(unit)
    }
}

program_wrapper!(
    /// Writes material and view-space geometry into a [`GBuffer`].
    DeferredGeometryPassShader
);

impl DeferredGeometryPassShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ShaderProgram::new(
            ctx,
            &ShaderSource::builtin("builtin/deferred.vert"),
            &ShaderSource::builtin("builtin/deferred.frag"),
        )
        .map(Self)
    }
}
