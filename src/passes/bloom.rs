//! Physically based bloom
//!
//! The bloom image lives in the mip chain of one HDR attachment. A 13-tap
//! downsample walks mips `1..N`, each reading the previous mip; a tent-filter
//! upsample then walks back from `N-2` to `0` with additive blending, each
//! reading the next coarser mip.
//!
//! While one mip is drawn into, only the mip being read may be visible to the
//! sampler. [`BloomBuffer::set_source_mip`] enforces that by restricting the
//! sampled mip range; the passes call it before every draw.

use std::ops::{Deref, DerefMut};

use crate::core::{BlendMode, BufferBits, Context};
use crate::errors::{QuarkError, Result};
use crate::resources::{
    Attachment, BufferType, Framebuffer, ImageSize, MipGeneration, ScreenQuadMesh, Texture,
    TextureFiltering, TextureParams, TextureWrapMode,
};
use crate::shader::primitives::{ScreenShader, program_wrapper};
use crate::shader::{ShaderProgram, ShaderSource, TextureSource};

/// Default upsample kernel radius, in UV units.
pub const DEFAULT_FILTER_RADIUS: f32 = 0.005;

// ============================================================================
// BloomBuffer
// ============================================================================

/// A framebuffer with a single mip-chained HDR color attachment.
#[derive(Debug)]
pub struct BloomBuffer {
    framebuffer: Framebuffer,
    mip_chain: Attachment,
}

impl BloomBuffer {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut framebuffer = Framebuffer::new(ctx, width, height)?;
        let params = TextureParams {
            filtering: TextureFiltering::Bilinear,
            wrap_mode: TextureWrapMode::ClampToEdge,
            generate_mips: MipGeneration::Always,
            ..TextureParams::default()
        };
        let mip_chain = framebuffer.attach_texture_with_params(BufferType::ColorHdrAlpha, &params)?;
        log::debug!("BloomBuffer {width}x{height} with {} mips", mip_chain.num_mips());
        Ok(Self {
            framebuffer,
            mip_chain,
        })
    }

    pub fn from_size(ctx: &Context, size: ImageSize) -> Result<Self> {
        Self::new(ctx, size.width, size.height)
    }

    #[must_use]
    pub fn num_mips(&self) -> u32 {
        self.mip_chain.num_mips()
    }

    pub fn mip_chain_texture(&self) -> Result<Texture> {
        self.mip_chain.as_texture()
    }

    /// Restricts sampling of the mip chain to `level` alone.
    pub fn set_source_mip(&self, level: i32) -> Result<()> {
        let num_mips = self.num_mips();
        if level < 0 || level as u32 >= num_mips {
            return Err(QuarkError::SourceMipOutOfRange { level, num_mips });
        }
        let level = level as u32;
        self.mip_chain_texture()?.set_sampler_mip_range(level, level);
        Ok(())
    }

    /// Makes every mip visible to the sampler again.
    pub fn unset_source_mip(&self) -> Result<()> {
        self.mip_chain_texture()?.unset_sampler_mip_range();
        Ok(())
    }
}

impl Deref for BloomBuffer {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        &self.framebuffer
    }
}

impl DerefMut for BloomBuffer {
    fn deref_mut(&mut self) -> &mut Framebuffer {
        &mut self.framebuffer
    }
}

impl TextureSource for BloomBuffer {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.mip_chain_texture()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_bloomMipChain", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

// ============================================================================
// Shaders
// ============================================================================

/// Binds the whole mip chain to unit 0 as `qrk_bloomMipChain`.
fn bind_mip_chain(shader: &ShaderProgram, buffer: &BloomBuffer) -> Result<()> {
    buffer.mip_chain_texture()?.bind_to_unit(0);
    shader.set_int("qrk_bloomMipChain", 0);
    Ok(())
}

program_wrapper!(
    /// 13-tap downsample from the selected source mip.
    BloomDownsampleShader
);

impl BloomDownsampleShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ScreenShader::with_fragment(ctx, &ShaderSource::builtin("bloom/downsample.frag"))
            .map(|screen| Self(screen.into_program()))
    }

    pub fn configure_with(&self, buffer: &BloomBuffer) -> Result<()> {
        bind_mip_chain(self, buffer)
    }
}

/// 3x3 tent-filter upsample.
#[derive(Debug)]
pub struct BloomUpsampleShader {
    program: ShaderProgram,
    filter_radius: f32,
}

impl BloomUpsampleShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        let program =
            ScreenShader::with_fragment(ctx, &ShaderSource::builtin("bloom/upsample.frag"))?
                .into_program();
        let mut shader = Self {
            program,
            filter_radius: DEFAULT_FILTER_RADIUS,
        };
        shader.set_filter_radius(DEFAULT_FILTER_RADIUS);
        Ok(shader)
    }

    pub fn configure_with(&self, buffer: &BloomBuffer) -> Result<()> {
        bind_mip_chain(&self.program, buffer)
    }

    #[must_use]
    pub fn filter_radius(&self) -> f32 {
        self.filter_radius
    }

    /// Sets the kernel radius in UV units.
    pub fn set_filter_radius(&mut self, filter_radius: f32) {
        self.filter_radius = filter_radius;
        self.program.set_float("qrk_filterRadius", filter_radius);
    }
}

impl Deref for BloomUpsampleShader {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        &self.program
    }
}

// ============================================================================
// BloomPass
// ============================================================================

/// A self-contained bloom: blit the source color into mip 0, downsample the
/// chain, upsample it back additively.
#[derive(Debug)]
pub struct BloomPass {
    buffer: BloomBuffer,
    screen_quad: ScreenQuadMesh,
    downsample: BloomDownsampleShader,
    upsample: BloomUpsampleShader,
}

impl BloomPass {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            buffer: BloomBuffer::new(ctx, width, height)?,
            screen_quad: ScreenQuadMesh::new(ctx)?,
            downsample: BloomDownsampleShader::new(ctx)?,
            upsample: BloomUpsampleShader::new(ctx)?,
        })
    }

    pub fn from_size(ctx: &Context, size: ImageSize) -> Result<Self> {
        Self::new(ctx, size.width, size.height)
    }

    #[must_use]
    pub fn filter_radius(&self) -> f32 {
        self.upsample.filter_radius()
    }

    pub fn set_filter_radius(&mut self, filter_radius: f32) {
        self.upsample.set_filter_radius(filter_radius);
    }

    #[must_use]
    pub fn num_mips(&self) -> u32 {
        self.buffer.num_mips()
    }

    #[must_use]
    pub fn buffer(&self) -> &BloomBuffer {
        &self.buffer
    }

    pub fn output(&self) -> Result<Texture> {
        self.buffer.mip_chain_texture()
    }

    /// Blooms the color of `source`.
    pub fn multipass_draw(&mut self, source: &Framebuffer) -> Result<()> {
        let ctx = self.buffer.framebuffer.context().clone();
        let _group = ctx.debug_group("BloomPass");

        self.buffer.activate_at(0, None)?;
        source.blit(&self.buffer, BufferBits::COLOR)?;

        let num_mips = self.buffer.num_mips();

        self.downsample.configure_with(&self.buffer)?;
        for dest_mip in 1..num_mips {
            self.buffer.activate_at(dest_mip, None)?;
            self.buffer.set_source_mip(dest_mip as i32 - 1)?;
            self.screen_quad.draw(&self.downsample, None)?;
        }

        // Blend into the finer mip instead of rendering to a second chain.
        let previous_blend = ctx.blend_mode();
        ctx.set_blend_mode(BlendMode::Additive);
        self.upsample.configure_with(&self.buffer)?;
        for dest_mip in (0..num_mips.saturating_sub(1)).rev() {
            self.buffer.activate_at(dest_mip, None)?;
            self.buffer.set_source_mip(dest_mip as i32 + 1)?;
            self.screen_quad.draw(&self.upsample, None)?;
        }
        ctx.set_blend_mode(previous_blend);

        self.buffer.unset_source_mip()?;
        self.buffer.deactivate();
        Ok(())
    }
}

impl TextureSource for BloomPass {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.output()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_bloom", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}
