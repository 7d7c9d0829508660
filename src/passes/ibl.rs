//! Image-based lighting precomputation
//!
//! Three products feed a split-sum PBR shader:
//!
//! - a diffuse irradiance cubemap, convolved over the hemisphere
//! - a GGX prefiltered environment map whose mips hold increasing roughness
//! - a 2D BRDF integration lookup table indexed by `(n·v, roughness)`

use std::ops::Deref;

use crate::core::Context;
use crate::errors::Result;
use crate::resources::{
    Attachment, BufferType, Framebuffer, MipGeneration, ScreenQuadMesh, Texture,
    TextureFiltering, TextureParams, TextureWrapMode,
};
use crate::shader::primitives::ScreenShader;
use crate::shader::{ShaderProgram, ShaderSource, TextureSource};

use super::cubemap::CubemapRenderHelper;

pub const DEFAULT_IRRADIANCE_SIZE: u32 = 32;
pub const DEFAULT_HEMISPHERE_SAMPLE_DELTA: f32 = 0.025;
pub const DEFAULT_NUM_SAMPLES: u32 = 1024;

/// Roughness rendered into `mip` of a prefiltered map with `num_mips` levels.
///
/// Spaced linearly from 0 at mip 0 to 1 at the last mip.
#[must_use]
pub fn prefilter_roughness(mip: u32, num_mips: u32) -> f32 {
    if num_mips <= 1 {
        return 0.0;
    }
    mip as f32 / (num_mips - 1) as f32
}

fn cube_program(ctx: &Context, fragment: &'static str) -> Result<ShaderProgram> {
    ShaderProgram::new(
        ctx,
        &ShaderSource::builtin("ibl/cubemap.vert"),
        &ShaderSource::builtin(fragment),
    )
}

/// Binds `source` to unit 0 as the environment cubemap.
fn bind_environment(shader: &ShaderProgram, source: &Texture) {
    source.bind_to_unit(0);
    shader.set_int("qrk_environmentMap", 0);
}

// ============================================================================
// Irradiance
// ============================================================================

/// Convolves an environment cubemap into diffuse irradiance.
#[derive(Debug)]
pub struct CubemapIrradianceShader {
    program: ShaderProgram,
    hemisphere_sample_delta: f32,
}

impl CubemapIrradianceShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        let mut shader = Self {
            program: cube_program(ctx, "ibl/irradiance_cubemap.frag")?,
            hemisphere_sample_delta: DEFAULT_HEMISPHERE_SAMPLE_DELTA,
        };
        shader.set_hemisphere_sample_delta(DEFAULT_HEMISPHERE_SAMPLE_DELTA);
        Ok(shader)
    }

    #[must_use]
    pub fn hemisphere_sample_delta(&self) -> f32 {
        self.hemisphere_sample_delta
    }

    /// Angular step, in radians, of the hemisphere walk. Smaller is slower
    /// and smoother.
    pub fn set_hemisphere_sample_delta(&mut self, delta: f32) {
        self.hemisphere_sample_delta = delta;
        self.program.set_float("qrk_hemisphereSampleDelta", delta);
    }
}

impl Deref for CubemapIrradianceShader {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        &self.program
    }
}

#[derive(Debug)]
pub struct CubemapIrradianceCalculator {
    buffer: Framebuffer,
    irradiance_map: Attachment,
    shader: CubemapIrradianceShader,
    helper: CubemapRenderHelper,
}

impl CubemapIrradianceCalculator {
    /// A 32x32 irradiance map.
    pub fn new(ctx: &Context) -> Result<Self> {
        Self::with_size(ctx, DEFAULT_IRRADIANCE_SIZE, DEFAULT_IRRADIANCE_SIZE)
    }

    pub fn with_size(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut buffer = Framebuffer::new(ctx, width, height)?;
        let irradiance_map = buffer.attach_texture(BufferType::ColorCubemapHdr)?;
        Ok(Self {
            buffer,
            irradiance_map,
            shader: CubemapIrradianceShader::new(ctx)?,
            helper: CubemapRenderHelper::new(ctx)?,
        })
    }

    pub fn irradiance_map(&self) -> Result<Texture> {
        self.irradiance_map.as_texture()
    }

    pub fn set_hemisphere_sample_delta(&mut self, delta: f32) {
        self.shader.set_hemisphere_sample_delta(delta);
    }

    /// Convolves the environment cubemap `source`.
    pub fn multipass_draw(&mut self, source: &Texture) -> Result<()> {
        let _group = self.buffer.context().debug_group("CubemapIrradianceCalculator");
        bind_environment(&self.shader, source);
        self.helper.multipass_draw(&self.buffer, &self.shader, None)
    }
}

impl TextureSource for CubemapIrradianceCalculator {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.irradiance_map()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_irradianceMap", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

// ============================================================================
// GGX prefiltered environment
// ============================================================================

/// Importance-samples the GGX lobe of an environment cubemap at one
/// roughness.
#[derive(Debug)]
pub struct GgxPrefilterShader {
    program: ShaderProgram,
    num_samples: u32,
}

impl GgxPrefilterShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        let mut shader = Self {
            program: cube_program(ctx, "ibl/ggx_prefilter_cubemap.frag")?,
            num_samples: DEFAULT_NUM_SAMPLES,
        };
        shader.set_num_samples(DEFAULT_NUM_SAMPLES);
        Ok(shader)
    }

    #[must_use]
    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    pub fn set_num_samples(&mut self, num_samples: u32) {
        self.num_samples = num_samples;
        self.program.set_uint("qrk_numSamples", num_samples);
    }

    pub fn set_roughness(&self, roughness: f32) {
        self.program.set_float("qrk_roughness", roughness);
    }
}

impl Deref for GgxPrefilterShader {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        &self.program
    }
}

#[derive(Debug)]
pub struct GgxPrefilteredEnvMapCalculator {
    buffer: Framebuffer,
    prefiltered_map: Attachment,
    shader: GgxPrefilterShader,
    helper: CubemapRenderHelper,
}

impl GgxPrefilteredEnvMapCalculator {
    /// A trilinear cubemap with a full mip chain, optionally capped at
    /// `max_num_mips` levels.
    pub fn new(ctx: &Context, width: u32, height: u32, max_num_mips: Option<u32>) -> Result<Self> {
        let mut buffer = Framebuffer::new(ctx, width, height)?;
        let params = TextureParams {
            filtering: TextureFiltering::Trilinear,
            wrap_mode: TextureWrapMode::ClampToEdge,
            generate_mips: MipGeneration::Always,
            max_num_mips,
            ..TextureParams::default()
        };
        let prefiltered_map =
            buffer.attach_texture_with_params(BufferType::ColorCubemapHdr, &params)?;
        log::debug!(
            "GGX prefiltered map {width}x{height} with {} mips",
            prefiltered_map.num_mips()
        );
        Ok(Self {
            buffer,
            prefiltered_map,
            shader: GgxPrefilterShader::new(ctx)?,
            helper: CubemapRenderHelper::new(ctx)?,
        })
    }

    #[must_use]
    pub fn num_mips(&self) -> u32 {
        self.prefiltered_map.num_mips()
    }

    pub fn prefiltered_map(&self) -> Result<Texture> {
        self.prefiltered_map.as_texture()
    }

    pub fn set_num_samples(&mut self, num_samples: u32) {
        self.shader.set_num_samples(num_samples);
    }

    /// Prefilters `source` into every mip, roughness rising with the mip.
    pub fn multipass_draw(&mut self, source: &Texture) -> Result<()> {
        let _group = self.buffer.context().debug_group("GgxPrefilteredEnvMapCalculator");
        bind_environment(&self.shader, source);

        let num_mips = self.num_mips();
        for mip in 0..num_mips {
            self.helper.set_target_mip(mip);
            self.shader.set_roughness(prefilter_roughness(mip, num_mips));
            self.helper.multipass_draw(&self.buffer, &self.shader, None)?;
        }
        self.helper.set_target_mip(0);
        Ok(())
    }
}

impl TextureSource for GgxPrefilteredEnvMapCalculator {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.prefiltered_map()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_ggxPrefilteredEnvMap", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

// ============================================================================
// BRDF integration
// ============================================================================

/// Integrates the split-sum scale and bias terms over a screen quad.
#[derive(Debug)]
pub struct GgxBrdfIntegrationShader {
    program: ShaderProgram,
    num_samples: u32,
}

impl GgxBrdfIntegrationShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        let program =
            ScreenShader::with_fragment(ctx, &ShaderSource::builtin("ibl/brdf_integration.frag"))?
                .into_program();
        let mut shader = Self {
            program,
            num_samples: DEFAULT_NUM_SAMPLES,
        };
        shader.set_num_samples(DEFAULT_NUM_SAMPLES);
        Ok(shader)
    }

    #[must_use]
    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    pub fn set_num_samples(&mut self, num_samples: u32) {
        self.num_samples = num_samples;
        self.program.set_uint("qrk_numSamples", num_samples);
    }
}

impl Deref for GgxBrdfIntegrationShader {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        &self.program
    }
}

#[derive(Debug)]
pub struct GgxBrdfIntegrationCalculator {
    buffer: Framebuffer,
    integration_map: Attachment,
    shader: GgxBrdfIntegrationShader,
    screen_quad: ScreenQuadMesh,
}

impl GgxBrdfIntegrationCalculator {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut buffer = Framebuffer::new(ctx, width, height)?;
        let integration_map = buffer.attach_texture(BufferType::ColorHdr)?;
        Ok(Self {
            buffer,
            integration_map,
            shader: GgxBrdfIntegrationShader::new(ctx)?,
            screen_quad: ScreenQuadMesh::new(ctx)?,
        })
    }

    pub fn brdf_lut(&self) -> Result<Texture> {
        self.integration_map.as_texture()
    }

    pub fn set_num_samples(&mut self, num_samples: u32) {
        self.shader.set_num_samples(num_samples);
    }

    /// Fills the lookup table.
    pub fn draw(&mut self) -> Result<()> {
        let _group = self.buffer.context().debug_group("GgxBrdfIntegrationCalculator");
        self.buffer.activate()?;
        self.buffer.clear();
        self.screen_quad.draw(&self.shader, None)?;
        self.buffer.deactivate();
        Ok(())
    }
}

impl TextureSource for GgxBrdfIntegrationCalculator {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.brdf_lut()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_brdfLUT", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefilter_roughness_schedule() {
        assert_eq!(prefilter_roughness(0, 1), 0.0);
        assert_eq!(prefilter_roughness(0, 5), 0.0);
        assert_eq!(prefilter_roughness(2, 5), 0.5);
        assert_eq!(prefilter_roughness(4, 5), 1.0);
    }
}
