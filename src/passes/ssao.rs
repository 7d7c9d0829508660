//! Screen-space ambient occlusion
//!
//! The occlusion pass reads view-space positions and normals from a
//! [`GBuffer`](super::GBuffer), so it needs three pieces:
//!
//! 1. [`SsaoKernel`]: hemisphere samples (a uniform source) plus a small tiled
//!    rotation-noise texture (a texture source)
//! 2. [`SsaoShader`] writing raw occlusion into an [`SsaoBuffer`]
//! 3. [`SsaoBlurShader`] averaging one noise tile to hide the rotation pattern
//!
//! ```rust,ignore
//! let kernel = Rc::new(RefCell::new(SsaoKernel::new(&ctx)?));
//! ssao_shader.add_uniform_source(kernel.clone());
//! registry.borrow_mut().add_texture_source(kernel.clone());
//! registry.borrow_mut().add_texture_source(gbuffer.clone());
//! ```

use std::ops::Deref;

use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::core::Context;
use crate::errors::{QuarkError, Result};
use crate::resources::{
    Attachment, BufferType, Framebuffer, ImageSize, Texture, TextureFiltering, TextureFormat,
    TextureParams, TextureWrapMode,
};
use crate::shader::primitives::{ScreenShader, program_wrapper};
use crate::shader::{ShaderProgram, ShaderSource, TextureSource, UniformSource};

/// Length of the sample array declared by the occlusion shader.
pub const MAX_SSAO_KERNEL_SIZE: u32 = 64;

/// Parameters of an [`SsaoKernel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoSettings {
    /// View-space radius of the sampled hemisphere.
    pub radius: f32,
    /// Depth bias against self-occlusion.
    pub bias: f32,
    /// Number of hemisphere samples, at most [`MAX_SSAO_KERNEL_SIZE`].
    pub kernel_size: u32,
    /// Side of the square noise tile.
    pub noise_texture_side_length: u32,
    /// Fixed seed for reproducible kernels. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            radius: 0.5,
            bias: 0.025,
            kernel_size: 64,
            noise_texture_side_length: 4,
            seed: None,
        }
    }
}

fn lerp(a: f32, b: f32, f: f32) -> f32 {
    a + f * (b - a)
}

/// Hemisphere samples around `+Z`, denser near the origin.
///
/// Each direction is rejection-sampled inside the unit sphere, normalized,
/// scaled by a random length and then by `lerp(0.1, 1.0, (i / size)²)`.
pub fn generate_ssao_kernel(rng: &mut StdRng, size: u32) -> Vec<Vec3> {
    (0..size)
        .map(|i| {
            let direction = loop {
                let candidate = Vec3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(0.0..1.0),
                );
                let length_squared = candidate.length_squared();
                if length_squared < 1.0 && length_squared > f32::EPSILON {
                    break candidate.normalize();
                }
            };
            let t = i as f32 / size as f32;
            direction * rng.random_range(0.0..1.0f32) * lerp(0.1, 1.0, t * t)
        })
        .collect()
}

/// Random rotation vectors in the XY plane, one per noise texel.
pub fn generate_ssao_noise(rng: &mut StdRng, side_length: u32) -> Vec<Vec3> {
    (0..side_length * side_length)
        .map(|_| {
            Vec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                0.0,
            )
        })
        .collect()
}

// ============================================================================
// SsaoKernel
// ============================================================================

#[derive(Debug)]
pub struct SsaoKernel {
    settings: SsaoSettings,
    kernel: Vec<Vec3>,
    noise_texture: Texture,
}

impl SsaoKernel {
    pub fn new(ctx: &Context) -> Result<Self> {
        Self::with_settings(ctx, SsaoSettings::default())
    }

    pub fn with_settings(ctx: &Context, settings: SsaoSettings) -> Result<Self> {
        if settings.kernel_size > MAX_SSAO_KERNEL_SIZE {
            return Err(QuarkError::SsaoKernelSize {
                size: settings.kernel_size,
                max: MAX_SSAO_KERNEL_SIZE,
            });
        }
        if settings.noise_texture_side_length == 0 {
            return Err(QuarkError::InvalidTextureSize(
                "SSAO noise texture side length must be positive".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(settings.seed.unwrap_or_else(rand::random));
        let kernel = generate_ssao_kernel(&mut rng, settings.kernel_size);
        let side = settings.noise_texture_side_length;
        let noise = generate_ssao_noise(&mut rng, side);

        let params = TextureParams {
            filtering: TextureFiltering::Nearest,
            wrap_mode: TextureWrapMode::Repeat,
            ..TextureParams::default()
        };
        let noise_texture =
            Texture::create_from_data(ctx, side, side, TextureFormat::Rgb16F, &noise, &params)?;
        log::debug!(
            "SSAO kernel with {} samples, {side}x{side} noise",
            settings.kernel_size
        );

        Ok(Self {
            settings,
            kernel,
            noise_texture,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &SsaoSettings {
        &self.settings
    }

    #[must_use]
    pub fn kernel(&self) -> &[Vec3] {
        &self.kernel
    }

    #[must_use]
    pub fn noise_texture(&self) -> &Texture {
        &self.noise_texture
    }

    #[must_use]
    pub fn noise_texture_side_length(&self) -> u32 {
        self.settings.noise_texture_side_length
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.settings.radius = radius;
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.settings.bias = bias;
    }
}

impl UniformSource for SsaoKernel {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        shader.set_float("qrk_ssaoSampleRadius", self.settings.radius);
        shader.set_float("qrk_ssaoSampleBias", self.settings.bias);
        shader.set_int("qrk_ssaoKernelSize", self.kernel.len() as i32);
        for (i, sample) in self.kernel.iter().enumerate() {
            shader.set_vec3(&format!("qrk_ssaoKernel[{i}]"), *sample);
        }
        Ok(())
    }
}

impl TextureSource for SsaoKernel {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.noise_texture.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_ssaoNoise", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

// ============================================================================
// Shaders
// ============================================================================

program_wrapper!(
    /// Raw occlusion from the G-buffer, the kernel and `projection`.
    SsaoShader
);

impl SsaoShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ScreenShader::with_fragment(ctx, &ShaderSource::builtin("ssao/ssao.frag"))
            .map(|screen| Self(screen.into_program()))
    }
}

program_wrapper!(
    /// Box blur over one noise tile of `qrk_ssao`.
    SsaoBlurShader
);

impl SsaoBlurShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ScreenShader::with_fragment(ctx, &ShaderSource::builtin("ssao/ssao_blur.frag"))
            .map(|screen| Self(screen.into_program()))
    }

    /// Sizes the blur to the kernel's noise tile and binds the raw occlusion
    /// to unit 0.
    pub fn configure_with(&self, kernel: &SsaoKernel, buffer: &SsaoBuffer) -> Result<()> {
        self.set_int(
            "qrk_ssaoNoiseTextureSideLength",
            kernel.noise_texture_side_length() as i32,
        );
        buffer.occlusion()?.bind_to_unit(0);
        self.set_int("qrk_ssao", 0);
        Ok(())
    }
}

// ============================================================================
// SsaoBuffer
// ============================================================================

/// Single-channel occlusion target, cleared to zero.
#[derive(Debug)]
pub struct SsaoBuffer {
    framebuffer: Framebuffer,
    occlusion: Attachment,
}

impl SsaoBuffer {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut framebuffer = Framebuffer::new(ctx, width, height)?;
        framebuffer.set_clear_color(Vec4::ZERO);
        let occlusion = framebuffer.attach_texture(BufferType::Grayscale)?;
        Ok(Self {
            framebuffer,
            occlusion,
        })
    }

    pub fn from_size(ctx: &Context, size: ImageSize) -> Result<Self> {
        Self::new(ctx, size.width, size.height)
    }

    pub fn occlusion(&self) -> Result<Texture> {
        self.occlusion.as_texture()
    }
}

impl Deref for SsaoBuffer {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        &self.framebuffer
    }
}

impl TextureSource for SsaoBuffer {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.occlusion()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_ssao", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_samples_lie_in_upper_hemisphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = generate_ssao_kernel(&mut rng, 64);
        assert_eq!(kernel.len(), 64);
        for sample in &kernel {
            assert!(sample.z >= 0.0);
            assert!(sample.length() <= 1.0);
        }
    }

    #[test]
    fn test_kernel_scale_grows_with_index() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = generate_ssao_kernel(&mut rng, 64);
        // Sample i is at most lerp(0.1, 1, (i/n)^2) long.
        assert!(kernel[0].length() <= 0.1 + 1e-6);
        assert!(kernel[32].length() <= lerp(0.1, 1.0, 0.25) + 1e-6);
    }

    #[test]
    fn test_noise_lies_in_xy_plane() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = generate_ssao_noise(&mut rng, 4);
        assert_eq!(noise.len(), 16);
        assert!(noise.iter().all(|n| n.z == 0.0));
        assert!(noise.iter().all(|n| n.x.abs() <= 1.0 && n.y.abs() <= 1.0));
    }

    #[test]
    fn test_same_seed_same_kernel() {
        let a = generate_ssao_kernel(&mut StdRng::seed_from_u64(3), 16);
        let b = generate_ssao_kernel(&mut StdRng::seed_from_u64(3), 16);
        assert_eq!(a, b);
    }
}
