//! Engine ⇄ wgpu format and sampler mapping.

use half::f16;

use crate::core::backend::{TexelData, TextureUpload};
use crate::errors::{QuarkError, Result};
use crate::resources::texture::{TextureFiltering, TextureFormat, TextureParams, TextureWrapMode};

/// Storage format backing an engine format. Three-channel formats are padded
/// to four.
#[must_use]
pub fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgb8 | TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Srgb8 | TextureFormat::Srgba8 => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::R16F => wgpu::TextureFormat::R16Float,
        TextureFormat::Rgb16F | TextureFormat::Rgba16F => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32F => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Stencil8 => wgpu::TextureFormat::Stencil8,
        TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

/// Converts an upload to the byte layout of `format`.
///
/// Missing color channels are filled with zero and missing alpha with one;
/// surplus channels are dropped. Byte data is normalized when written to a
/// float format and vice versa.
pub fn encode_texels(format: TextureFormat, upload: &TextureUpload<'_>) -> Result<Vec<u8>> {
    let src_channels = usize::from(upload.channels);
    let texels = (upload.width * upload.height) as usize;
    let component = |texel: usize, channel: usize| -> f32 {
        if channel >= src_channels {
            return if channel == 3 { 1.0 } else { 0.0 };
        }
        let index = texel * src_channels + channel;
        match upload.data {
            TexelData::U8(data) => f32::from(data[index]) / 255.0,
            TexelData::F32(data) => data[index],
        }
    };

    match wgpu_format(format) {
        wgpu::TextureFormat::R8Unorm
        | wgpu::TextureFormat::Rgba8Unorm
        | wgpu::TextureFormat::Rgba8UnormSrgb => {
            let dst_channels = if format == TextureFormat::R8 { 1 } else { 4 };
            let mut bytes = Vec::with_capacity(texels * dst_channels);
            for texel in 0..texels {
                for channel in 0..dst_channels {
                    let byte = match upload.data {
                        TexelData::U8(data) if channel < src_channels => {
                            data[texel * src_channels + channel]
                        }
                        _ => (component(texel, channel).clamp(0.0, 1.0) * 255.0).round() as u8,
                    };
                    bytes.push(byte);
                }
            }
            Ok(bytes)
        }
        wgpu::TextureFormat::R16Float | wgpu::TextureFormat::Rgba16Float => {
            let dst_channels = if format == TextureFormat::R16F { 1 } else { 4 };
            let mut bytes = Vec::with_capacity(texels * dst_channels * 2);
            for texel in 0..texels {
                for channel in 0..dst_channels {
                    bytes.extend_from_slice(&f16::from_f32(component(texel, channel)).to_le_bytes());
                }
            }
            Ok(bytes)
        }
        other => Err(QuarkError::InvalidTextureArgument(format!(
            "texel uploads are not supported for {other:?}"
        ))),
    }
}

/// Bytes per texel of an uploadable storage format.
#[must_use]
pub fn bytes_per_texel(format: wgpu::TextureFormat) -> u32 {
    format.block_copy_size(None).unwrap_or(4)
}

// ============================================================================
// Samplers
// ============================================================================

/// How a binding consumes its sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerUse {
    Filtering,
    /// Depth textures read without comparison.
    NonFiltering,
    Comparison,
}

/// Sampler cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    filtering: TextureFiltering,
    wrap_mode: TextureWrapMode,
    border: wgpu::SamplerBorderColor,
    usage: SamplerUse,
}

impl SamplerKey {
    /// `clamp_to_border` tells whether the device supports border addressing.
    #[must_use]
    pub fn new(params: &TextureParams, usage: SamplerUse, clamp_to_border: bool) -> Self {
        let filtering = match usage {
            SamplerUse::Filtering => params.filtering,
            SamplerUse::NonFiltering | SamplerUse::Comparison => TextureFiltering::Nearest,
        };
        let wrap_mode = match params.wrap_mode {
            TextureWrapMode::ClampToBorder if !clamp_to_border => TextureWrapMode::ClampToEdge,
            mode => mode,
        };
        // Only the three standard border colors exist.
        let color = params.border_color;
        let border = if color.w < 0.5 {
            wgpu::SamplerBorderColor::TransparentBlack
        } else if color.x + color.y + color.z > 1.5 {
            wgpu::SamplerBorderColor::OpaqueWhite
        } else {
            wgpu::SamplerBorderColor::OpaqueBlack
        };
        Self {
            filtering,
            wrap_mode,
            border,
            usage,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        let (filter, mipmap_filter, anisotropy_clamp) = match self.filtering {
            TextureFiltering::Nearest => {
                (wgpu::FilterMode::Nearest, wgpu::MipmapFilterMode::Nearest, 1)
            }
            TextureFiltering::Bilinear => {
                (wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Nearest, 1)
            }
            TextureFiltering::Trilinear => {
                (wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Linear, 1)
            }
            TextureFiltering::Anisotropic => {
                (wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Linear, 4)
            }
        };
        let address_mode = match self.wrap_mode {
            TextureWrapMode::Repeat => wgpu::AddressMode::Repeat,
            TextureWrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
            TextureWrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            TextureWrapMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
        };
        wgpu::SamplerDescriptor {
            label: Some("Quark Sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter,
            anisotropy_clamp,
            compare: (self.usage == SamplerUse::Comparison)
                .then_some(wgpu::CompareFunction::LessEqual),
            border_color: (self.wrap_mode == TextureWrapMode::ClampToBorder)
                .then_some(self.border),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload<'a>(channels: u8, data: TexelData<'a>) -> TextureUpload<'a> {
        TextureUpload {
            layer: 0,
            width: 1,
            height: 1,
            channels,
            data,
        }
    }

    #[test]
    fn rgb_bytes_are_padded_with_opaque_alpha() {
        let bytes = encode_texels(TextureFormat::Rgb8, &upload(3, TexelData::U8(&[10, 20, 30])))
            .unwrap();
        assert_eq!(bytes, vec![10, 20, 30, 255]);
    }

    #[test]
    fn float_data_is_stored_as_half() {
        let bytes =
            encode_texels(TextureFormat::R16F, &upload(1, TexelData::F32(&[0.5]))).unwrap();
        assert_eq!(bytes, f16::from_f32(0.5).to_le_bytes().to_vec());
    }

    #[test]
    fn depth_and_stencil_uploads_are_rejected() {
        let stencil = encode_texels(TextureFormat::Stencil8, &upload(1, TexelData::U8(&[1])));
        assert!(stencil.is_err());
        let depth = encode_texels(TextureFormat::Depth32F, &upload(1, TexelData::F32(&[1.0])));
        assert!(depth.is_err());
    }

    #[test]
    fn depth_sampling_forces_nearest_filtering() {
        let params = TextureParams {
            filtering: TextureFiltering::Trilinear,
            ..TextureParams::default()
        };
        let key = SamplerKey::new(&params, SamplerUse::NonFiltering, true);
        let desc = key.descriptor();
        assert_eq!(desc.mag_filter, wgpu::FilterMode::Nearest);
        assert_eq!(desc.mipmap_filter, wgpu::MipmapFilterMode::Nearest);
        assert!(desc.compare.is_none());
    }

    #[test]
    fn border_addressing_falls_back_without_device_support() {
        let params = TextureParams {
            wrap_mode: TextureWrapMode::ClampToBorder,
            border_color: glam::Vec4::ONE,
            ..TextureParams::default()
        };
        let supported = SamplerKey::new(&params, SamplerUse::Filtering, true).descriptor();
        assert_eq!(supported.address_mode_u, wgpu::AddressMode::ClampToBorder);
        assert_eq!(supported.border_color, Some(wgpu::SamplerBorderColor::OpaqueWhite));

        let fallback = SamplerKey::new(&params, SamplerUse::Filtering, false).descriptor();
        assert_eq!(fallback.address_mode_u, wgpu::AddressMode::ClampToEdge);
        assert!(fallback.border_color.is_none());
    }
}
