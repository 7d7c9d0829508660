//! Textures
//!
//! [`Texture`] is a lightweight handle to a GPU-resident 2D image or cubemap.
//! Whoever creates a texture owns it: framebuffers destroy their attachment
//! textures on drop, and directly loaded textures are released with
//! [`Texture::free`]. A `Texture` obtained from an attachment is a
//! non-owning view and must not outlive its framebuffer.
//!
//! Mip arithmetic lives here too; it is shared by framebuffer activation and
//! the bloom chain:
//!
//! ```rust,ignore
//! assert_eq!(calculate_num_mips(256, 256), 9);
//! assert_eq!(calculate_mip_level(84, 26, 1), ImageSize::new(42, 13));
//! ```

use std::path::{Path, PathBuf};

use glam::{Vec3, Vec4};
use image::DynamicImage;

use crate::core::backend::{TexelData, TextureDescriptor, TextureId, TextureUpload};
use crate::core::Context;
use crate::errors::{QuarkError, Result};

// ============================================================================
// Mip arithmetic
// ============================================================================

/// A width × height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.width, self.height)
    }
}

/// Length of a full mip chain: `floor(log2(max(w, h))) + 1`.
#[must_use]
pub fn calculate_num_mips(width: u32, height: u32) -> u32 {
    1 + width.max(height).max(1).ilog2()
}

/// Size of the next mip: each side halved (floor), never below 1.
#[must_use]
pub fn calculate_next_mip(size: ImageSize) -> ImageSize {
    ImageSize::new((size.width / 2).max(1), (size.height / 2).max(1))
}

/// Size of mip `level` of a `mip0_width × mip0_height` image.
#[must_use]
pub fn calculate_mip_level(mip0_width: u32, mip0_height: u32, level: u32) -> ImageSize {
    let shrink = |side: u32| side.checked_shr(level).unwrap_or(0).max(1);
    ImageSize::new(shrink(mip0_width), shrink(mip0_height))
}

// ============================================================================
// Formats & sampling parameters
// ============================================================================

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Texture2D,
    Cubemap,
}

/// Internal storage format.
///
/// Three-channel formats are logical: backends without RGB storage pad them
/// to RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    Rgb8,
    Rgba8,
    Srgb8,
    Srgba8,
    R16F,
    Rgb16F,
    Rgba16F,
    Depth32F,
    Stencil8,
    Depth24Stencil8,
}

impl TextureFormat {
    #[must_use]
    pub fn is_color(self) -> bool {
        !self.has_depth() && !self.has_stencil()
    }

    #[must_use]
    pub fn has_depth(self) -> bool {
        matches!(self, Self::Depth32F | Self::Depth24Stencil8)
    }

    #[must_use]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Stencil8 | Self::Depth24Stencil8)
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::R16F | Self::Rgb16F | Self::Rgba16F | Self::Depth32F)
    }

    #[must_use]
    pub fn is_srgb(self) -> bool {
        matches!(self, Self::Srgb8 | Self::Srgba8)
    }

    /// Number of color channels the format stores logically.
    #[must_use]
    pub fn channels(self) -> u8 {
        match self {
            Self::R8 | Self::R16F | Self::Depth32F | Self::Stencil8 => 1,
            Self::Depth24Stencil8 => 2,
            Self::Rgb8 | Self::Srgb8 | Self::Rgb16F => 3,
            Self::Rgba8 | Self::Srgba8 | Self::Rgba16F => 4,
        }
    }

    /// The four-channel format a three-channel format is stored as.
    #[must_use]
    pub fn padded(self) -> Self {
        match self {
            Self::Rgb8 => Self::Rgba8,
            Self::Srgb8 => Self::Srgba8,
            Self::Rgb16F => Self::Rgba16F,
            other => other,
        }
    }
}

/// Sampler filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFiltering {
    /// Nearest texel, no mip blending.
    Nearest,
    /// Linear within a mip level.
    #[default]
    Bilinear,
    /// Linear within and across mip levels.
    Trilinear,
    /// Trilinear with anisotropic filtering (4 samples).
    Anisotropic,
}

/// Sampler addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureWrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

/// When the mip chain is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MipGeneration {
    /// Single mip.
    #[default]
    Never,
    /// Generated once from loaded image data.
    OnLoad,
    /// Storage for the whole chain is allocated up front (render targets).
    Always,
}

/// Parameters applied when a texture is created or loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureParams {
    pub filtering: TextureFiltering,
    pub wrap_mode: TextureWrapMode,
    /// Only used with [`TextureWrapMode::ClampToBorder`].
    pub border_color: Vec4,
    pub flip_vertically_on_load: bool,
    pub generate_mips: MipGeneration,
    /// Caps the chain length when mips are generated.
    pub max_num_mips: Option<u32>,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            filtering: TextureFiltering::Bilinear,
            wrap_mode: TextureWrapMode::Repeat,
            border_color: Vec4::ZERO,
            flip_vertically_on_load: false,
            generate_mips: MipGeneration::Never,
            max_num_mips: None,
        }
    }
}

impl TextureParams {
    /// Bilinear filtering, clamped to edge. The default for generated textures.
    #[must_use]
    pub fn bilinear_clamped() -> Self {
        Self {
            filtering: TextureFiltering::Bilinear,
            wrap_mode: TextureWrapMode::ClampToEdge,
            ..Self::default()
        }
    }

    /// Number of mips to allocate for a `width × height` texture.
    #[must_use]
    pub fn mip_count(&self, width: u32, height: u32, source: MipGeneration) -> u32 {
        if self.generate_mips < source {
            return 1;
        }
        let full = calculate_num_mips(width, height);
        self.max_num_mips.map_or(full, |max| full.min(max.max(1)))
    }
}

// ============================================================================
// Texture
// ============================================================================

/// Handle to a GPU texture.
#[derive(Debug, Clone)]
pub struct Texture {
    ctx: Context,
    id: TextureId,
    kind: TextureKind,
    width: u32,
    height: u32,
    num_channels: u8,
    num_mips: u32,
    format: TextureFormat,
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.ctx.same_as(&other.ctx)
    }
}

impl Texture {
    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Loads an LDR image with anisotropic filtering, repeat wrapping and mips.
    pub fn load(ctx: &Context, path: impl AsRef<Path>, is_srgb: bool) -> Result<Self> {
        let params = TextureParams {
            filtering: TextureFiltering::Anisotropic,
            wrap_mode: TextureWrapMode::Repeat,
            generate_mips: MipGeneration::OnLoad,
            ..TextureParams::default()
        };
        Self::load_with_params(ctx, path, is_srgb, &params)
    }

    pub fn load_with_params(
        ctx: &Context,
        path: impl AsRef<Path>,
        is_srgb: bool,
        params: &TextureParams,
    ) -> Result<Self> {
        let path = path.as_ref();
        let image = open_image(path, params.flip_vertically_on_load)?;
        let (width, height) = (image.width(), image.height());
        let channels = image.color().channel_count();

        let (format, data): (TextureFormat, Vec<u8>) = match channels {
            1 => (TextureFormat::R8, image.into_luma8().into_raw()),
            3 => (
                if is_srgb { TextureFormat::Srgb8 } else { TextureFormat::Rgb8 },
                image.into_rgb8().into_raw(),
            ),
            4 => (
                if is_srgb { TextureFormat::Srgba8 } else { TextureFormat::Rgba8 },
                image.into_rgba8().into_raw(),
            ),
            _ => {
                return Err(QuarkError::UnsupportedTextureFormat {
                    path: path.to_path_buf(),
                    channels,
                });
            }
        };

        let num_mips = params.mip_count(width, height, MipGeneration::OnLoad);
        let texture = Self::allocate(
            ctx,
            &path.display().to_string(),
            TextureKind::Texture2D,
            width,
            height,
            num_mips,
            format,
            params,
        )?;
        texture.upload(0, width, height, channels, TexelData::U8(&data))?;
        if num_mips > 1 {
            texture.generate_mips()?;
        }
        log::debug!("Loaded texture {} ({width}x{height}, {format:?})", path.display());
        Ok(Self {
            num_channels: channels,
            ..texture
        })
    }

    /// Loads an HDR image (stored as half floats), bilinear and clamped.
    pub fn load_hdr(ctx: &Context, path: impl AsRef<Path>) -> Result<Self> {
        let params = TextureParams {
            flip_vertically_on_load: true,
            ..TextureParams::bilinear_clamped()
        };
        Self::load_hdr_with_params(ctx, path, &params)
    }

    pub fn load_hdr_with_params(
        ctx: &Context,
        path: impl AsRef<Path>,
        params: &TextureParams,
    ) -> Result<Self> {
        let path = path.as_ref();
        let image = open_image(path, params.flip_vertically_on_load)?;
        let (width, height) = (image.width(), image.height());
        let channels = image.color().channel_count();

        let (format, data): (TextureFormat, Vec<f32>) = match channels {
            1 => (
                TextureFormat::R16F,
                image.into_rgb32f().into_raw().chunks_exact(3).map(|t| t[0]).collect(),
            ),
            3 => (TextureFormat::Rgb16F, image.into_rgb32f().into_raw()),
            4 => (TextureFormat::Rgba16F, image.into_rgba32f().into_raw()),
            _ => {
                return Err(QuarkError::UnsupportedTextureFormat {
                    path: path.to_path_buf(),
                    channels,
                });
            }
        };

        let texture = Self::allocate(
            ctx,
            &path.display().to_string(),
            TextureKind::Texture2D,
            width,
            height,
            1,
            format,
            params,
        )?;
        texture.upload(0, width, height, channels, TexelData::F32(&data))?;
        Ok(Self {
            num_channels: channels,
            ..texture
        })
    }

    /// Loads a cubemap from six RGB faces ordered +X, -X, +Y, -Y, +Z, -Z
    /// (right, left, top, bottom, front, back).
    pub fn load_cubemap<P: AsRef<Path>>(ctx: &Context, faces: &[P]) -> Result<Self> {
        Self::load_cubemap_with_params(ctx, faces, &TextureParams::bilinear_clamped())
    }

    pub fn load_cubemap_with_params<P: AsRef<Path>>(
        ctx: &Context,
        faces: &[P],
        params: &TextureParams,
    ) -> Result<Self> {
        if faces.len() != 6 {
            return Err(QuarkError::InvalidTextureArgument(format!(
                "Must pass exactly 6 faces to load_cubemap, got {}",
                faces.len()
            )));
        }

        let mut images = Vec::with_capacity(6);
        for face in faces {
            let path = face.as_ref();
            let image = open_image(path, params.flip_vertically_on_load)?;
            let channels = image.color().channel_count();
            if channels != 3 {
                return Err(QuarkError::UnsupportedTextureFormat {
                    path: path.to_path_buf(),
                    channels,
                });
            }
            images.push((path, image));
        }

        let (first_path, first) = &images[0];
        let size = first.width();
        if first.height() != size {
            return Err(QuarkError::InvalidTextureSize(format!(
                "Cubemap texture '{}' was not square",
                first_path.display()
            )));
        }
        if let Some((path, _)) = images
            .iter()
            .find(|(_, image)| image.width() != size || image.height() != size)
        {
            return Err(QuarkError::InvalidTextureSize(format!(
                "Cubemap texture '{}' was a different size than the first face",
                path.display()
            )));
        }

        let texture = Self::allocate(
            ctx,
            "Cubemap",
            TextureKind::Cubemap,
            size,
            size,
            1,
            TextureFormat::Rgb8,
            params,
        )?;
        for (layer, (_, image)) in images.into_iter().enumerate() {
            let data = image.into_rgb8().into_raw();
            texture.upload(layer as u32, size, size, 3, TexelData::U8(&data))?;
        }
        Ok(Self {
            num_channels: 3,
            ..texture
        })
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Creates an empty 2D texture. With [`MipGeneration::Always`] the full
    /// chain (capped by `max_num_mips`) is allocated.
    pub fn create(
        ctx: &Context,
        width: u32,
        height: u32,
        format: TextureFormat,
        params: &TextureParams,
    ) -> Result<Self> {
        let num_mips = params.mip_count(width, height, MipGeneration::Always);
        Self::allocate(ctx, "Texture", TextureKind::Texture2D, width, height, num_mips, format, params)
    }

    /// Creates an empty cubemap with square `size × size` faces.
    pub fn create_cubemap(
        ctx: &Context,
        size: u32,
        format: TextureFormat,
        params: &TextureParams,
    ) -> Result<Self> {
        let num_mips = params.mip_count(size, size, MipGeneration::Always);
        Self::allocate(ctx, "Cubemap", TextureKind::Cubemap, size, size, num_mips, format, params)
    }

    /// Creates a 2D texture from `width * height` RGB float texels.
    pub fn create_from_data(
        ctx: &Context,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: &[Vec3],
        params: &TextureParams,
    ) -> Result<Self> {
        if data.len() != (width * height) as usize {
            return Err(QuarkError::InvalidTextureArgument(format!(
                "invalid data size: expected {} texels, got {}",
                width * height,
                data.len()
            )));
        }
        let texture = Self::create(ctx, width, height, format, params)?;
        let flat: Vec<f32> = data.iter().flat_map(|v| v.to_array()).collect();
        texture.upload(0, width, height, 3, TexelData::F32(&flat))?;
        Ok(texture)
    }

    pub(crate) fn allocate(
        ctx: &Context,
        label: &str,
        kind: TextureKind,
        width: u32,
        height: u32,
        num_mips: u32,
        format: TextureFormat,
        params: &TextureParams,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(QuarkError::InvalidTextureSize(format!(
                "texture '{label}' has zero size {width}x{height}"
            )));
        }
        let desc = TextureDescriptor {
            label: label.to_string(),
            kind,
            width,
            height,
            num_mips,
            format,
            samples: 1,
        };
        let id = ctx.create(|b| {
            let id = b.create_texture(&desc)?;
            b.apply_texture_params(id, params);
            Ok(id)
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            id,
            kind,
            width,
            height,
            num_channels: 0,
            num_mips,
            format,
        })
    }

    /// Wraps an existing backend texture without taking ownership of it.
    pub(crate) fn from_parts(
        ctx: &Context,
        id: TextureId,
        kind: TextureKind,
        size: ImageSize,
        num_mips: u32,
        format: TextureFormat,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            id,
            kind,
            width: size.width,
            height: size.height,
            num_channels: 0,
            num_mips,
            format,
        }
    }

    fn upload(&self, layer: u32, width: u32, height: u32, channels: u8, data: TexelData<'_>) -> Result<()> {
        let upload = TextureUpload {
            layer,
            width,
            height,
            channels,
            data,
        };
        self.ctx.create(|b| b.upload_texture(self.id, &upload))
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> TextureId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TextureKind {
        self.kind
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

    /// Channels of the source image; 0 for generated textures.
    #[must_use]
    pub fn num_channels(&self) -> u8 {
        self.num_channels
    }

    #[must_use]
    pub fn num_mips(&self) -> u32 {
        self.num_mips
    }

    #[must_use]
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Binds the texture to a texture unit.
    pub fn bind_to_unit(&self, unit: u32) {
        let id = self.id;
        self.ctx.command(|b| b.bind_texture_unit(unit, id));
    }

    /// Restricts sampling to mips `min..=max`.
    pub fn set_sampler_mip_range(&self, min: u32, max: u32) {
        let id = self.id;
        self.ctx.command(|b| b.set_texture_mip_range(id, Some((min, max))));
    }

    /// Lifts any mip-range restriction.
    pub fn unset_sampler_mip_range(&self) {
        let id = self.id;
        self.ctx.command(|b| b.set_texture_mip_range(id, None));
    }

    /// Regenerates mips 1.. from mip 0.
    pub fn generate_mips(&self) -> Result<()> {
        let id = self.id;
        self.ctx.create(|b| b.generate_mips(id))
    }

    /// Re-applies filtering and wrap parameters.
    pub fn apply_params(&self, params: &TextureParams) {
        let id = self.id;
        self.ctx.command(|b| b.apply_texture_params(id, params));
    }

    /// Releases the GPU storage. Only call this on textures you created.
    pub fn free(self) {
        let id = self.id;
        self.ctx.command(|b| b.destroy_texture(id));
    }
}

fn open_image(path: &Path, flip_vertically: bool) -> Result<DynamicImage> {
    let image = image::open(path).map_err(|e| QuarkError::TextureLoadFailed {
        path: PathBuf::from(path),
        reason: e.to_string(),
    })?;
    Ok(if flip_vertically { image.flipv() } else { image })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_mips_matches_log2_rule() {
        assert_eq!(calculate_num_mips(1, 1), 1);
        assert_eq!(calculate_num_mips(2, 2), 2);
        assert_eq!(calculate_num_mips(2, 1), 2);
        assert_eq!(calculate_num_mips(3, 3), 2);
        assert_eq!(calculate_num_mips(256, 256), 9);
        assert_eq!(calculate_num_mips(1024, 768), 11);
    }

    #[test]
    fn mip_level_shrinks_each_side_independently() {
        assert_eq!(calculate_mip_level(1024, 1024, 1), ImageSize::new(512, 512));
        assert_eq!(calculate_mip_level(256, 1024, 1), ImageSize::new(128, 512));
        assert_eq!(calculate_mip_level(84, 26, 1), ImageSize::new(42, 13));
        assert_eq!(calculate_mip_level(84, 26, 5), ImageSize::new(2, 1));
        assert_eq!(calculate_mip_level(84, 26, 40), ImageSize::new(1, 1));
    }

    #[test]
    fn next_mip_agrees_with_mip_level() {
        let mut size = ImageSize::new(300, 17);
        for level in 1..12 {
            size = calculate_next_mip(size);
            assert_eq!(size, calculate_mip_level(300, 17, level), "level {level}");
        }
    }

    #[test]
    fn mip_count_respects_generation_and_cap() {
        let never = TextureParams::default();
        assert_eq!(never.mip_count(256, 256, MipGeneration::Always), 1);

        let always = TextureParams {
            generate_mips: MipGeneration::Always,
            ..TextureParams::default()
        };
        assert_eq!(always.mip_count(256, 256, MipGeneration::Always), 9);
        assert_eq!(always.mip_count(256, 256, MipGeneration::OnLoad), 9);

        let on_load = TextureParams {
            generate_mips: MipGeneration::OnLoad,
            ..TextureParams::default()
        };
        assert_eq!(on_load.mip_count(256, 256, MipGeneration::Always), 1);

        let capped = TextureParams {
            max_num_mips: Some(5),
            ..always
        };
        assert_eq!(capped.mip_count(256, 256, MipGeneration::Always), 5);
    }
}
