//! Rendering into cubemaps
//!
//! [`CubemapRenderHelper`] draws a unit cube around the origin once per face
//! with a 90° frustum looking down that face's axis. Every pass that fills a
//! cubemap (equirect conversion, irradiance, GGX prefiltering) supplies its
//! own fragment stage and reuses this face loop.

use glam::{Mat4, Vec3};

use crate::core::Context;
use crate::errors::Result;
use crate::resources::{
    Attachment, BufferType, CUBEMAP_FACES, CubeMesh, Framebuffer, Texture, TextureRegistry,
};
use crate::shader::primitives::program_wrapper;
use crate::shader::{ShaderProgram, ShaderSource, TextureSource};

const CUBE_NEAR: f32 = 0.1;
const CUBE_FAR: f32 = 10.0;

/// View matrices for the faces `+X, -X, +Y, -Y, +Z, -Z`, in layer order.
///
/// The up vectors point along `-Y` for the side faces and along `±Z` for the
/// top and bottom; that is the orientation cubemap lookups expect for each
/// face's texel rows.
#[must_use]
pub fn cube_face_views() -> [Mat4; 6] {
    let face = |target: Vec3, up: Vec3| Mat4::look_at_rh(Vec3::ZERO, target, up);
    [
        face(Vec3::X, Vec3::NEG_Y),
        face(Vec3::NEG_X, Vec3::NEG_Y),
        face(Vec3::Y, Vec3::Z),
        face(Vec3::NEG_Y, Vec3::NEG_Z),
        face(Vec3::Z, Vec3::NEG_Y),
        face(Vec3::NEG_Z, Vec3::NEG_Y),
    ]
}

/// 90° square frustum shared by all faces.
///
/// Clip-space `+y` lands on the first texel row of a render target, while the
/// face views above assume it lands on the last, so the projection flips `y`.
#[must_use]
pub fn cube_face_projection() -> Mat4 {
    Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        * Mat4::perspective_rh(90f32.to_radians(), 1.0, CUBE_NEAR, CUBE_FAR)
}

/// Draws a unit cube into each face of a cubemap attachment.
#[derive(Debug)]
pub struct CubemapRenderHelper {
    cube: CubeMesh,
    target_mip: u32,
}

impl CubemapRenderHelper {
    pub fn new(ctx: &Context) -> Result<Self> {
        Ok(Self {
            cube: CubeMesh::new(ctx, Vec::new())?,
            target_mip: 0,
        })
    }

    #[must_use]
    pub fn target_mip(&self) -> u32 {
        self.target_mip
    }

    /// Restricts the next draws to one mip of the target cubemap.
    pub fn set_target_mip(&mut self, mip: u32) {
        self.target_mip = mip;
    }

    /// Renders all six faces of `buffer`'s cubemap attachment at the target mip.
    ///
    /// `shader` must read `view` and `projection`; `projection` is set once
    /// and `view` before each face.
    pub fn multipass_draw(
        &self,
        buffer: &Framebuffer,
        shader: &ShaderProgram,
        mut registry: Option<&mut TextureRegistry>,
    ) -> Result<()> {
        let _group = shader.context().debug_group("CubemapRenderHelper");
        shader.set_mat4("projection", cube_face_projection());

        for (face, view) in (0..CUBEMAP_FACES).zip(cube_face_views()) {
            buffer.activate_at(self.target_mip, Some(face))?;
            buffer.clear();
            shader.set_mat4("view", view);
            self.cube.draw(shader, registry.as_deref_mut())?;
        }

        buffer.deactivate();
        log::trace!("Rendered cubemap faces at mip {}", self.target_mip);
        Ok(())
    }
}

// ============================================================================
// Equirectangular conversion
// ============================================================================

program_wrapper!(
    /// Samples `qrk_equirectMap` along the cube direction.
    EquirectCubemapShader
);

impl EquirectCubemapShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ShaderProgram::new(
            ctx,
            &ShaderSource::builtin("ibl/cubemap.vert"),
            &ShaderSource::builtin("ibl/equirect_cubemap.frag"),
        )
        .map(Self)
    }
}

/// Converts an equirectangular 2D environment map into an HDR cubemap.
#[derive(Debug)]
pub struct EquirectCubemapConverter {
    buffer: Framebuffer,
    cubemap: Attachment,
    shader: EquirectCubemapShader,
    helper: CubemapRenderHelper,
}

impl EquirectCubemapConverter {
    /// Faces are `width × height`; the two must match.
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut buffer = Framebuffer::new(ctx, width, height)?;
        let cubemap = buffer.attach_texture(BufferType::ColorCubemapHdr)?;
        Ok(Self {
            buffer,
            cubemap,
            shader: EquirectCubemapShader::new(ctx)?,
            helper: CubemapRenderHelper::new(ctx)?,
        })
    }

    pub fn cubemap(&self) -> Result<Texture> {
        self.cubemap.as_texture()
    }

    /// Renders `source` into all six faces.
    pub fn multipass_draw(&mut self, source: &Texture) -> Result<()> {
        let _group = self.buffer.context().debug_group("EquirectCubemapConverter");
        source.bind_to_unit(0);
        self.shader.set_int("qrk_equirectMap", 0);
        self.helper.multipass_draw(&self.buffer, &self.shader, None)
    }
}

impl TextureSource for EquirectCubemapConverter {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.cubemap()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_cubemap", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}
