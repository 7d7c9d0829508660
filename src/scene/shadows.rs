//! Directional shadow mapping.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};

use super::light::DirectionalLight;
use crate::core::Context;
use crate::errors::Result;
use crate::resources::framebuffer::{Attachment, BufferType, Framebuffer};
use crate::resources::texture::{TextureFiltering, TextureParams, TextureWrapMode};
use crate::shader::{ShaderProgram, TextureSource, UniformSource};

pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 1024;

pub const DEFAULT_CUBOID_EXTENTS: f32 = 10.0;
pub const DEFAULT_NEAR_PLANE: f32 = 0.1;
pub const DEFAULT_FAR_PLANE: f32 = 15.0;
pub const DEFAULT_DISTANCE_FROM_ORIGIN: f32 = 7.0;

/// Orthographic camera looking along a directional light.
///
/// Sets `lightViewProjection` on the programs it is attached to.
#[derive(Debug, Clone)]
pub struct ShadowCamera {
    light: Rc<RefCell<DirectionalLight>>,
    cuboid_extents: f32,
    near: f32,
    far: f32,
    distance_from_origin: f32,
    world_up: Vec3,
}

impl ShadowCamera {
    #[must_use]
    pub fn new(light: Rc<RefCell<DirectionalLight>>) -> Self {
        Self {
            light,
            cuboid_extents: DEFAULT_CUBOID_EXTENTS,
            near: DEFAULT_NEAR_PLANE,
            far: DEFAULT_FAR_PLANE,
            distance_from_origin: DEFAULT_DISTANCE_FROM_ORIGIN,
            world_up: Vec3::Y,
        }
    }

    /// Half size of the orthographic box.
    #[must_use]
    pub fn with_cuboid_extents(mut self, extents: f32) -> Self {
        self.cuboid_extents = extents;
        self
    }

    #[must_use]
    pub fn with_clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    #[must_use]
    pub fn with_distance_from_origin(mut self, distance: f32) -> Self {
        self.distance_from_origin = distance;
        self
    }

    #[must_use]
    pub fn with_world_up(mut self, world_up: Vec3) -> Self {
        self.world_up = world_up;
        self
    }

    #[must_use]
    pub fn light(&self) -> &Rc<RefCell<DirectionalLight>> {
        &self.light
    }

    #[must_use]
    pub fn view_transform(&self) -> Mat4 {
        let direction = self.light.borrow().direction();
        let eye = -direction * self.distance_from_origin;
        let mut up = self.world_up;
        // A light pointing straight along the up vector has no defined roll.
        if direction.cross(up).length_squared() < 1e-8 {
            up = Vec3::Z;
        }
        Mat4::look_at_rh(eye, Vec3::ZERO, up)
    }

    #[must_use]
    pub fn projection_transform(&self) -> Mat4 {
        let e = self.cuboid_extents;
        Mat4::orthographic_rh(-e, e, -e, e, self.near, self.far)
    }

    #[must_use]
    pub fn light_view_projection(&self) -> Mat4 {
        self.projection_transform() * self.view_transform()
    }
}

impl UniformSource for ShadowCamera {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        shader.set_mat4("lightViewProjection", self.light_view_projection());
        Ok(())
    }
}

/// Depth-only framebuffer the scene is rendered into from the light.
///
/// As a [`TextureSource`] it binds the depth texture as `shadowMap`. Samples
/// outside the map read depth 1.0, i.e. unshadowed.
#[derive(Debug)]
pub struct ShadowMap {
    framebuffer: Framebuffer,
    depth: Attachment,
}

impl ShadowMap {
    pub fn new(ctx: &Context) -> Result<Self> {
        Self::with_size(ctx, DEFAULT_SHADOW_MAP_SIZE, DEFAULT_SHADOW_MAP_SIZE)
    }

    pub fn with_size(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut framebuffer = Framebuffer::new(ctx, width, height)?;
        let params = TextureParams {
            filtering: TextureFiltering::Nearest,
            wrap_mode: TextureWrapMode::ClampToBorder,
            border_color: Vec4::ONE,
            ..TextureParams::default()
        };
        let depth = framebuffer.attach_texture_with_params(BufferType::Depth, &params)?;
        Ok(Self { framebuffer, depth })
    }

    #[must_use]
    pub fn depth_attachment(&self) -> &Attachment {
        &self.depth
    }
}

impl Deref for ShadowMap {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        &self.framebuffer
    }
}

impl DerefMut for ShadowMap {
    fn deref_mut(&mut self) -> &mut Framebuffer {
        &mut self.framebuffer
    }
}

impl TextureSource for ShadowMap {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.depth.as_texture()?.bind_to_unit(next_texture_unit);
        shader.set_int("shadowMap", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}
