//! Mesh primitives: plane, cube, room, UV sphere, skybox and screen quad.
//!
//! Lit primitives share one vertex layout, read by shaders at these locations:
//!
//! | Location | Attribute | Components |
//! |----------|-----------|------------|
//! | 0        | position  | 3          |
//! | 1        | normal    | 3          |
//! | 2        | tangent   | 3          |
//! | 3        | uv        | 2          |
//!
//! Model transforms are application state and are not set here.

use std::ops::Deref;
use std::path::Path;

use glam::{Vec2, Vec3};

use super::framebuffer::Attachment;
use super::mesh::{Mesh, MeshData};
use super::registry::TextureRegistry;
use super::texture::{Texture, TextureKind};
use super::texture_map::{TextureMap, TextureMapType};
use super::vertex_array::VertexLayout;
use crate::core::Context;
use crate::errors::{QuarkError, Result};
use crate::shader::ShaderProgram;

/// Default number of meridians and parallels of a [`SphereMesh`].
pub const DEFAULT_SPHERE_SEGMENTS: u32 = 64;

/// Position, normal, tangent, uv.
#[must_use]
pub fn lit_vertex_layout() -> VertexLayout {
    VertexLayout::new().with(3).with(3).with(3).with(2)
}

fn push_vertex(out: &mut Vec<f32>, position: Vec3, normal: Vec3, tangent: Vec3, uv: Vec2) {
    out.extend_from_slice(&position.to_array());
    out.extend_from_slice(&normal.to_array());
    out.extend_from_slice(&tangent.to_array());
    out.extend_from_slice(&uv.to_array());
}

/// Outward normal, u direction and v direction of each cube face.
/// `u x v == normal`, so `(0,0) (1,0) (1,1)` winds counter-clockwise seen
/// from outside.
const CUBE_FACES: [(Vec3, Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Z, Vec3::Y),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y),
    (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z),
    (Vec3::Z, Vec3::X, Vec3::Y),
    (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
];

const QUAD_CORNERS: [Vec2; 6] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
    Vec2::new(0.0, 0.0),
];

/// Two triangles of a unit quad centered at `center`. With `inward` the
/// normal is flipped and the winding reversed.
fn push_face(out: &mut Vec<f32>, center: Vec3, (normal, u, v): (Vec3, Vec3, Vec3), inward: bool) {
    let corner = |uv: Vec2| center + u * (uv.x - 0.5) + v * (uv.y - 0.5);
    if inward {
        for &uv in QUAD_CORNERS.iter().rev() {
            push_vertex(out, corner(uv), -normal, u, uv);
        }
    } else {
        for &uv in &QUAD_CORNERS {
            push_vertex(out, corner(uv), normal, u, uv);
        }
    }
}

fn box_vertices(inward: bool) -> Vec<f32> {
    let mut vertices = Vec::with_capacity(36 * 11);
    for face in CUBE_FACES {
        push_face(&mut vertices, face.0 * 0.5, face, inward);
    }
    vertices
}

fn diffuse_maps(ctx: &Context, texture_path: Option<&Path>) -> Result<Vec<TextureMap>> {
    texture_path
        .map(|path| {
            Texture::load(ctx, path, true).map(|t| vec![TextureMap::new(t, TextureMapType::Diffuse)])
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

macro_rules! mesh_primitive {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(Mesh);

        impl $name {
            /// Loads an optional diffuse texture for the primitive.
            pub fn with_texture(ctx: &Context, texture_path: Option<&Path>) -> Result<Self> {
                Self::new(ctx, diffuse_maps(ctx, texture_path)?)
            }

            #[must_use]
            pub fn into_mesh(self) -> Mesh {
                self.0
            }
        }

        impl Deref for $name {
            type Target = Mesh;

            fn deref(&self) -> &Mesh {
                &self.0
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Mesh {
                &mut self.0
            }
        }
    };
}

mesh_primitive!(
    /// A unit plane in XZ facing +Y.
    PlaneMesh
);

impl PlaneMesh {
    pub fn new(ctx: &Context, texture_maps: Vec<TextureMap>) -> Result<Self> {
        let mut vertices = Vec::with_capacity(6 * 11);
        push_face(&mut vertices, Vec3::ZERO, CUBE_FACES[2], false);
        let data = MeshData {
            layout: lit_vertex_layout(),
            vertices,
            indices: None,
        };
        Mesh::new(ctx, "PlaneMesh", data, texture_maps).map(Self)
    }
}

mesh_primitive!(
    /// A unit cube centered at the origin with outward normals.
    CubeMesh
);

impl CubeMesh {
    pub fn new(ctx: &Context, texture_maps: Vec<TextureMap>) -> Result<Self> {
        let data = MeshData {
            layout: lit_vertex_layout(),
            vertices: box_vertices(false),
            indices: None,
        };
        Mesh::new(ctx, "CubeMesh", data, texture_maps).map(Self)
    }
}

mesh_primitive!(
    /// A unit cube seen from inside: normals point inward.
    RoomMesh
);

impl RoomMesh {
    pub fn new(ctx: &Context, texture_maps: Vec<TextureMap>) -> Result<Self> {
        let data = MeshData {
            layout: lit_vertex_layout(),
            vertices: box_vertices(true),
            indices: None,
        };
        Mesh::new(ctx, "RoomMesh", data, texture_maps).map(Self)
    }
}

mesh_primitive!(
    /// A unit UV sphere.
    SphereMesh
);

impl SphereMesh {
    pub fn new(ctx: &Context, texture_maps: Vec<TextureMap>) -> Result<Self> {
        Self::with_segments(ctx, texture_maps, DEFAULT_SPHERE_SEGMENTS, DEFAULT_SPHERE_SEGMENTS)
    }

    /// At least 3 meridians and 2 parallels are generated.
    pub fn with_segments(
        ctx: &Context,
        texture_maps: Vec<TextureMap>,
        num_meridians: u32,
        num_parallels: u32,
    ) -> Result<Self> {
        let (vertices, indices) = sphere_geometry(num_meridians, num_parallels);
        let data = MeshData {
            layout: lit_vertex_layout(),
            vertices,
            indices: Some(indices),
        };
        Mesh::new(ctx, "SphereMesh", data, texture_maps).map(Self)
    }
}

/// Vertices (one extra wraparound column per row) and triangle indices of a
/// UV sphere, generated top-down.
pub(crate) fn sphere_geometry(num_meridians: u32, num_parallels: u32) -> (Vec<f32>, Vec<u32>) {
    use std::f32::consts::PI;

    let width_segments = num_meridians.max(3);
    let height_segments = num_parallels.max(2);

    let mut vertices = Vec::with_capacity(((width_segments + 1) * (height_segments + 1) * 11) as usize);
    for iy in 0..=height_segments {
        // Nudged off the poles so tangents never have zero length.
        let v = iy as f32 / height_segments as f32 + 1e-5;
        let u_offset = if iy == 0 {
            0.5 / width_segments as f32
        } else if iy == height_segments {
            -0.5 / width_segments as f32
        } else {
            0.0
        };
        for ix in 0..=width_segments {
            let u = ix as f32 / width_segments as f32;
            let position = Vec3::new(
                (u * 2.0 * PI).cos() * (v * PI).sin(),
                (v * PI).cos(),
                (u * 2.0 * PI).sin() * (v * PI).sin(),
            );
            let tangent = Vec3::new(-position.z, 0.0, position.x);
            push_vertex(&mut vertices, position, position, tangent, Vec2::new(u + u_offset, 1.0 - v));
        }
    }

    let stride = width_segments + 1;
    let mut indices = Vec::new();
    for iy in 0..height_segments {
        for ix in 0..width_segments {
            let a = iy * stride + ix + 1;
            let b = iy * stride + ix;
            let c = (iy + 1) * stride + ix;
            let d = (iy + 1) * stride + ix + 1;
            if iy != 0 {
                indices.extend_from_slice(&[a, b, d]);
            }
            if iy != height_segments - 1 {
                indices.extend_from_slice(&[b, c, d]);
            }
        }
    }
    (vertices, indices)
}

// ============================================================================
// Skybox
// ============================================================================

/// A position-only cube spanning `[-1, 1]`, textured with a cubemap bound as
/// `skybox`. Draw it with a [`SkyboxShader`](crate::shader::SkyboxShader).
#[derive(Debug)]
pub struct SkyboxMesh(Mesh);

impl SkyboxMesh {
    pub fn new(ctx: &Context) -> Result<Self> {
        let mut vertices = Vec::with_capacity(36 * 3);
        for (normal, u, v) in CUBE_FACES {
            for uv in QUAD_CORNERS {
                let corner = normal + u * (uv.x * 2.0 - 1.0) + v * (uv.y * 2.0 - 1.0);
                vertices.extend_from_slice(&corner.to_array());
            }
        }
        let data = MeshData {
            layout: VertexLayout::new().with(3),
            vertices,
            indices: None,
        };
        Mesh::new(ctx, "SkyboxMesh", data, Vec::new()).map(Self)
    }

    /// A skybox showing `texture`, which must be a cubemap.
    pub fn with_texture(ctx: &Context, texture: Texture) -> Result<Self> {
        let mut skybox = Self::new(ctx)?;
        skybox.set_texture(texture)?;
        Ok(skybox)
    }

    /// A skybox from six face images, ordered +X, -X, +Y, -Y, +Z, -Z.
    pub fn load<P: AsRef<Path>>(ctx: &Context, faces: &[P]) -> Result<Self> {
        Self::with_texture(ctx, Texture::load_cubemap(ctx, faces)?)
    }

    pub fn set_texture(&mut self, texture: Texture) -> Result<()> {
        if texture.kind() != TextureKind::Cubemap {
            return Err(QuarkError::InvalidTextureType(format!(
                "skybox requires a cubemap, got {:?}",
                texture.kind()
            )));
        }
        self.0.set_texture_maps(vec![TextureMap::new(texture, TextureMapType::Cubemap)]);
        Ok(())
    }

    pub fn set_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        self.set_texture(attachment.as_texture()?)
    }
}

impl Deref for SkyboxMesh {
    type Target = Mesh;

    fn deref(&self) -> &Mesh {
        &self.0
    }
}

// ============================================================================
// Screen quad
// ============================================================================

/// Name of the sampler a [`ScreenQuadMesh`] binds its texture to.
pub const SCREEN_TEXTURE_UNIFORM: &str = "qrk_screenTexture";

/// A quad covering clip space, vertices `(position.xy, uv)`.
#[derive(Debug)]
pub struct ScreenQuadMesh {
    mesh: Mesh,
    texture: Option<Texture>,
}

#[rustfmt::skip]
const SCREEN_QUAD_VERTICES: [f32; 24] = [
    -1.0,  1.0,  0.0, 1.0,
    -1.0, -1.0,  0.0, 0.0,
     1.0, -1.0,  1.0, 0.0,

    -1.0,  1.0,  0.0, 1.0,
     1.0, -1.0,  1.0, 0.0,
     1.0,  1.0,  1.0, 1.0,
];

impl ScreenQuadMesh {
    pub fn new(ctx: &Context) -> Result<Self> {
        let data = MeshData {
            layout: VertexLayout::new().with(2).with(2),
            vertices: SCREEN_QUAD_VERTICES.to_vec(),
            indices: None,
        };
        let mesh = Mesh::new(ctx, "ScreenQuadMesh", data, Vec::new())?;
        Ok(Self { mesh, texture: None })
    }

    pub fn with_texture(ctx: &Context, texture: Texture) -> Result<Self> {
        let mut quad = Self::new(ctx)?;
        quad.set_texture(texture);
        Ok(quad)
    }

    pub fn set_texture(&mut self, texture: Texture) {
        self.texture = Some(texture);
    }

    pub fn set_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        self.texture = Some(attachment.as_texture()?);
        Ok(())
    }

    pub fn unset_texture(&mut self) {
        self.texture = None;
    }

    #[must_use]
    pub fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }

    /// Binds the texture (if any) to `qrk_screenTexture` and draws the quad.
    pub fn draw(&self, shader: &ShaderProgram, registry: Option<&mut TextureRegistry>) -> Result<()> {
        if let Some(texture) = &self.texture {
            match registry {
                Some(registry) => {
                    registry.push_usage_block();
                    let unit = registry.next_texture_unit();
                    texture.bind_to_unit(unit);
                    shader.set_int(SCREEN_TEXTURE_UNIFORM, unit as i32);
                    registry.pop_usage_block()?;
                }
                None => {
                    texture.bind_to_unit(0);
                    shader.set_int(SCREEN_TEXTURE_UNIFORM, 0);
                }
            }
        }
        self.mesh.draw_geometry(shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRIDE: usize = 11;

    fn positions(vertices: &[f32]) -> impl Iterator<Item = Vec3> + '_ {
        vertices.chunks(STRIDE).map(|v| Vec3::new(v[0], v[1], v[2]))
    }

    #[test]
    fn cube_faces_wind_counter_clockwise_from_outside() {
        let vertices = box_vertices(false);
        assert_eq!(vertices.len(), 36 * STRIDE);
        for triangle in vertices.chunks(3 * STRIDE) {
            let p: Vec<Vec3> = positions(triangle).collect();
            let normal = Vec3::new(triangle[3], triangle[4], triangle[5]);
            let face_normal = (p[1] - p[0]).cross(p[2] - p[0]).normalize();
            assert!(face_normal.dot(normal) > 0.99, "winding disagrees with normal {normal}");
        }
    }

    #[test]
    fn room_normals_point_inward() {
        let vertices = box_vertices(true);
        for vertex in vertices.chunks(STRIDE) {
            let position = Vec3::new(vertex[0], vertex[1], vertex[2]);
            let normal = Vec3::new(vertex[3], vertex[4], vertex[5]);
            assert!(position.dot(normal) < 0.0);
        }
    }

    #[test]
    fn sphere_vertices_lie_on_unit_sphere() {
        let (vertices, indices) = sphere_geometry(8, 4);
        assert_eq!(vertices.len(), 9 * 5 * STRIDE);
        for p in positions(&vertices) {
            assert!((p.length() - 1.0).abs() < 1e-4);
        }
        // Pole rows contribute one triangle per segment, inner rows two.
        assert_eq!(indices.len(), (8 * 2 + 8 * 2 * 2) * 3);
        assert!(indices.iter().all(|&i| (i as usize) < 9 * 5));
    }

    #[test]
    fn sphere_segments_have_minimums() {
        let (vertices, _) = sphere_geometry(0, 0);
        assert_eq!(vertices.len(), 4 * 3 * STRIDE);
    }
}
