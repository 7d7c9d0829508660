//! Meshes
//!
//! A [`Mesh`] is a vertex array plus the texture maps its material samples.
//! Drawing binds the maps inside a usage block of the [`TextureRegistry`], so
//! the units a mesh claims are released again for the next draw:
//!
//! | Map type | Sampler uniform          |
//! |----------|--------------------------|
//! | Diffuse  | `material.diffuse[i]`    |
//! | Specular | `material.specular[i]`   |
//! | Emission | `material.emission[i]`   |
//! | Cubemap  | `skybox`                 |
//!
//! and `material.diffuseCount`, `material.specularCount` and
//! `material.emissionCount` carry how many maps of each kind are bound.

use glam::Mat4;

use super::registry::TextureRegistry;
use super::texture_map::{TextureMap, TextureMapType};
use super::vertex_array::{VertexArray, VertexLayout};
use crate::core::backend::Topology;
use crate::core::Context;
use crate::errors::Result;
use crate::shader::ShaderProgram;

/// Floats in one per-instance model matrix.
const MAT4_FLOATS: usize = 16;

/// CPU-side geometry handed to [`Mesh::new`].
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub layout: VertexLayout,
    /// Interleaved vertices, `layout.vertex_stride()` floats each.
    pub vertices: Vec<f32>,
    pub indices: Option<Vec<u32>>,
}

/// A triangle mesh with texture maps.
#[derive(Debug)]
pub struct Mesh {
    vertex_array: VertexArray,
    texture_maps: Vec<TextureMap>,
    instanced: bool,
}

impl Mesh {
    pub fn new(ctx: &Context, label: &str, data: MeshData, texture_maps: Vec<TextureMap>) -> Result<Self> {
        Self::build(ctx, label, data, texture_maps, false)
    }

    /// A mesh drawn once per model matrix loaded with
    /// [`load_instance_models`](Self::load_instance_models). The matrices are
    /// read as four `vec4` attributes following the vertex attributes.
    pub fn instanced(
        ctx: &Context,
        label: &str,
        data: MeshData,
        texture_maps: Vec<TextureMap>,
    ) -> Result<Self> {
        Self::build(ctx, label, data, texture_maps, true)
    }

    fn build(
        ctx: &Context,
        label: &str,
        data: MeshData,
        texture_maps: Vec<TextureMap>,
        instanced: bool,
    ) -> Result<Self> {
        let mut layout = data.layout;
        if instanced {
            for _ in 0..4 {
                layout.add_attribute(4, 1);
            }
        }
        let vertex_array = VertexArray::new(ctx, label, &layout, data.vertices, data.indices)?;
        Ok(Self {
            vertex_array,
            texture_maps,
            instanced,
        })
    }

    #[must_use]
    pub fn vertex_array(&self) -> &VertexArray {
        &self.vertex_array
    }

    #[must_use]
    pub fn texture_maps(&self) -> &[TextureMap] {
        &self.texture_maps
    }

    pub fn set_texture_maps(&mut self, texture_maps: Vec<TextureMap>) {
        self.texture_maps = texture_maps;
    }

    #[must_use]
    pub fn is_instanced(&self) -> bool {
        self.instanced
    }

    /// Uploads one model matrix per instance.
    pub fn load_instance_models(&mut self, models: &[Mat4]) -> Result<()> {
        let mut data = Vec::with_capacity(models.len() * MAT4_FLOATS);
        for model in models {
            data.extend_from_slice(&model.to_cols_array());
        }
        self.vertex_array.load_instance_data(&data)
    }

    /// Binds the texture maps and draws the mesh with `shader`.
    pub fn draw(&self, shader: &ShaderProgram, registry: Option<&mut TextureRegistry>) -> Result<()> {
        self.bind_textures(shader, registry)?;
        self.draw_geometry(shader)
    }

    /// Draws the vertex array with `shader` active, without touching textures.
    pub fn draw_geometry(&self, shader: &ShaderProgram) -> Result<()> {
        shader.activate();
        let result = self.vertex_array.draw(Topology::Triangles);
        shader.deactivate();
        result
    }

    fn bind_textures(&self, shader: &ShaderProgram, mut registry: Option<&mut TextureRegistry>) -> Result<()> {
        let mut unit = match registry.as_deref_mut() {
            Some(registry) => {
                registry.push_usage_block();
                registry.next_texture_unit()
            }
            None => 0,
        };

        let (mut diffuse, mut specular, mut emission) = (0, 0, 0);
        for map in &self.texture_maps {
            let sampler = match map.map_type() {
                TextureMapType::Cubemap => "skybox".to_string(),
                TextureMapType::Diffuse => material_sampler("diffuse", &mut diffuse),
                TextureMapType::Specular => material_sampler("specular", &mut specular),
                TextureMapType::Emission => material_sampler("emission", &mut emission),
            };
            map.texture().bind_to_unit(unit);
            shader.set_int(&sampler, unit as i32);

            unit = match registry.as_deref_mut() {
                Some(registry) => registry.next_texture_unit(),
                None => unit + 1,
            };
        }

        if let Some(registry) = registry {
            registry.pop_usage_block()?;
        }
        shader.set_int("material.diffuseCount", diffuse);
        shader.set_int("material.specularCount", specular);
        shader.set_int("material.emissionCount", emission);
        Ok(())
    }
}

fn material_sampler(field: &str, index: &mut i32) -> String {
    let name = format!("material.{field}[{index}]");
    *index += 1;
    name
}
