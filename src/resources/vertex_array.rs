//! Vertex arrays.
//!
//! A [`VertexArray`] owns one interleaved vertex buffer, an optional index
//! buffer and an optional per-instance buffer. Attributes are all `f32`
//! vectors and are numbered in the order they were added, which is the
//! `@location` the vertex shader reads them from.

use crate::core::backend::{
    DrawCall, Topology, VertexArrayDescriptor, VertexArrayId, VertexAttribute,
};
use crate::core::Context;
use crate::errors::{QuarkError, Result};

/// Attribute list of a vertex array, built in location order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a per-vertex attribute of `components` floats.
    #[must_use]
    pub fn with(mut self, components: u8) -> Self {
        self.add_attribute(components, 0);
        self
    }

    pub fn add_attribute(&mut self, components: u8, instance_divisor: u32) {
        self.attributes.push(VertexAttribute {
            components,
            instance_divisor,
        });
    }

    #[must_use]
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Floats per vertex.
    #[must_use]
    pub fn vertex_stride(&self) -> u32 {
        self.stride(|a| a.instance_divisor == 0)
    }

    /// Floats per instance.
    #[must_use]
    pub fn instance_stride(&self) -> u32 {
        self.stride(|a| a.instance_divisor != 0)
    }

    fn stride(&self, filter: impl Fn(&VertexAttribute) -> bool) -> u32 {
        self.attributes
            .iter()
            .filter(|a| filter(a))
            .map(|a| u32::from(a.components))
            .sum()
    }
}

/// GPU vertex, index and instance buffers plus their layout.
#[derive(Debug)]
pub struct VertexArray {
    ctx: Context,
    id: VertexArrayId,
    num_vertices: u32,
    num_indices: Option<u32>,
    num_instances: u32,
    instance_stride: u32,
}

impl VertexArray {
    pub fn new(
        ctx: &Context,
        label: &str,
        layout: &VertexLayout,
        vertex_data: Vec<f32>,
        indices: Option<Vec<u32>>,
    ) -> Result<Self> {
        let stride = layout.vertex_stride();
        if stride == 0 || vertex_data.len() % stride as usize != 0 {
            return Err(QuarkError::InvalidVertexData(format!(
                "vertex data of '{label}' ({} floats) is not a multiple of the vertex stride {stride}",
                vertex_data.len()
            )));
        }
        let num_vertices = (vertex_data.len() / stride as usize) as u32;
        let num_indices = indices.as_ref().map(|i| i.len() as u32);

        let desc = VertexArrayDescriptor {
            label: label.to_string(),
            attributes: layout.attributes().to_vec(),
            vertex_data,
            instance_data: Vec::new(),
            indices,
        };
        let id = ctx.create(|b| b.create_vertex_array(&desc))?;
        log::debug!("Created vertex array '{label}' ({num_vertices} vertices)");

        Ok(Self {
            ctx: ctx.clone(),
            id,
            num_vertices,
            num_indices,
            num_instances: 0,
            instance_stride: layout.instance_stride(),
        })
    }

    #[must_use]
    pub fn id(&self) -> VertexArrayId {
        self.id
    }

    #[must_use]
    pub fn num_vertices(&self) -> u32 {
        self.num_vertices
    }

    #[must_use]
    pub fn num_indices(&self) -> Option<u32> {
        self.num_indices
    }

    #[must_use]
    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    /// Replaces the per-instance data. The instance count follows from the
    /// instance stride of the layout.
    pub fn load_instance_data(&mut self, data: &[f32]) -> Result<()> {
        if self.instance_stride == 0 || data.len() % self.instance_stride as usize != 0 {
            return Err(QuarkError::InvalidVertexData(format!(
                "instance data ({} floats) does not match the instance stride {}",
                data.len(),
                self.instance_stride
            )));
        }
        let id = self.id;
        self.ctx.create(|b| b.update_instance_data(id, data))?;
        self.num_instances = (data.len() / self.instance_stride as usize) as u32;
        Ok(())
    }

    /// Draws every element, instanced when instance data is loaded. An
    /// instanced layout with no instances loaded draws nothing.
    pub fn draw(&self, topology: Topology) -> Result<()> {
        if self.instance_stride > 0 && self.num_instances == 0 {
            log::trace!("Skipping draw of vertex array without instances");
            return Ok(());
        }
        let (count, indexed) = match self.num_indices {
            Some(count) => (count, true),
            None => (self.num_vertices, false),
        };
        let call = DrawCall {
            vertex_array: self.id,
            topology,
            elements: 0..count,
            indexed,
            instances: self.num_instances.max(1),
        };
        self.ctx.create(|b| b.draw(&call))
    }
}

impl Drop for VertexArray {
    fn drop(&mut self) {
        if self.ctx.is_active() {
            let id = self.id;
            self.ctx.command(|b| b.destroy_vertex_array(id));
        }
    }
}
