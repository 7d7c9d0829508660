//! Compute programs that write into a texture.

use super::primitives::program_wrapper;
use super::{ShaderProgram, ShaderSource};
use crate::core::Context;
use crate::errors::Result;
use crate::resources::texture::Texture;

program_wrapper!(
    /// A compute stage (`cs_main`) that writes one 2D storage texture.
    ///
    /// The storage texture global must live in `@group(1)`; uniforms work as
    /// on any other program.
    ComputeShader
);

impl ComputeShader {
    pub fn new(ctx: &Context, source: &ShaderSource) -> Result<Self> {
        ShaderProgram::compute(ctx, source).map(Self)
    }

    /// Runs the program over every texel of mip 0 of `texture`. Writes are
    /// visible to commands issued afterwards.
    pub fn dispatch_to_texture(&self, texture: &Texture) -> Result<()> {
        self.activate();
        let (program, target) = (self.id(), texture.id());
        self.context().create(|b| b.dispatch_compute(program, target))
    }
}
