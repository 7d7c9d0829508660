//! Ping-pong buffering for iterative separable filters.

use crate::core::Context;
use crate::errors::Result;
use crate::resources::{
    Attachment, BufferType, Framebuffer, ImageSize, ScreenQuadMesh, Texture, TextureRegistry,
};
use crate::shader::{ShaderProgram, TextureSource};

/// Two framebuffers, each with one HDR color attachment, that are rendered
/// into alternately.
#[derive(Debug)]
pub struct PingPongPass {
    buffers: [Framebuffer; 2],
    attachments: [Attachment; 2],
    screen_quad: ScreenQuadMesh,
}

impl PingPongPass {
    pub fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let mut first = Framebuffer::new(ctx, width, height)?;
        let mut second = Framebuffer::new(ctx, width, height)?;
        let attachments = [
            first.attach_texture(BufferType::ColorHdrAlpha)?,
            second.attach_texture(BufferType::ColorHdrAlpha)?,
        ];
        Ok(Self {
            buffers: [first, second],
            attachments,
            screen_quad: ScreenQuadMesh::new(ctx)?,
        })
    }

    pub fn from_size(ctx: &Context, size: ImageSize) -> Result<Self> {
        Self::new(ctx, size.width, size.height)
    }

    /// Runs `passes` full ping-pong cycles, i.e. `2 * passes` draws.
    ///
    /// The first draw reads `source` and writes buffer 0; every later draw
    /// reads the buffer written last and writes the other one. `callback`
    /// runs before each draw with the iteration index, e.g. to flip the blur
    /// direction. The result always ends up in [`output`](Self::output).
    pub fn multipass_draw(
        &mut self,
        source: &Texture,
        shader: &ShaderProgram,
        passes: u32,
        mut callback: impl FnMut(u32),
        mut registry: Option<&mut TextureRegistry>,
    ) -> Result<()> {
        let _group = shader.context().debug_group("PingPongPass");
        let mut target = 0;
        let mut current = source.clone();

        for iteration in 0..draw_count(passes) {
            self.buffers[target].activate()?;
            callback(iteration);
            self.screen_quad.set_texture(current);
            self.screen_quad.draw(shader, registry.as_deref_mut())?;

            current = self.attachments[target].as_texture()?;
            target = 1 - target;
        }

        self.buffers[0].deactivate();
        log::trace!("PingPongPass ran {passes} passes");
        Ok(())
    }

    pub fn output(&self) -> Result<Texture> {
        self.attachments[1].as_texture()
    }
}

/// Each pass is a horizontal and a vertical draw.
fn draw_count(passes: u32) -> u32 {
    passes.saturating_mul(2)
}

impl TextureSource for PingPongPass {
    fn bind_texture(&mut self, next_texture_unit: u32, shader: &ShaderProgram) -> Result<u32> {
        self.output()?.bind_to_unit(next_texture_unit);
        shader.set_int("qrk_pingPongOutput", next_texture_unit as i32);
        Ok(next_texture_unit + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_count_saturates() {
        assert_eq!(draw_count(0), 0);
        assert_eq!(draw_count(5), 10);
        assert_eq!(draw_count(u32::MAX / 2 + 1), u32::MAX);
        assert_eq!(draw_count(u32::MAX), u32::MAX);
    }
}
