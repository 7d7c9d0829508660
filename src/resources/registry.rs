//! Texture Unit Registry
//!
//! Shaders read textures through numbered units, and several independent
//! subsystems (shadow maps, IBL maps, G-buffer channels, mesh materials) want
//! units in the same program. [`TextureRegistry`] hands them out in a fixed,
//! collision-free order:
//!
//! 1. On [`update_uniforms`](TextureRegistry::update_uniforms) the counter
//!    restarts at 0 and every registered [`TextureSource`] binds its textures,
//!    in registration order, claiming `[0, k)`.
//! 2. Draw-scoped code then claims further units with
//!    [`next_texture_unit`](TextureRegistry::next_texture_unit), bracketed by
//!    a usage block so the counter rewinds for the next draw.
//!
//! ```rust,ignore
//! registry.push_usage_block();
//! let unit = registry.next_texture_unit();
//! texture.bind_to_unit(unit);
//! shader.set_int("material.diffuse[0]", unit as i32);
//! registry.pop_usage_block()?;
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::errors::{QuarkError, Result};
use crate::shader::{ShaderProgram, TextureSource, UniformSource};

/// Shared handle under which texture sources are registered.
pub type SharedTextureSource = Rc<RefCell<dyn TextureSource>>;

/// Allocator of texture units, shared by every pass drawing with one program.
#[derive(Default)]
pub struct TextureRegistry {
    sources: Vec<SharedTextureSource>,
    next_unit: u32,
    usage_blocks: SmallVec<[u32; 4]>,
}

impl fmt::Debug for TextureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureRegistry")
            .field("sources", &self.sources.len())
            .field("next_unit", &self.next_unit)
            .field("usage_blocks", &self.usage_blocks)
            .finish()
    }
}

impl TextureRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry behind the shared handle shaders and passes hold.
    #[must_use]
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Registers a source consulted on every [`update_uniforms`](Self::update_uniforms).
    pub fn add_texture_source<S: TextureSource + 'static>(&mut self, source: Rc<RefCell<S>>) {
        self.sources.push(source);
    }

    pub fn add_shared_texture_source(&mut self, source: SharedTextureSource) {
        self.sources.push(source);
    }

    #[must_use]
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Claims the next free unit.
    pub fn next_texture_unit(&mut self) -> u32 {
        let unit = self.next_unit;
        self.next_unit += 1;
        unit
    }

    /// The unit [`next_texture_unit`](Self::next_texture_unit) would return.
    #[must_use]
    pub fn peek_texture_unit(&self) -> u32 {
        self.next_unit
    }

    /// Saves the counter so the claims that follow can be undone.
    pub fn push_usage_block(&mut self) {
        self.usage_blocks.push(self.next_unit);
    }

    /// Restores the counter saved by the matching
    /// [`push_usage_block`](Self::push_usage_block).
    pub fn pop_usage_block(&mut self) -> Result<()> {
        let saved = self
            .usage_blocks
            .pop()
            .ok_or(QuarkError::TextureUnitStackUnderflow)?;
        self.next_unit = saved;
        Ok(())
    }

    /// Depth of the usage-block stack.
    #[must_use]
    pub fn usage_depth(&self) -> usize {
        self.usage_blocks.len()
    }
}

impl UniformSource for TextureRegistry {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        self.next_unit = 0;
        self.usage_blocks.clear();

        for source in &self.sources {
            self.next_unit = source.borrow_mut().bind_texture(self.next_unit, shader)?;
        }
        log::trace!(
            "Texture registry bound {} sources into units [0, {})",
            self.sources.len(),
            self.next_unit
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_block_rewinds_counter() {
        let mut registry = TextureRegistry::new();
        assert_eq!(registry.next_texture_unit(), 0);

        registry.push_usage_block();
        assert_eq!(registry.next_texture_unit(), 1);
        assert_eq!(registry.next_texture_unit(), 2);
        registry.pop_usage_block().unwrap();

        assert_eq!(registry.next_texture_unit(), 1);
    }

    #[test]
    fn nested_blocks_unwind_in_order() {
        let mut registry = TextureRegistry::new();
        registry.push_usage_block();
        registry.next_texture_unit();
        registry.push_usage_block();
        registry.next_texture_unit();
        registry.next_texture_unit();
        assert_eq!(registry.peek_texture_unit(), 3);

        registry.pop_usage_block().unwrap();
        assert_eq!(registry.peek_texture_unit(), 1);
        registry.pop_usage_block().unwrap();
        assert_eq!(registry.peek_texture_unit(), 0);
    }

    #[test]
    fn pop_on_empty_stack_fails() {
        let mut registry = TextureRegistry::new();
        assert!(matches!(
            registry.pop_usage_block(),
            Err(QuarkError::TextureUnitStackUnderflow)
        ));
    }
}
