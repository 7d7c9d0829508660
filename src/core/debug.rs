//! Scoped GPU debug markers.

use super::context::Context;

/// A debug group that is pushed on creation and popped on drop, on every exit
/// path including `?` early returns.
///
/// ```rust,ignore
/// let _group = ctx.debug_group("Bloom");
/// bloom.multipass_draw(&source)?;
/// ```
pub struct DebugGroup {
    ctx: Context,
}

impl DebugGroup {
    pub fn new(ctx: &Context, label: &str) -> Self {
        ctx.command(|b| b.push_debug_group(label));
        Self { ctx: ctx.clone() }
    }
}

impl Drop for DebugGroup {
    fn drop(&mut self) {
        self.ctx.command(|b| b.pop_debug_group());
    }
}
