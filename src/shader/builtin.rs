//! Built-in shader sources, embedded into the binary.
//!
//! Names are paths relative to `src/shaders/`, e.g. `builtin/screen_quad.vert`.
//! They are what `#pragma qrk_include <...>` resolves against.

use std::borrow::Cow;

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "src/shaders/"]
struct ShaderAssets;

/// Returns the text of a built-in shader.
#[must_use]
pub fn get(name: &str) -> Option<Cow<'static, str>> {
    let file = ShaderAssets::get(name)?;
    match file.data {
        Cow::Borrowed(bytes) => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
        Cow::Owned(bytes) => String::from_utf8(bytes).ok().map(Cow::Owned),
    }
}

/// Names of every built-in shader.
pub fn names() -> impl Iterator<Item = Cow<'static, str>> {
    ShaderAssets::iter()
}
