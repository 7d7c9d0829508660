//! Texture maps: a texture tagged with how a mesh material uses it.

use std::fmt;

use super::texture::Texture;

/// How a mesh samples a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureMapType {
    Diffuse,
    Specular,
    Emission,
    Cubemap,
}

impl TextureMapType {
    pub const ALL: [Self; 4] = [Self::Diffuse, Self::Specular, Self::Emission, Self::Cubemap];

    /// Field of the `material` uniform struct this map type feeds, if any.
    #[must_use]
    pub fn material_field(self) -> Option<&'static str> {
        match self {
            Self::Diffuse => Some("diffuse"),
            Self::Specular => Some("specular"),
            Self::Emission => Some("emission"),
            Self::Cubemap => None,
        }
    }
}

impl fmt::Display for TextureMapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Diffuse => "diffuse",
            Self::Specular => "specular",
            Self::Emission => "emission",
            Self::Cubemap => "cubemap",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureMap {
    texture: Texture,
    map_type: TextureMapType,
}

impl TextureMap {
    #[must_use]
    pub fn new(texture: Texture, map_type: TextureMapType) -> Self {
        Self { texture, map_type }
    }

    #[must_use]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    #[must_use]
    pub fn map_type(&self) -> TextureMapType {
        self.map_type
    }
}
