//! GPU resources
//!
//! - [`Texture`]: 2D textures and cubemaps, loaded or allocated
//! - [`Framebuffer`] and its [`Attachment`]s
//! - [`TextureRegistry`]: assigns texture units to texture sources
//! - [`VertexArray`] / [`Mesh`] and the built-in primitives

pub mod framebuffer;
pub mod mesh;
pub mod primitives;
pub mod registry;
pub mod texture;
pub mod texture_map;
pub mod vertex_array;

pub use framebuffer::{Attachment, AttachmentTarget, BufferType, CUBEMAP_FACES, Framebuffer};
pub use mesh::{Mesh, MeshData};
pub use primitives::{
    CubeMesh, PlaneMesh, RoomMesh, SCREEN_TEXTURE_UNIFORM, ScreenQuadMesh, SkyboxMesh, SphereMesh,
};
pub use registry::{SharedTextureSource, TextureRegistry};
pub use texture::{
    ImageSize, MipGeneration, Texture, TextureFiltering, TextureFormat, TextureKind,
    TextureParams, TextureWrapMode,
};
pub use texture_map::{TextureMap, TextureMapType};
pub use vertex_array::{VertexArray, VertexLayout};
