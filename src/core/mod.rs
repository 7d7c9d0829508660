//! Core GPU layer: the backend seam, the shared rendering context and the two
//! backend implementations.

pub mod backend;
pub mod context;
pub mod debug;
pub mod headless;
pub mod gpu;

pub use backend::{
    AttachmentPoint, AttachmentResource, BlendMode, BufferBits, CullMode, DepthFunc, DepthState,
    DrawCall, FramebufferId, FramebufferStatus, ProgramId, ProgramKind, ProgramSource, RenderBackend,
    RenderTarget, RenderbufferId, TextureId, Topology, UniformValue, VertexArrayId, Viewport,
};
pub use context::Context;
pub use debug::DebugGroup;
pub use headless::HeadlessBackend;
pub use gpu::WgpuBackend;
