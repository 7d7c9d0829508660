//! # Quark
//!
//! A real-time 3D rendering core in the style of a classic GL toolkit,
//! running on wgpu. Its building blocks:
//!
//! - [`core`]: the [`Context`] handle and the backend seam, with a wgpu backend
//!   and a recording [`HeadlessBackend`] for tests
//! - [`resources`]: textures, [`Framebuffer`]s and their attachments, the
//!   [`TextureRegistry`], vertex arrays, meshes and primitives
//! - [`shader`]: [`ShaderProgram`] with the [`UniformSource`] /
//!   [`TextureSource`] protocol and the WGSL preprocessor
//! - [`passes`]: multi-pass effects (ping-pong blur, bloom, cubemap
//!   rendering, IBL precomputation, SSAO, G-buffer)
//! - [`scene`]: cameras, lights, shadow mapping and per-frame window uniforms
//! - [`app`]: an optional winit shell (feature `winit`)
//!
//! ```rust,ignore
//! use quark::prelude::*;
//!
//! let ctx = Context::offscreen(ContextSettings::default())?;
//! let mut hdr = Framebuffer::new(&ctx, 800, 600)?;
//! hdr.attach_texture(BufferType::ColorHdrAlpha)?;
//! hdr.attach_renderbuffer(BufferType::DepthAndStencil)?;
//!
//! let mut bloom = BloomPass::new(&ctx, 800, 600)?;
//! bloom.multipass_draw(&hdr)?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod errors;
pub mod input;
pub mod passes;
pub mod resources;
pub mod scene;
pub mod settings;
pub mod shader;

#[cfg(feature = "winit")]
pub mod app;

pub use crate::core::{Context, HeadlessBackend, WgpuBackend};
pub use errors::{ErrorCategory, QuarkError, Result};
pub use resources::{Attachment, BufferType, Framebuffer, Texture, TextureRegistry};
pub use settings::ContextSettings;
pub use shader::{ShaderProgram, ShaderSource, TextureSource, UniformSource};

/// The types most programs need.
pub mod prelude {
    pub use crate::core::{BlendMode, BufferBits, Context, DepthFunc};
    pub use crate::errors::{QuarkError, Result};
    pub use crate::input::{ButtonState, InputState, Key, MouseButton};
    pub use crate::passes::{
        BloomPass, CubemapIrradianceCalculator, DeferredGeometryPassShader,
        EquirectCubemapConverter, GBuffer, GgxBrdfIntegrationCalculator,
        GgxPrefilteredEnvMapCalculator, PingPongPass, SsaoBlurShader, SsaoBuffer, SsaoKernel,
        SsaoShader,
    };
    pub use crate::resources::{
        BufferType, CubeMesh, Framebuffer, Mesh, PlaneMesh, RoomMesh, ScreenQuadMesh,
        SkyboxMesh, SphereMesh, Texture, TextureFiltering, TextureMap, TextureMapType,
        TextureParams, TextureRegistry, TextureWrapMode,
    };
    pub use crate::scene::{
        Camera, CameraControls, DirectionalLight, FlyCameraControls, LightRegistry,
        OrbitCameraControls, PointLight, ShadowCamera, ShadowMap, SpotLight, WindowUniforms,
    };
    pub use crate::settings::ContextSettings;
    pub use crate::shader::{
        ComputeShader, GaussianBlurShader, ScreenShader, ShaderProgram, ShaderSource, SkyboxShader,
        TextureSource, UniformSource,
    };
}
