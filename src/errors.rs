//! Error Types
//!
//! This module defines the error type used throughout the engine.
//!
//! # Overview
//!
//! [`QuarkError`] covers every failure mode of the rendering core. Variants are
//! grouped by subsystem, and [`QuarkError::category`] exposes that grouping so
//! callers can tell a resource-configuration mistake from a shader build
//! failure without matching on every variant:
//!
//! | Category                      | Examples                                              |
//! |-------------------------------|-------------------------------------------------------|
//! | [`ErrorCategory::Context`]    | adapter/device/surface creation, use after shutdown   |
//! | [`ErrorCategory::Resource`]   | buffer-type collision, incomplete framebuffer, bad mip |
//! | [`ErrorCategory::Shader`]     | stage compilation, program link                       |
//! | [`ErrorCategory::Protocol`]   | light view invariant, registry stack underflow        |
//! | [`ErrorCategory::Io`]         | unreadable shader/texture files                       |
//!
//! Nothing in the core retries. Every error is raised where it is detected and
//! is expected to propagate with `?` up to the frame loop.
//!
//! ```rust,ignore
//! use quark::errors::{QuarkError, Result};
//!
//! fn setup() -> Result<()> {
//!     let attachment = framebuffer.attach_texture(BufferType::ColorHdrAlpha)?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::resources::framebuffer::BufferType;
use crate::shader::ShaderStage;

/// Coarse classification of a [`QuarkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Context,
    Resource,
    Shader,
    Protocol,
    Io,
}

/// The main error type for the Quark engine.
#[derive(Error, Debug)]
pub enum QuarkError {
    // ========================================================================
    // Context & GPU Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Failed to create or configure the presentation surface.
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Window handle could not be obtained.
    #[error("Window system error: {0}")]
    WindowError(#[from] raw_window_handle::HandleError),

    /// The windowing event loop failed to start or exited abnormally.
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// The context was shut down; no further resources can be created.
    #[error("Rendering context has been shut down")]
    ContextShutdown,

    /// A handle that does not belong to the live backend was used.
    #[error("Unknown {kind} handle")]
    UnknownHandle { kind: &'static str },

    // ========================================================================
    // Resource Configuration Errors
    // ========================================================================
    /// A depth/stencil slot is already occupied on this framebuffer.
    #[error("ERROR::FRAMEBUFFER::BUFFER_TYPE_COLLISION: {0:?} conflicts with an existing attachment")]
    BufferTypeCollision(BufferType),

    /// No attachment of the requested type exists on this framebuffer.
    #[error("ERROR::FRAMEBUFFER::ATTACHMENT_NOT_FOUND: {0:?}")]
    AttachmentNotFound(BufferType),

    /// The backend reported the framebuffer as incomplete.
    #[error("ERROR::FRAMEBUFFER::INCOMPLETE: {0}")]
    FramebufferIncomplete(String),

    /// A buffer type that cannot be stored the requested way.
    #[error("ERROR::FRAMEBUFFER::INVALID_BUFFER_TYPE: {buffer_type:?} ({reason})")]
    InvalidBufferType {
        buffer_type: BufferType,
        reason: &'static str,
    },

    /// Cubemap face outside `[0, 6)`.
    #[error("ERROR::FRAMEBUFFER::INVALID_CUBEMAP_FACE: {0}")]
    InvalidCubemapFace(i32),

    /// A cubemap face was requested but an attachment is not a cubemap texture.
    #[error("ERROR::FRAMEBUFFER::NOT_A_CUBEMAP: attachment cannot target cubemap face {0}")]
    NotACubemap(i32),

    /// A non-zero mip or a cubemap face was requested on a renderbuffer attachment.
    #[error("ERROR::FRAMEBUFFER::RENDERBUFFER_TARGET: renderbuffers only support mip 0 without a face (mip {mip}, face {face})")]
    RenderbufferTarget { mip: u32, face: i32 },

    /// Mip level beyond the attachment's mip chain.
    #[error("ERROR::FRAMEBUFFER::MIP_OUT_OF_RANGE: mip {level} with {num_mips} mips")]
    MipLevelOutOfRange { level: u32, num_mips: u32 },

    /// Blit between incompatible targets.
    #[error("ERROR::FRAMEBUFFER::BLIT: {0}")]
    BlitUnsupported(String),

    // ========================================================================
    // Texture Errors
    // ========================================================================
    /// A texture file could not be read or decoded.
    #[error("ERROR::TEXTURE::LOAD_FAILED: {}: {reason}", .path.display())]
    TextureLoadFailed { path: PathBuf, reason: String },

    /// A texture file had an unsupported channel count.
    #[error("ERROR::TEXTURE::UNSUPPORTED_TEXTURE_FORMAT: '{}' contained unsupported number of channels: {channels}", .path.display())]
    UnsupportedTextureFormat { path: PathBuf, channels: u8 },

    /// Cubemap faces are not square or not the same size.
    #[error("ERROR::TEXTURE::INVALID_TEXTURE_SIZE: {0}")]
    InvalidTextureSize(String),

    /// Invalid argument to a texture constructor.
    #[error("ERROR::TEXTURE::INVALID_ARGUMENT: {0}")]
    InvalidTextureArgument(String),

    /// A mesh primitive was given the wrong kind of texture.
    #[error("ERROR::MESH_PRIMITIVE::INVALID_TEXTURE_TYPE: {0}")]
    InvalidTextureType(String),

    /// Vertex, index or instance data that does not fit its layout.
    #[error("ERROR::VERTEX_ARRAY::INVALID_DATA: {0}")]
    InvalidVertexData(String),

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecodeError(String),

    // ========================================================================
    // Shader Build Errors
    // ========================================================================
    /// Stage compilation failed; carries the compiler log and the offending source.
    #[error("ERROR::SHADER::{stage}::COMPILATION_FAILED\n{log}")]
    ShaderCompile {
        stage: ShaderStage,
        log: String,
        shader_source: String,
    },

    /// Program link failed.
    #[error("ERROR::SHADER::PROGRAM::LINKING_FAILED\n{0}")]
    ShaderLink(String),

    /// A stage loaded from a path with the wrong file extension.
    #[error("ERROR::SHADER_LOADER::INVALID_EXTENSION: Loaded {stage} shader '{}' must end in '{expected}'.", .path.display())]
    ShaderExtensionMismatch {
        stage: ShaderStage,
        path: PathBuf,
        expected: &'static str,
    },

    /// Malformed include directive.
    #[error("ERROR::SHADER_LOADER::INVALID_INCLUDE: {line}\n{traceback}")]
    InvalidInclude { line: String, traceback: String },

    /// An include chain that loops back on itself.
    #[error("ERROR::SHADER_LOADER::CIRCULAR_INCLUDE: {}\n{traceback}", .path.display())]
    CircularInclude { path: PathBuf, traceback: String },

    /// A shader file (or an include) could not be read.
    #[error("ERROR::SHADER_LOADER::FILE_NOT_SUCCESSFULLY_READ: {}\n{traceback}", .path.display())]
    ShaderIo {
        path: PathBuf,
        traceback: String,
        #[source]
        source: std::io::Error,
    },

    // ========================================================================
    // Protocol Violations
    // ========================================================================
    /// A light's spatial state changed without a fresh `apply_view_transform`.
    #[error("ERROR::LIGHT::VIEW_CHANGED: Light state changed without re-applying view transform.")]
    LightViewTransformNotApplied,

    /// `pop_usage_block` on an empty stack.
    #[error("ERROR::TEXTURE_REGISTRY::POP: usage-block stack is empty")]
    TextureUnitStackUnderflow,

    /// Bloom source mip outside the chain.
    #[error("ERROR::BLOOM::SOURCE_MIP_OUT_OF_RANGE: mip {level} with {num_mips} mips")]
    SourceMipOutOfRange { level: i32, num_mips: u32 },

    /// Kernel larger than the sample array the SSAO shader declares.
    #[error("ERROR::SSAO::KERNEL_SIZE: {size} samples, at most {max}")]
    SsaoKernelSize { size: u32, max: u32 },

    /// A draw was issued with no program active.
    #[error("Draw issued without an active shader program")]
    NoActiveProgram,

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl QuarkError {
    /// Returns the subsystem this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AdapterRequestFailed(_)
            | Self::DeviceCreateFailed(_)
            | Self::SurfaceError(_)
            | Self::WindowError(_)
            | Self::EventLoop(_)
            | Self::ContextShutdown
            | Self::UnknownHandle { .. } => ErrorCategory::Context,

            Self::BufferTypeCollision(_)
            | Self::AttachmentNotFound(_)
            | Self::FramebufferIncomplete(_)
            | Self::InvalidBufferType { .. }
            | Self::InvalidCubemapFace(_)
            | Self::NotACubemap(_)
            | Self::RenderbufferTarget { .. }
            | Self::MipLevelOutOfRange { .. }
            | Self::BlitUnsupported(_)
            | Self::UnsupportedTextureFormat { .. }
            | Self::InvalidTextureSize(_)
            | Self::InvalidTextureArgument(_)
            | Self::InvalidTextureType(_)
            | Self::InvalidVertexData(_)
            | Self::SsaoKernelSize { .. } => ErrorCategory::Resource,

            Self::ShaderCompile { .. }
            | Self::ShaderLink(_)
            | Self::InvalidInclude { .. }
            | Self::CircularInclude { .. } => ErrorCategory::Shader,

            Self::LightViewTransformNotApplied
            | Self::TextureUnitStackUnderflow
            | Self::SourceMipOutOfRange { .. }
            | Self::NoActiveProgram
            | Self::ShaderExtensionMismatch { .. } => ErrorCategory::Protocol,

            Self::TextureLoadFailed { .. }
            | Self::ImageDecodeError(_)
            | Self::ShaderIo { .. }
            | Self::IoError(_) => ErrorCategory::Io,
        }
    }
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<image::ImageError> for QuarkError {
    fn from(err: image::ImageError) -> Self {
        QuarkError::ImageDecodeError(err.to_string())
    }
}

impl From<wgpu::CreateSurfaceError> for QuarkError {
    fn from(err: wgpu::CreateSurfaceError) -> Self {
        QuarkError::SurfaceError(err.to_string())
    }
}

/// Alias for `Result<T, QuarkError>`.
pub type Result<T> = std::result::Result<T, QuarkError>;
