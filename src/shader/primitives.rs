//! Built-in shader programs.
//!
//! Each wrapper derefs to [`ShaderProgram`], so they can be used wherever a
//! program is expected.

use super::{ProgramFlags, ShaderProgram, ShaderSource};
use crate::core::Context;
use crate::errors::Result;

macro_rules! program_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(ShaderProgram);

        impl ::std::ops::Deref for $name {
            type Target = ShaderProgram;

            fn deref(&self) -> &ShaderProgram {
                &self.0
            }
        }

        impl $name {
            #[must_use]
            pub fn into_program(self) -> ShaderProgram {
                self.0
            }
        }

        impl AsRef<ShaderProgram> for $name {
            fn as_ref(&self) -> &ShaderProgram {
                &self.0
            }
        }
    };
}

pub(crate) use program_wrapper;

program_wrapper!(
    /// Renders a cubemap behind all other geometry. The vertex stage writes
    /// depth 1.0, so the program switches to `LessEqual` depth testing while
    /// active, and the translation of `view` is dropped.
    SkyboxShader
);

impl SkyboxShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ShaderProgram::with_flags(
            ctx,
            &ShaderSource::builtin("builtin/skybox.vert"),
            &ShaderSource::builtin("builtin/skybox.frag"),
            ProgramFlags::SKYBOX_VIEW | ProgramFlags::DEPTH_LEQUAL,
        )
        .map(Self)
    }
}

program_wrapper!(
    /// Draws `qrk_screenTexture` over a screen quad, optionally through a
    /// custom fragment stage.
    ScreenShader
);

impl ScreenShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        Self::with_fragment(ctx, &ShaderSource::builtin("builtin/screen_quad.frag"))
    }

    pub fn with_fragment(ctx: &Context, fragment: &ShaderSource) -> Result<Self> {
        ShaderProgram::new(ctx, &ShaderSource::builtin("builtin/screen_quad.vert"), fragment)
            .map(Self)
    }
}

program_wrapper!(
    /// Screen quad that samples an explicit mip level, `qrk_lod`.
    ScreenLodShader
);

impl ScreenLodShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ScreenShader::with_fragment(ctx, &ShaderSource::builtin("builtin/screen_quad_lod.frag"))
            .map(|screen| Self(screen.into_program()))
    }

    pub fn set_mip_level(&self, level: u32) {
        self.set_float("qrk_lod", level as f32);
    }
}

program_wrapper!(
    /// Depth-only pass from the light's point of view.
    ShadowMapShader
);

impl ShadowMapShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ShaderProgram::new(
            ctx,
            &ShaderSource::builtin("builtin/shadow_map.vert"),
            &ShaderSource::builtin("builtin/shadow_map.frag"),
        )
        .map(Self)
    }
}

program_wrapper!(
    /// Separable gaussian blur; toggle the direction with
    /// [`set_horizontal`](Self::set_horizontal).
    GaussianBlurShader
);

impl GaussianBlurShader {
    pub fn new(ctx: &Context) -> Result<Self> {
        ScreenShader::with_fragment(ctx, &ShaderSource::builtin("builtin/gaussian_blur.frag"))
            .map(|screen| Self(screen.into_program()))
    }

    pub fn set_horizontal(&self, horizontal: bool) {
        self.set_bool("horizontal", horizontal);
    }
}
