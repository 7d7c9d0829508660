//! Per-frame window values exposed to shaders.

use crate::errors::Result;
use crate::shader::{ShaderProgram, UniformSource};

/// Sets `qrk_deltaTime`, `qrk_windowWidth` and `qrk_windowHeight`.
///
/// The app shell updates it once per frame; headless users call
/// [`set_frame`](Self::set_frame) themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowUniforms {
    delta_time: f32,
    width: u32,
    height: u32,
}

impl WindowUniforms {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { delta_time: 0.0, width, height }
    }

    pub fn set_frame(&mut self, delta_time: f32, width: u32, height: u32) {
        self.delta_time = delta_time;
        self.width = width;
        self.height = height;
    }

    pub fn set_delta_time(&mut self, delta_time: f32) {
        self.delta_time = delta_time;
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    #[must_use]
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl UniformSource for WindowUniforms {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        shader.set_float("qrk_deltaTime", self.delta_time);
        shader.set_int("qrk_windowWidth", self.width as i32);
        shader.set_int("qrk_windowHeight", self.height as i32);
        Ok(())
    }
}
