//! Scene-level helpers
//!
//! - [`Camera`] and its controls
//! - Lights and the [`LightRegistry`] that feeds them to programs
//! - Shadow mapping: [`ShadowCamera`], [`ShadowMap`]
//! - [`WindowUniforms`]

pub mod camera;
pub mod controls;
pub mod light;
pub mod shadows;
pub mod window;

pub use camera::{Camera, CameraDirection};
pub use controls::{CameraControls, FlyCameraControls, OrbitCameraControls};
pub use light::{
    Attenuation, DirectionalLight, Light, LightKind, LightRegistry, PointLight, SharedLight,
    SpotLight, ViewSource,
};
pub use shadows::{ShadowCamera, ShadowMap};
pub use window::WindowUniforms;
