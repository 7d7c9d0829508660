//! Context Settings
//!
//! Configuration consumed when a rendering [`Context`](crate::core::Context) is
//! brought up. Every field has a documented default, so the common case is:
//!
//! ```rust,ignore
//! use quark::settings::ContextSettings;
//!
//! let settings = ContextSettings {
//!     width: 1280,
//!     height: 720,
//!     vsync: false,
//!     ..Default::default()
//! };
//! ```
//!
//! | Field                   | Default              | Used by                         |
//! |-------------------------|----------------------|---------------------------------|
//! | `width` / `height`      | 800 × 600            | default target, window size     |
//! | `title`                 | `"Quark"`            | window title                    |
//! | `vsync`                 | `true`               | surface present mode            |
//! | `power_preference`      | `HighPerformance`    | adapter selection               |
//! | `depth_test`            | `true`               | initial depth state             |
//! | `stencil`               | `false`              | default target stencil buffer   |
//! | `clear_color`           | `(0, 0, 0, 1)`       | default-target clears           |
//! | `uniform_arena_size`    | 4 MiB                | per-frame uniform snapshots     |

use glam::Vec4;

/// Default clear color for framebuffers and the default target.
pub const DEFAULT_CLEAR_COLOR: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// Default window width in pixels.
pub const DEFAULT_WIDTH: u32 = 800;
/// Default window height in pixels.
pub const DEFAULT_HEIGHT: u32 = 600;
/// Default window title.
pub const DEFAULT_TITLE: &str = "Quark";

/// Settings for bringing up a rendering context.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Width of the default render target.
    pub width: u32,
    /// Height of the default render target.
    pub height: u32,
    /// Window title (only used when a window is created).
    pub title: String,
    /// Whether presentation waits for vertical sync.
    pub vsync: bool,
    /// GPU adapter selection preference.
    pub power_preference: wgpu::PowerPreference,
    /// Device features requested on top of what the engine needs.
    pub required_features: wgpu::Features,
    /// Device limits.
    pub required_limits: wgpu::Limits,
    /// Whether depth testing starts enabled.
    pub depth_test: bool,
    /// Whether the default target carries a stencil buffer.
    pub stencil: bool,
    /// Clear color used when clearing the default target.
    pub clear_color: Vec4,
    /// Capacity in bytes of the per-frame uniform arena. When a frame uses more,
    /// the backend submits early and starts a new arena.
    pub uniform_arena_size: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: DEFAULT_TITLE.to_string(),
            vsync: true,
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            depth_test: true,
            stencil: false,
            clear_color: DEFAULT_CLEAR_COLOR,
            uniform_arena_size: 4 * 1024 * 1024,
        }
    }
}

impl ContextSettings {
    /// Aspect ratio of the default target.
    #[must_use]
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}
