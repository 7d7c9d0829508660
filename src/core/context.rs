//! Rendering Context
//!
//! [`Context`] owns the active [`RenderBackend`] and the small amount of global
//! pipeline state (blend mode, depth state) that GL-style code toggles around
//! individual passes. It has an explicit [`init`](Context::init) /
//! [`shutdown`](Context::shutdown) lifecycle.
//!
//! A `Context` is a cheap, reference-counted handle. Every resource (texture,
//! framebuffer, shader program, vertex array) keeps a clone of the context
//! that created it. The handle is `Rc`-based and `!Send`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use glam::Vec4;

use super::backend::{
    BlendMode, BufferBits, CullMode, DepthFunc, DepthState, RenderBackend, RenderTarget, Viewport,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::debug::DebugGroup;
use super::gpu::WgpuBackend;
use super::headless::HeadlessBackend;
use crate::errors::{QuarkError, Result};
use crate::settings::ContextSettings;

struct ContextInner {
    backend: RefCell<Box<dyn RenderBackend>>,
    active: Cell<bool>,
    settings: ContextSettings,
    blend: Cell<BlendMode>,
    depth: Cell<DepthState>,
    cull: Cell<CullMode>,
    started: Instant,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if self.active.get() {
            self.backend.get_mut().shutdown();
        }
    }
}

/// Shared handle to the rendering backend.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.inner.backend.borrow().name())
            .field("active", &self.inner.active.get())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Brings up a context on top of `backend`.
    ///
    /// The default target is bound, the viewport covers it, and depth testing
    /// starts as configured in `settings`.
    #[must_use]
    pub fn init(backend: Box<dyn RenderBackend>, settings: ContextSettings) -> Self {
        log::info!(
            "Initializing {} context ({}x{})",
            backend.name(),
            settings.width,
            settings.height
        );
        let depth = DepthState {
            test: settings.depth_test,
            ..DepthState::default()
        };
        let ctx = Self {
            inner: Rc::new(ContextInner {
                backend: RefCell::new(backend),
                active: Cell::new(true),
                settings,
                blend: Cell::new(BlendMode::Disabled),
                depth: Cell::new(depth),
                cull: Cell::new(CullMode::None),
                started: Instant::now(),
            }),
        };
        ctx.command(|b| b.set_depth_state(depth));
        ctx.bind_default_target();
        ctx
    }

    /// A context backed by the recording [`HeadlessBackend`].
    #[must_use]
    pub fn headless(settings: ContextSettings) -> Self {
        let backend = HeadlessBackend::new(settings.width, settings.height);
        Self::init(Box::new(backend), settings)
    }

    /// A context rendering to `window` through wgpu. Blocks until the device
    /// is ready.
    pub fn windowed<W>(window: W, settings: ContextSettings) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let backend = pollster::block_on(WgpuBackend::new(window, &settings))?;
        Ok(Self::init(Box::new(backend), settings))
    }

    /// A wgpu context whose default target is an offscreen texture.
    pub fn offscreen(settings: ContextSettings) -> Result<Self> {
        let backend = pollster::block_on(WgpuBackend::offscreen(&settings))?;
        Ok(Self::init(Box::new(backend), settings))
    }

    /// Releases every GPU resource. Further resource creation fails with
    /// [`QuarkError::ContextShutdown`]; state commands are ignored. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.active.replace(false) {
            log::info!("Shutting down {} context", self.backend_name());
            self.inner.backend.borrow_mut().shutdown();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    #[must_use]
    pub fn settings(&self) -> &ContextSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.borrow().name()
    }

    /// Seconds since the context was brought up.
    #[must_use]
    pub fn time(&self) -> f32 {
        self.inner.started.elapsed().as_secs_f32()
    }

    /// Returns `true` if both handles refer to the same context.
    #[must_use]
    pub fn same_as(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Backend access
    // ========================================================================

    /// Runs a state command. Ignored (with a warning) after shutdown.
    pub(crate) fn command(&self, f: impl FnOnce(&mut dyn RenderBackend)) {
        if self.inner.active.get() {
            f(self.inner.backend.borrow_mut().as_mut());
        } else {
            log::warn!("Ignoring render command on a shut-down context");
        }
    }

    /// Runs a fallible operation that needs a live context.
    pub(crate) fn create<R>(&self, f: impl FnOnce(&mut dyn RenderBackend) -> Result<R>) -> Result<R> {
        if !self.inner.active.get() {
            return Err(QuarkError::ContextShutdown);
        }
        f(self.inner.backend.borrow_mut().as_mut())
    }

    /// Reads backend state.
    pub(crate) fn query<R>(&self, f: impl FnOnce(&dyn RenderBackend) -> R) -> R {
        f(self.inner.backend.borrow().as_ref())
    }

    /// Gives read access to a concrete backend, e.g. the [`HeadlessBackend`]
    /// recorder in tests. Returns `None` if the backend is of another type.
    pub fn inspect<B: RenderBackend + 'static, R>(&self, f: impl FnOnce(&B) -> R) -> Option<R> {
        let backend = self.inner.backend.borrow();
        backend.as_any().downcast_ref::<B>().map(f)
    }

    // ========================================================================
    // Frame
    // ========================================================================

    pub fn begin_frame(&self) -> Result<()> {
        self.create(|b| b.begin_frame())
    }

    pub fn end_frame(&self) -> Result<()> {
        self.create(|b| b.end_frame())
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.command(|b| b.resize(width, height));
    }

    /// Size of the default target (the window surface, or the offscreen target).
    #[must_use]
    pub fn default_target_size(&self) -> (u32, u32) {
        self.query(|b| b.default_target_size())
    }

    // ========================================================================
    // Targets
    // ========================================================================

    /// Binds the default target and sets the viewport to cover it.
    pub fn bind_default_target(&self) {
        let (width, height) = self.default_target_size();
        self.command(|b| {
            b.bind_render_target(RenderTarget::Default);
            b.set_viewport(Viewport::new(width, height));
        });
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.command(|b| b.set_viewport(viewport));
    }

    /// Clears the given planes of the currently bound target.
    pub fn clear(&self, bits: BufferBits, color: Vec4) {
        self.command(|b| b.clear(bits, color, 1.0, 0));
    }

    /// Clears the default target with the configured clear color.
    pub fn clear_default(&self) {
        let mut bits = BufferBits::COLOR | BufferBits::DEPTH;
        if self.inner.settings.stencil {
            bits |= BufferBits::STENCIL;
        }
        let color = self.inner.settings.clear_color;
        self.command(|b| {
            b.bind_render_target(RenderTarget::Default);
            b.clear(bits, color, 1.0, 0);
        });
    }

    // ========================================================================
    // Fixed-function state
    // ========================================================================

    pub fn set_blend_mode(&self, mode: BlendMode) {
        self.inner.blend.set(mode);
        self.command(|b| b.set_blend_mode(mode));
    }

    #[must_use]
    pub fn blend_mode(&self) -> BlendMode {
        self.inner.blend.get()
    }

    pub fn set_depth_state(&self, state: DepthState) {
        self.inner.depth.set(state);
        self.command(|b| b.set_depth_state(state));
    }

    #[must_use]
    pub fn depth_state(&self) -> DepthState {
        self.inner.depth.get()
    }

    pub fn set_depth_test(&self, enabled: bool) {
        self.set_depth_state(DepthState {
            test: enabled,
            ..self.depth_state()
        });
    }

    pub fn set_depth_func(&self, func: DepthFunc) {
        self.set_depth_state(DepthState {
            func,
            ..self.depth_state()
        });
    }

    pub fn set_cull_mode(&self, mode: CullMode) {
        self.inner.cull.set(mode);
        self.command(|b| b.set_cull_mode(mode));
    }

    #[must_use]
    pub fn cull_mode(&self) -> CullMode {
        self.inner.cull.get()
    }

    /// Opens a debug group that closes when the returned guard is dropped.
    #[must_use = "the debug group closes as soon as the guard is dropped"]
    pub fn debug_group(&self, label: &str) -> DebugGroup {
        DebugGroup::new(self, label)
    }
}
