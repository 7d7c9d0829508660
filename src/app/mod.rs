//! Windowed Application Shell
//!
//! A thin runner on top of [winit](https://crates.io/crates/winit): it opens
//! a window, brings up a wgpu [`Context`] on it, translates window events into
//! an [`InputState`] and drives one update/render cycle per redraw. All
//! rendering lives in the user's [`AppHandler`].
//!
//! ```rust,ignore
//! use quark::app::{App, AppContext, AppHandler, FrameState};
//!
//! struct Demo { camera: Rc<RefCell<Camera>>, controls: FlyCameraControls }
//!
//! impl AppHandler for Demo {
//!     fn init(app: &mut AppContext, _window: &Arc<Window>) -> quark::Result<Self> {
//!         // Create shaders, meshes, framebuffers...
//!     }
//!
//!     fn update(&mut self, app: &mut AppContext, _window: &Arc<Window>, frame: &FrameState) {
//!         self.controls.process_input(&mut self.camera.borrow_mut(), &app.input, frame.dt);
//!     }
//!
//!     fn render(&mut self, app: &mut AppContext, _frame: &FrameState) -> quark::Result<()> {
//!         app.context.clear_default();
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> quark::Result<()> {
//!     App::new().with_title("Bloom").run::<Demo>()
//! }
//! ```

pub mod input_adapter;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
pub use winit::window::{Window, WindowId};

use crate::core::Context;
use crate::errors::{QuarkError, Result};
use crate::input::InputState;
use crate::scene::WindowUniforms;
use crate::settings::ContextSettings;

/// Timing of the frame being produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Seconds since the application started.
    pub time: f32,
    /// Seconds since the previous frame.
    pub dt: f32,
    pub frame_count: u64,
}

/// What the runner shares with the handler every call.
#[derive(Debug)]
pub struct AppContext {
    pub context: Context,
    pub input: InputState,
    /// Kept current by the runner; register it on programs that read
    /// `qrk_deltaTime` or the window size.
    pub window_uniforms: Rc<RefCell<WindowUniforms>>,
}

/// Application behavior driven by [`App`].
///
/// Per redraw the runner calls [`update`](Self::update), then
/// [`render`](Self::render) between the context's begin and end of frame.
pub trait AppHandler: Sized + 'static {
    /// Called once the window and context exist.
    fn init(app: &mut AppContext, window: &Arc<Window>) -> Result<Self>;

    /// Sees each window event first. Return `true` to keep it from the input
    /// state.
    #[allow(unused_variables)]
    fn on_event(&mut self, app: &mut AppContext, window: &Arc<Window>, event: &WindowEvent) -> bool {
        false
    }

    #[allow(unused_variables)]
    fn update(&mut self, app: &mut AppContext, window: &Arc<Window>, frame: &FrameState) {}

    fn render(&mut self, app: &mut AppContext, frame: &FrameState) -> Result<()>;
}

/// Window configuration and entry point.
#[derive(Debug, Clone, Default)]
pub struct App {
    settings: ContextSettings,
}

impl App {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.settings.title = title.into();
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.settings.width = width;
        self.settings.height = height;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ContextSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs the event loop on the current thread until the window closes.
    ///
    /// A failed frame is logged and ends the loop; the error is returned.
    pub fn run<H: AppHandler>(self) -> Result<()> {
        let event_loop = EventLoop::new().map_err(|e| QuarkError::EventLoop(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut runner = AppRunner::<H>::new(self.settings);
        event_loop
            .run_app(&mut runner)
            .map_err(|e| QuarkError::EventLoop(e.to_string()))?;
        runner.error.map_or(Ok(()), Err)
    }
}

struct AppRunner<H: AppHandler> {
    settings: ContextSettings,
    window: Option<Arc<Window>>,
    app: Option<AppContext>,
    handler: Option<H>,
    error: Option<QuarkError>,

    start_time: Instant,
    last_frame_time: Instant,
    frame_count: u64,
}

impl<H: AppHandler> AppRunner<H> {
    fn new(settings: ContextSettings) -> Self {
        let now = Instant::now();
        Self {
            settings,
            window: None,
            app: None,
            handler: None,
            error: None,
            start_time: now,
            last_frame_time: now,
            frame_count: 0,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: QuarkError) {
        log::error!("Fatal error: {error}");
        self.error = Some(error);
        event_loop.exit();
    }

    fn bring_up(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(&self.settings.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.settings.width,
                self.settings.height,
            ));
        let window = event_loop
            .create_window(attributes)
            .map_err(|e| QuarkError::SurfaceError(e.to_string()))?;
        let window = Arc::new(window);

        let size = window.inner_size();
        let settings = ContextSettings {
            width: size.width.max(1),
            height: size.height.max(1),
            ..self.settings.clone()
        };
        let context = Context::windowed(window.clone(), settings)?;

        let mut input = InputState::new();
        input.inject_resize(size.width, size.height);
        let mut app = AppContext {
            context,
            input,
            window_uniforms: Rc::new(RefCell::new(WindowUniforms::new(size.width, size.height))),
        };
        let handler = H::init(&mut app, &window)?;

        self.window = Some(window);
        self.app = Some(app);
        self.handler = Some(handler);

        let now = Instant::now();
        self.start_time = now;
        self.last_frame_time = now;
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let (Some(window), Some(app), Some(handler)) =
            (&self.window, &mut self.app, &mut self.handler)
        else {
            return Ok(());
        };

        let now = Instant::now();
        let frame = FrameState {
            time: now.duration_since(self.start_time).as_secs_f32(),
            dt: now.duration_since(self.last_frame_time).as_secs_f32(),
            frame_count: self.frame_count,
        };
        self.last_frame_time = now;
        self.frame_count += 1;

        let (width, height) = app.context.default_target_size();
        app.window_uniforms.borrow_mut().set_frame(frame.dt, width, height);

        handler.update(app, window, &frame);
        app.input.start_frame();

        app.context.begin_frame()?;
        handler.render(app, &frame)?;
        app.context.end_frame()
    }
}

impl<H: AppHandler> ApplicationHandler for AppRunner<H> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        log::info!("Creating window '{}'", self.settings.title);
        if let Err(error) = self.bring_up(event_loop) {
            self.fail(event_loop, error);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let (Some(window), Some(app), Some(handler)) =
            (&self.window, &mut self.app, &mut self.handler)
        else {
            return;
        };

        if !handler.on_event(app, window, &event) {
            input_adapter::process_window_event(&mut app.input, &event);
        }

        match event {
            WindowEvent::CloseRequested => {
                app.context.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                app.context.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if let Err(error) = self.frame() {
                    self.fail(event_loop, error);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
