//! presto - spinning quad on the frame presentation engine.
//!
//! Opens a window, renders until it is closed and exits nonzero if the
//! engine reports a fatal error.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use presto_core::Config;
use presto_platform::Window;
use presto_renderer::{Engine, FrameStatus};

struct App {
    config: Config,
    window: Option<Window>,
    engine: Option<Engine>,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            engine: None,
            fatal: None,
        }
    }

    /// Records a fatal error, releases the engine and stops the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("Fatal: {:#}", err);
        // Dropping the engine drains the device before releasing anything.
        self.engine = None;
        self.window = None;
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(engine) = self.engine.take()
            && let Err(e) = engine.shutdown()
        {
            self.fail(event_loop, anyhow!(e).context("engine shutdown"));
            return;
        }
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_config = &self.config.window;
        let window = match Window::new(
            event_loop,
            window_config.width,
            window_config.height,
            &window_config.title,
        ) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow!(e).context("creating window"));
                return;
            }
        };

        match Engine::new(&window, &self.config) {
            Ok(engine) => {
                info!("Initialization complete, entering main loop");
                self.engine = Some(engine);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, anyhow!(e).context("initializing engine")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Some(window) = self.window.as_mut() {
                    window.request_close();
                }
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.on_resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let (Some(window), Some(engine)) = (self.window.as_mut(), self.engine.as_mut())
                else {
                    return;
                };
                if window.close_requested() {
                    return;
                }
                match engine.render_frame(window) {
                    Ok(FrameStatus::Skipped) => debug!("Presentation chain was stale, frame skipped"),
                    Ok(_) => {}
                    Err(e) => self.fail(event_loop, anyhow!(e).context("rendering frame")),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // A minimized window gets no redraws; the loop sleeps until it is
        // restored.
        if let Some(window) = self.window.as_ref()
            && !window.is_zero_area()
            && !window.close_requested()
        {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    presto_core::init_logging();
    info!("Starting presto");

    let config = Config::load().context("loading configuration")?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => {
            info!("Exited cleanly");
            Ok(())
        }
    }
}
