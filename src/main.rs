// =============================================================================
// QUAD PRESENT - minimal Vulkan presentation demo
// =============================================================================
//
// Opens a window, sets up Vulkan once and then draws a static textured
// scene, one frame per redraw.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit ApplicationHandler)                                 │
// │    └── FrameLoop (acquire -> record -> submit -> present)       │
// │          └── VulkanRenderer (FrameTarget)                       │
// │                └── SwapchainBundle, pipeline, texture, buffers  │
// │                      └── VulkanDevice (instance, queues, alloc) │
// └─────────────────────────────────────────────────────────────────┘
//
// The only failure the loop recovers from is an out-of-date swapchain,
// which rebuilds the bundle. Everything else ends the program.
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod renderer;
mod scene;
mod tga;

use anyhow::{Context, Result};
use config::Config;
use frame::{FrameLoop, FrameOutcome};
use renderer::VulkanRenderer;
use std::fs::File;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::WindowAttributes,
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting quad-present");
    log::info!(
        "Window: {}x{} ({}), demo {:?}",
        config.window.width,
        config.window.height,
        config.window.title,
        config.graphics.demo
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            log::info!(
                "Exited cleanly after {} frames ({} swapchain rebuilds)",
                app.frames.frames_presented(),
                app.frames.recreations()
            );
            Ok(())
        }
    }
}

/// Initialize logging, optionally writing to the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG still overrides the default level
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialize logging")?;
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    frames: FrameLoop,
    /// Created on `resumed`, released on exit
    renderer: Option<VulkanRenderer>,
    /// First fatal error, returned from `main`
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            frames: FrameLoop::new(),
            renderer: None,
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn draw(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        // A minimized window has no area to present into
        let size = renderer.window().inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        match self.frames.run_frame(renderer)? {
            FrameOutcome::Presented { image_index } => {
                log::trace!("Presented image {}", image_index);
            }
            FrameOutcome::Recreated { image_index } => {
                log::debug!("Swapchain recreated (presented image: {:?})", image_index);
            }
        }

        let delay = self.config.frame_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    /// Let the queue drain, then release every Vulkan object
    fn shutdown(&mut self) -> Result<()> {
        match self.renderer.take() {
            Some(renderer) => self.frames.shutdown(renderer),
            None => Ok(()),
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match VulkanRenderer::new(window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => self.fail(event_loop, e.context("Failed to initialize Vulkan")),
        }
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            // Nothing to do here: the next acquire or present reports the
            // swapchain out of date and the frame loop rebuilds it.
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw() {
                    let state = self.frames.state();
                    self.fail(event_loop, e.context(format!("Frame failed in state {:?}", state)));
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if event_loop.exiting() {
            return;
        }
        if let Some(renderer) = &self.renderer {
            renderer.window().request_redraw();
        }
    }

    /// Every exit path ends here, before the event loop returns
    fn exiting(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.shutdown() {
            self.fail(event_loop, e.context("Shutdown failed"));
        }
    }
}
