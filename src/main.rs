// =============================================================================
// MESH RENDERER - Vulkan real-time renderer
// =============================================================================
//
// Loads OBJ meshes and draws them every frame with a free-flying camera.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, timing)                          │
// │    └── Engine (uniforms, descriptors, scene, camera)            │
// │          └── Renderer (frame protocol, command buffers)         │
// │                └── Swapchain (images, frame slots, sync)        │
// │                      └── VulkanDevice (instance, queue, pools)  │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Update the viewer from keyboard state
// 2. Wait for the frame slot and acquire a swapchain image
// 3. Write the slot's uniform buffer
// 4. Record the render pass and per-object draws
// 5. Submit, present, advance to the next slot
//
// =============================================================================

mod backend;
mod config;
mod logging;
mod renderer;

use anyhow::{Context, Result};
use backend::{DeviceSettings, GpuDevice, VulkanDevice};
use config::Config;
use logging::LogContext;
use renderer::{Engine, EngineSettings, FrameOutcome, InputState, SceneAssets};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Logger first so device creation can report validation output
    let log = LogContext::init(&config.debug);
    log::info!("Starting mesh renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, log);
    event_loop.run_app(&mut app)?;
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The engine (and the device it
/// holds) must go before the window its surface was created from.
struct App {
    engine: Option<Engine>,
    window: Option<Arc<Window>>,

    config: Config,
    log: Arc<LogContext>,
    input: InputState,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // TIMING & FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    last_frame_time: Instant,
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config, log: Arc<LogContext>) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            engine: None,
            window: None,
            config,
            log,
            input: InputState::default(),
            is_fullscreen,
            last_frame_time: now,
            frame_count: 0,
            last_fps_update: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Build the device and engine for `window`.
    ///
    /// 1. Read meshes, texture and shaders from disk
    /// 2. Vulkan device (instance, surface, queue, pools)
    /// 3. Engine (swap chain, uniforms, descriptors, pipeline, scene)
    fn init_engine(&self, window: &Window) -> Result<Engine> {
        let assets = SceneAssets::load(&self.config.scene).context("Failed to load scene assets")?;

        // Validation only makes sense in debug builds
        let settings = DeviceSettings {
            app_name: self.config.window.title.clone(),
            enable_validation: cfg!(debug_assertions) && self.config.debug.validation_layers,
        };
        let device: Arc<dyn GpuDevice> = VulkanDevice::new(window, self.log.clone(), &settings)
            .context("Failed to create Vulkan device")?;

        let size = window.inner_size();
        let engine_settings = EngineSettings::from_config(
            &self.config,
            ash::vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        );
        let engine = Engine::new(device, engine_settings, &assets)
            .context("Failed to initialize renderer")?;

        log::info!("Renderer initialized successfully");
        Ok(engine)
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        match engine.tick(dt, &self.input) {
            Ok(FrameOutcome::Rendered) => self.update_fps(now, dt),
            Ok(FrameOutcome::Skipped) => {}
            Err(err) if err.is_recoverable() => {
                log::warn!("Frame dropped: {}", err);
            }
            Err(err) => {
                log::error!("Render error: {}", err);
                self.shutdown(event_loop);
            }
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(engine) = &self.engine {
            if let Err(err) = engine.shutdown() {
                log::error!("Shutdown wait failed: {}", err);
            }
        }
        event_loop.exit();
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;
            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // The Resized event that follows triggers recreation
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self, now: Instant, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_engine(&window) {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => {
                log::error!("Failed to initialize: {:?}", e);
                event_loop.exit();
                return;
            }
        }
        self.last_frame_time = Instant::now();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(engine) = self.engine.as_mut() {
                    engine.notify_resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            // Losing focus would otherwise leave keys stuck down
            WindowEvent::Focused(false) => self.input.clear(),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                let pressed = event.state.is_pressed();
                self.input.set(key, pressed);

                if pressed && !event.repeat {
                    match key {
                        KeyCode::Escape => {
                            log::info!("ESC pressed, exiting...");
                            self.shutdown(event_loop);
                        }
                        KeyCode::F11 => self.toggle_fullscreen(),
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
