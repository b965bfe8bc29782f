mod shaders;

use anyhow::{Context, Result};
use std::path::PathBuf;
use triframe::{config::EngineConfig, logging::init_logging, Renderer};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{EventLoop, EventLoopWindowTarget},
    window::{Window, WindowBuilder},
};

const DEFAULT_CONFIG_PATH: &str = "triframe.toml";

/// Renderer before window: the surface must go before the window it was created from.
struct Viewer {
    renderer: Renderer,
    window: Window,
    frame_count: u64,
}

impl Viewer {
    fn handle_event(&mut self, event: Event<()>, window_target: &EventLoopWindowTarget<()>) {
        match event {
            Event::WindowEvent {
                event: window_event,
                ..
            } => match window_event {
                WindowEvent::CloseRequested => {
                    window_target.exit();
                }

                WindowEvent::Resized(new_size) => {
                    self.renderer.resize(new_size.width, new_size.height);
                }

                WindowEvent::RedrawRequested => {
                    if let Err(err) = self.renderer.draw_frame() {
                        log::error!("Frame failed: {err}");
                        window_target.exit();
                        return;
                    }

                    self.frame_count += 1;
                    if self.frame_count % 600 == 0 {
                        log::debug!("Frames: {}", self.frame_count);
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                self.window.request_redraw();
            }
            Event::LoopExiting => {
                if let Err(err) = self.renderer.wait_idle() {
                    log::error!("Failed to drain the GPU on exit: {err}");
                }
                log::info!("Exiting after {} frames", self.frame_count);
            }
            _ => {}
        }
    }
}

fn load_config() -> Result<(EngineConfig, Option<PathBuf>)> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        return Ok((EngineConfig::default(), None));
    }
    let config = EngineConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    Ok((config, Some(path)))
}

fn main() -> Result<()> {
    let (config, config_path) = load_config()?;
    init_logging(&config.logging);
    match &config_path {
        Some(path) => log::info!("Using configuration {}", path.display()),
        None => log::info!("No configuration file found, using defaults"),
    }

    let shader_code = shaders::load_all(&config.renderer)?;

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)?;

    // Get actual physical size for DPI awareness
    let window_size = window.inner_size();
    log::info!(
        "Window physical size: {}x{} (DPI scale factor: {:.2})",
        window_size.width,
        window_size.height,
        window.scale_factor()
    );

    let renderer = Renderer::new(
        &window,
        window_size.width,
        window_size.height,
        &config.renderer,
        shader_code,
    )?;

    let mut viewer = Viewer {
        renderer,
        window,
        frame_count: 0,
    };

    event_loop.run(move |event, window_target| viewer.handle_event(event, window_target))?;

    Ok(())
}
