// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use prism_core::init_tracing;
use prism_math::glam::Vec3;
use prism_platform::{rotation_for_key, PlatformWindow, WindowConfig};
use prism_render::{FrameOutcome, FrameState, MeshSource, Primitive, Renderer, Scene, SurfaceProvider};
use prism_render_vk::VkRenderer;
use tracing::{error, info, warn};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::WindowId,
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Binary glTF model to show instead of the builtin cube
    #[arg(long)]
    model: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "prism".into(),
            width: 1000,
            height: 900,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
        }
    }
}

/// Unset shader paths use the renderer's builtin SPIR-V.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
struct AssetsCfg {
    vertex_shader: Option<PathBuf>,
    fragment_shader: Option<PathBuf>,
    model: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    assets: AssetsCfg,
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    match toml::from_str::<AppCfg>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{} is malformed ({e}); using defaults", path.display());
            AppCfg::default()
        }
    }
}

fn build_scene(assets: &AssetsCfg, model: Option<&Path>) -> Result<Scene> {
    let meshes = match model {
        Some(path) => prism_assets::load_glb(path)?
            .into_iter()
            .map(MeshSource::Loaded)
            .collect(),
        None => vec![MeshSource::Builtin(Primitive::Cube)],
    };
    Ok(Scene {
        vertex_shader: assets.vertex_shader.clone(),
        fragment_shader: assets.fragment_shader.clone(),
        meshes,
    })
}

struct App {
    cfg: AppCfg,
    model: Option<PathBuf>,
    // renderer before window: the surface must go first
    renderer: Option<VkRenderer>,
    window: Option<PlatformWindow>,
    state: FrameState,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = PlatformWindow::create(
            event_loop,
            &WindowConfig {
                title: self.cfg.window.title.clone(),
                width: self.cfg.window.width,
                height: self.cfg.window.height,
            },
        )?;
        let scene = build_scene(&self.cfg.assets, self.model.as_deref())?;
        info!("scene: {} mesh(es)", scene.meshes.len());

        let mut renderer =
            <VkRenderer as Renderer>::new(&window, scene).context("renderer init")?;
        Renderer::set_clear_color(&mut renderer, self.cfg.render.clear_color);

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.start(event_loop) {
                error!("startup failed: {e:#}");
                self.shutdown(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.state.quit = true;
            }

            WindowEvent::Resized(new_size) => {
                info!("Resized → {}x{}", new_size.width, new_size.height);
                self.state.resized = true;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed {
                    return;
                }
                if let PhysicalKey::Code(code) = event.physical_key {
                    if let Some(delta) = rotation_for_key(code) {
                        self.state.camera.rotate(Vec3::from(delta));
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.state.quit {
                    return;
                }
                let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
                    return;
                };
                match renderer.render(&mut self.state, window.drawable_size()) {
                    Ok(FrameOutcome::Presented { .. }) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("render error: {e:#}");
                        self.shutdown(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.state.quit {
            self.shutdown(event_loop);
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let model = args.model.or_else(|| cfg.assets.model.clone());
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg,
        model,
        renderer: None,
        window: None,
        state: FrameState::default(),
        exiting: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
