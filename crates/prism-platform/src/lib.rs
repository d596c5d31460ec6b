// SPDX-License-Identifier: CEPL-1.0
//! winit window as a presentation surface, plus the key bindings the viewer
//! uses.
#![deny(unsafe_op_in_unsafe_fn)]

pub use winit;

use anyhow::{Context, Result};
use prism_render::{RenderSize, SurfaceProvider};
use tracing::info;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::KeyCode;
use winit::raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use winit::window::{Window, WindowId};

/// Radians added per key press.
pub const ROTATION_STEP: f32 = 0.02;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

pub struct PlatformWindow {
    window: Window,
}

impl PlatformWindow {
    pub fn create(event_loop: &ActiveEventLoop, cfg: &WindowConfig) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(cfg.title.clone())
            .with_inner_size(PhysicalSize::new(cfg.width.max(1), cfg.height.max(1)));
        let window = event_loop
            .create_window(attrs)
            .context("create_window")?;
        let size = window.inner_size();
        info!("window '{}' {}x{}", cfg.title, size.width, size.height);
        Ok(Self { window })
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl SurfaceProvider for PlatformWindow {
    fn drawable_size(&self) -> RenderSize {
        render_size(self.window.inner_size())
    }
}

/// Euler delta (x, y, z) for a key press: left/right turn about z, up/down
/// about y, page up/down about x.
pub fn rotation_for_key(key: KeyCode) -> Option<[f32; 3]> {
    let s = ROTATION_STEP;
    match key {
        KeyCode::ArrowLeft => Some([0.0, 0.0, -s]),
        KeyCode::ArrowRight => Some([0.0, 0.0, s]),
        KeyCode::ArrowUp => Some([0.0, -s, 0.0]),
        KeyCode::ArrowDown => Some([0.0, s, 0.0]),
        KeyCode::PageUp => Some([-s, 0.0, 0.0]),
        KeyCode::PageDown => Some([s, 0.0, 0.0]),
        _ => None,
    }
}
