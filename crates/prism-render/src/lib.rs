// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

mod frame;
pub mod mesh;

pub use frame::{FrameOutcome, FrameState, MAX_FRAMES_IN_FLIGHT};
pub use mesh::{IndexData, MeshData, MeshDataError, MeshSource, Primitive, TextureData, Vertex};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either side is zero (minimised window).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Anything a presentation surface can be created from.
pub trait SurfaceProvider: HasWindowHandle + HasDisplayHandle {
    /// Current drawable size in physical pixels.
    fn drawable_size(&self) -> RenderSize;
}

/// What a renderer draws: the two SPIR-V stages and the meshes. A stage
/// without a path uses the backend's builtin shader.
#[derive(Debug, Clone)]
pub struct Scene {
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
    pub meshes: Vec<MeshSource>,
}

pub trait Renderer {
    fn new(surface: &dyn SurfaceProvider, scene: Scene) -> Result<Self>
    where
        Self: Sized;

    /// One frame-step. Reads and clears `state.resized`, advances
    /// `state.current_frame` on a presented frame.
    fn render(&mut self, state: &mut FrameState, drawable: RenderSize) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
