// SPDX-License-Identifier: CEPL-1.0
use prism_math::Camera;

/// Depth of CPU/GPU overlap: per-slot sync objects, command buffers and
/// uniform buffers all come in this many copies.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Mutable state shared between the event loop and the frame scheduler.
/// `resized` and `quit` are only read at tick boundaries.
#[derive(Debug, Clone)]
pub struct FrameState {
    current_frame: usize,
    pub resized: bool,
    pub quit: bool,
    pub camera: Camera,
}

impl Default for FrameState {
    fn default() -> Self {
        Self::new(Camera::default())
    }
}

impl FrameState {
    pub fn new(camera: Camera) -> Self {
        Self {
            current_frame: 0,
            resized: false,
            quit: false,
            camera,
        }
    }

    /// Slot index in `[0, MAX_FRAMES_IN_FLIGHT)`.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
    }
}

/// How a single frame-step ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submitted and presented; `recreated` is set when the swapchain was
    /// rebuilt after present.
    Presented { recreated: bool },
    /// Acquire found the surface stale; rebuilt, nothing drawn.
    SwapchainRecreated,
    /// Zero-area drawable; nothing touched.
    Paused,
    /// No usable swapchain after a failed rebuild; retried next tick.
    Skipped,
}
