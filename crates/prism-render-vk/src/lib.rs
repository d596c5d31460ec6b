// SPDX-License-Identifier: CEPL-1.0
//! Vulkan frame renderer: device context, swapchain, GPU resources and the
//! per-frame scheduler.
#![deny(unsafe_op_in_unsafe_fn)]

mod backend;
pub mod context;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod mesh;
pub mod pipeline;
mod renderer;
pub mod swapchain;
pub mod unwind;
pub mod upload;

#[cfg(test)]
mod mock;

pub use context::DeviceContext;
pub use error::{RenderError, RenderResult};
pub use gpu::Gpu;
pub use pipeline::ShaderSet;
pub use renderer::{VkRenderer, RECREATE_RETRY_LIMIT};
