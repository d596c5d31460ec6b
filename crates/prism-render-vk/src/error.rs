// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use prism_render::MeshDataError;
use std::path::PathBuf;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// One variant per step that can fail; callers can tell which step broke
/// without parsing messages.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(String),
    #[error("window handle unavailable: {0}")]
    WindowHandle(String),
    #[error("required instance extensions unavailable: {0}")]
    InstanceExtensions(vk::Result),
    #[error("instance creation failed: {0}")]
    Instance(vk::Result),
    #[error("surface creation failed: {0}")]
    Surface(vk::Result),
    #[error("no physical device supports graphics, presentation and swapchains for this surface")]
    NoPhysicalDevice,
    #[error("logical device creation failed: {0}")]
    DeviceCreate(vk::Result),
    #[error("no supported depth attachment format")]
    NoDepthFormat,

    #[error("surface capability query failed: {0}")]
    SurfaceCapabilities(vk::Result),
    #[error("surface format query failed: {0}")]
    SurfaceFormats(vk::Result),
    #[error("present mode query failed: {0}")]
    SurfacePresentModes(vk::Result),
    #[error("surface reports no formats")]
    NoSurfaceFormats,
    #[error("surface reports no present modes")]
    NoPresentModes,
    #[error("swapchain creation failed: {0}")]
    Swapchain(vk::Result),
    #[error("swapchain image query failed: {0}")]
    SwapchainImages(vk::Result),
    #[error("image view creation failed: {0}")]
    ImageView(vk::Result),
    #[error("render pass creation failed: {0}")]
    RenderPass(vk::Result),
    #[error("framebuffer creation failed: {0}")]
    Framebuffer(vk::Result),

    #[error("command pool creation failed: {0}")]
    CommandPool(vk::Result),
    #[error("command buffer allocation or recording failed: {0}")]
    CommandBuffers(vk::Result),
    #[error("failed to read shader {path}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pipeline creation failed: {0}")]
    Pipeline(vk::Result),
    #[error("sync object creation failed: {0}")]
    SyncObject(vk::Result),

    #[error("buffer creation failed: {0}")]
    Buffer(vk::Result),
    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("memory map failed: {0}")]
    MemoryMap(vk::Result),
    #[error("descriptor set layout creation failed: {0}")]
    DescriptorSetLayout(vk::Result),
    #[error("descriptor pool creation failed: {0}")]
    DescriptorPool(vk::Result),
    #[error("descriptor set allocation failed: {0}")]
    DescriptorSet(vk::Result),
    #[error("image creation failed: {0}")]
    ImageCreate(vk::Result),
    #[error("sampler creation failed: {0}")]
    Sampler(vk::Result),
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    #[error("invalid mesh #{index}: {source}")]
    InvalidMesh {
        index: usize,
        #[source]
        source: MeshDataError,
    },
    #[error("one-shot transfer failed: {0}")]
    Transfer(vk::Result),
    #[error("nothing to upload: zero-sized buffer")]
    EmptyUpload,
    #[error("texture {width}x{height} needs {expected} RGBA8 bytes, got {actual}")]
    TextureSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("fence wait/reset failed: {0}")]
    Fence(vk::Result),
    #[error("image acquisition failed: {0}")]
    Acquire(vk::Result),
    #[error("swapchain image {0} has no framebuffer")]
    MissingFramebuffer(u32),
    #[error("queue submission failed: {0}")]
    Submit(vk::Result),
    #[error("presentation failed: {0}")]
    Present(vk::Result),
    #[error("device idle wait failed: {0}")]
    DeviceIdle(vk::Result),
}

impl RenderError {
    /// The underlying Vulkan result code, when the failing step had one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        use RenderError::*;
        match *self {
            InstanceExtensions(r) | Instance(r) | Surface(r) | DeviceCreate(r)
            | SurfaceCapabilities(r) | SurfaceFormats(r) | SurfacePresentModes(r)
            | Swapchain(r) | SwapchainImages(r) | ImageView(r) | RenderPass(r)
            | Framebuffer(r) | CommandPool(r) | CommandBuffers(r) | Pipeline(r)
            | SyncObject(r) | Buffer(r) | MemoryMap(r) | DescriptorSetLayout(r)
            | DescriptorPool(r) | DescriptorSet(r) | ImageCreate(r) | Sampler(r)
            | Transfer(r) | Fence(r) | Acquire(r) | Submit(r) | Present(r)
            | DeviceIdle(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_DEVICE_LOST)
    }

    /// Out-of-date surface reported by a per-frame call. Construction steps
    /// never count as stale.
    pub fn is_surface_stale(&self) -> bool {
        matches!(
            self,
            RenderError::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | RenderError::Present(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}
