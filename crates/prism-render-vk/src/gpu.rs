// SPDX-License-Identifier: CEPL-1.0
//! The seam between renderer logic and the device. Everything above this
//! trait is plain Rust over `vk` handles; everything below it talks to the
//! driver (or to the test double).

use crate::error::RenderResult;
use ash::vk;
use std::ptr::NonNull;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Empty for exclusive sharing.
    pub queue_family_indices: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// Single-subpass pass: colour attachment 0, depth attachment 1.
#[derive(Clone, Copy, Debug)]
pub struct RenderPassDesc {
    pub color: vk::Format,
    pub depth: vk::Format,
    /// External -> subpass 0.
    pub dependency: vk::SubpassDependency,
}

pub struct PipelineDesc<'a> {
    pub vertex_spv: &'a [u32],
    pub fragment_spv: &'a [u32],
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub vertex_binding: vk::VertexInputBindingDescription,
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
}

/// Uniform buffer + texture for one descriptor set (bindings 0 and 1).
#[derive(Clone, Copy, Debug)]
pub struct MeshDescriptorWrite {
    pub set: vk::DescriptorSet,
    pub uniform_buffer: vk::Buffer,
    pub uniform_range: vk::DeviceSize,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

/// An image layout change with its access masks and stages resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// One command recorded into a one-shot transfer buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOp {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
    },
    Barrier(LayoutBarrier),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Everything needed to record one frame's command buffer.
#[derive(Clone, Debug)]
pub struct FrameCommands {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub draws: Vec<DrawCall>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentOutcome::Optimal)
    }
}

/// Device operations used by the renderer. All methods take `&self`; the
/// renderer is single-threaded and owns the only reference.
pub trait Gpu {
    fn queue_families(&self) -> QueueFamilyIndices;
    fn depth_format(&self) -> vk::Format;
    fn wait_idle(&self) -> RenderResult<()>;

    // surface
    fn surface_capabilities(&self) -> RenderResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> RenderResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self) -> RenderResult<Vec<vk::PresentModeKHR>>;

    // swapchain
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> RenderResult<Acquire>;
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome>;

    // memory
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<GpuBuffer>;
    fn destroy_buffer(&self, buffer: GpuBuffer);
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
    ) -> RenderResult<NonNull<u8>>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    fn create_image(&self, desc: &ImageDesc) -> RenderResult<GpuImage>;
    fn destroy_image(&self, image: GpuImage);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self) -> RenderResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // pipeline
    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RenderResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> RenderResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // descriptors
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> RenderResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RenderResult<Vec<vk::DescriptorSet>>;
    fn write_mesh_descriptor(&self, write: &MeshDescriptorWrite);

    // commands
    fn create_command_pool(&self) -> RenderResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RenderResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Allocates a transient buffer, records `ops`, submits to the graphics
    /// queue, waits for the queue to drain, frees the buffer.
    fn submit_one_shot(&self, pool: vk::CommandPool, ops: &[TransferOp]) -> RenderResult<()>;
    /// Resets `cmd` and records one frame into it.
    fn record_frame(&self, cmd: vk::CommandBuffer, frame: &FrameCommands) -> RenderResult<()>;
    fn submit_frame(&self, submit: &FrameSubmit) -> RenderResult<()>;

    // sync
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks without timeout.
    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;
}
