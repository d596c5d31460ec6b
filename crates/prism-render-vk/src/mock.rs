// SPDX-License-Identifier: CEPL-1.0
//! In-process stand-in for a device (no GPU required).
//!
//! Handles are fabricated with `Handle::from_raw`. Every created object is
//! tracked by kind so tests can assert on live counts; destroying an
//! unknown handle, waiting on a fence that can never signal, or consuming
//! an unsignaled semaphore is recorded as a violation instead of panicking
//! (teardown runs inside `Drop`). Memory is mirrored in host vectors so
//! staged copies can be read back.

use crate::error::{RenderError, RenderResult};
use crate::gpu::*;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ptr::NonNull;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Swapchain,
    Buffer,
    Memory,
    Image,
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    WaitIdle,
    SurfaceCapabilities,
    CreateSwapchain,
    SwapchainImages,
    Acquire,
    Present,
    CreateBuffer,
    MapMemory,
    CreateImage,
    CreateImageView,
    CreateSampler,
    CreateRenderPass,
    CreateFramebuffer,
    CreateDescriptorSetLayout,
    CreatePipelineLayout,
    CreatePipeline,
    CreateDescriptorPool,
    AllocateDescriptorSets,
    CreateCommandPool,
    AllocateCommandBuffers,
    SubmitOneShot,
    RecordFrame,
    SubmitFrame,
    CreateSemaphore,
    CreateFence,
    WaitFence,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    WaitIdle,
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire(vk::Semaphore),
    Record(vk::CommandBuffer, usize),
    Submit(FrameSubmit),
    Present { image_index: u32, wait: vk::Semaphore },
    OneShot(Vec<TransferOp>),
}

struct Block {
    bytes: Box<[u8]>,
    host_visible: bool,
}

struct State {
    next_handle: u64,
    live: BTreeMap<Kind, BTreeSet<u64>>,
    violations: Vec<String>,
    failures: HashMap<Op, (usize, vk::Result)>,
    calls: HashMap<Op, usize>,
    events: Vec<Event>,
    memory: HashMap<u64, Block>,
    buffer_memory: HashMap<u64, u64>,
    image_memory: HashMap<u64, u64>,
    pool_sets: HashMap<u64, Vec<u64>>,
    fence_signaled: HashMap<u64, bool>,
    semaphore_signaled: HashMap<u64, bool>,
    swapchain_image_count: HashMap<u64, u32>,
    swapchain_descs: Vec<SwapchainDesc>,
    render_pass_descs: Vec<RenderPassDesc>,
    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    families: QueueFamilyIndices,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<PresentOutcome>,
    next_image: u32,
}

impl State {
    fn new() -> Self {
        Self {
            next_handle: 0x1000,
            live: BTreeMap::new(),
            violations: Vec::new(),
            failures: HashMap::new(),
            calls: HashMap::new(),
            events: Vec::new(),
            memory: HashMap::new(),
            buffer_memory: HashMap::new(),
            image_memory: HashMap::new(),
            pool_sets: HashMap::new(),
            fence_signaled: HashMap::new(),
            semaphore_signaled: HashMap::new(),
            swapchain_image_count: HashMap::new(),
            swapchain_descs: Vec::new(),
            render_pass_descs: Vec::new(),
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            families: QueueFamilyIndices {
                graphics: 0,
                present: 0,
            },
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_image: 0,
        }
    }

    fn check(&mut self, op: Op) -> Result<(), vk::Result> {
        *self.calls.entry(op).or_default() += 1;
        if let Some((remaining, result)) = self.failures.get_mut(&op) {
            if *remaining == 0 {
                let result = *result;
                self.failures.remove(&op);
                return Err(result);
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn alloc(&mut self, kind: Kind) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.entry(kind).or_default().insert(raw);
        raw
    }

    fn release(&mut self, kind: Kind, raw: u64) {
        let removed = self.live.get_mut(&kind).is_some_and(|s| s.remove(&raw));
        if !removed {
            self.violations
                .push(format!("destroy of unknown {kind:?} {raw:#x}"));
        }
    }

    fn is_live(&self, kind: Kind, raw: u64) -> bool {
        self.live.get(&kind).is_some_and(|s| s.contains(&raw))
    }

    fn require_live(&mut self, kind: Kind, raw: u64, what: &str) {
        if !self.is_live(kind, raw) {
            self.violations
                .push(format!("{what}: {kind:?} {raw:#x} is not live"));
        }
    }

    fn alloc_memory(&mut self, size: usize, host_visible: bool) -> u64 {
        let raw = self.alloc(Kind::Memory);
        self.memory.insert(
            raw,
            Block {
                bytes: vec![0u8; size.max(1)].into_boxed_slice(),
                host_visible,
            },
        );
        raw
    }

    fn free_memory(&mut self, raw: u64) {
        self.release(Kind::Memory, raw);
        self.memory.remove(&raw);
    }

    fn copy(&mut self, src_mem: Option<u64>, dst_mem: Option<u64>, len: usize) {
        let (Some(src_mem), Some(dst_mem)) = (src_mem, dst_mem) else {
            self.violations.push("copy between unbound objects".into());
            return;
        };
        let src = match self.memory.get(&src_mem) {
            Some(b) if b.bytes.len() >= len => b.bytes[..len].to_vec(),
            _ => {
                self.violations.push(format!("copy source too small ({len})"));
                return;
            }
        };
        match self.memory.get_mut(&dst_mem) {
            Some(b) if b.bytes.len() >= len => b.bytes[..len].copy_from_slice(&src),
            _ => self.violations.push(format!("copy target too small ({len})")),
        }
    }

    fn consume_semaphore(&mut self, sem: vk::Semaphore, what: &str) {
        match self.semaphore_signaled.get_mut(&sem.as_raw()) {
            Some(s) if *s => *s = false,
            _ => self
                .violations
                .push(format!("{what} waits on unsignaled semaphore")),
        }
    }

    fn signal_semaphore(&mut self, sem: vk::Semaphore, what: &str) {
        match self.semaphore_signaled.get_mut(&sem.as_raw()) {
            Some(s) if !*s => *s = true,
            Some(_) => self
                .violations
                .push(format!("{what} signals an already signaled semaphore")),
            None => self.violations.push(format!("{what} signals unknown semaphore")),
        }
    }
}

/// Cloning shares the underlying state, so a test can keep a handle after
/// moving the device into a renderer.
#[derive(Clone)]
pub struct MockGpu {
    state: Rc<RefCell<State>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new())),
        }
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.state.borrow().live.get(&kind).map_or(0, |s| s.len())
    }

    pub fn total_live(&self) -> usize {
        self.state.borrow().live.values().map(|s| s.len()).sum()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.borrow().calls.get(&op).copied().unwrap_or(0)
    }

    /// Make the `nth` call (0-based, counted from now) of `op` fail once.
    pub fn fail_nth(&self, op: Op, nth: usize, result: vk::Result) {
        self.state.borrow_mut().failures.insert(op, (nth, result));
    }

    pub fn script_acquire(&self, outcome: Acquire) {
        self.state.borrow_mut().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.borrow_mut().present_script.push_back(outcome);
    }

    pub fn caps(&self) -> vk::SurfaceCapabilitiesKHR {
        self.state.borrow().caps
    }

    pub fn set_caps(&self, caps: vk::SurfaceCapabilitiesKHR) {
        self.state.borrow_mut().caps = caps;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().formats = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        self.state.borrow_mut().present_modes = modes;
    }

    pub fn set_families(&self, families: QueueFamilyIndices) {
        self.state.borrow_mut().families = families;
    }

    pub fn swapchain_descs(&self) -> Vec<SwapchainDesc> {
        self.state.borrow().swapchain_descs.clone()
    }

    pub fn render_pass_descs(&self) -> Vec<RenderPassDesc> {
        self.state.borrow().render_pass_descs.clone()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        let st = self.state.borrow();
        st.buffer_memory
            .get(&buffer.as_raw())
            .and_then(|m| st.memory.get(m))
            .map(|b| b.bytes.to_vec())
            .unwrap_or_default()
    }

    pub fn image_contents(&self, image: vk::Image) -> Vec<u8> {
        let st = self.state.borrow();
        st.image_memory
            .get(&image.as_raw())
            .and_then(|m| st.memory.get(m))
            .map(|b| b.bytes.to_vec())
            .unwrap_or_default()
    }
}

fn fail<T>(r: vk::Result, wrap: fn(vk::Result) -> RenderError) -> RenderResult<T> {
    Err(wrap(r))
}

impl Gpu for MockGpu {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.state.borrow().families
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.check(Op::WaitIdle).or_else(|r| fail(r, RenderError::DeviceIdle))?;
        st.events.push(Event::WaitIdle);
        Ok(())
    }

    fn surface_capabilities(&self) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        let mut st = self.state.borrow_mut();
        st.check(Op::SurfaceCapabilities)
            .or_else(|r| fail(r, RenderError::SurfaceCapabilities))?;
        Ok(st.caps)
    }

    fn surface_formats(&self) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn present_modes(&self) -> RenderResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateSwapchain)
            .or_else(|r| fail(r, RenderError::Swapchain))?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            st.violations.push("swapchain with zero extent".into());
        }
        let concurrent = desc.sharing_mode == vk::SharingMode::CONCURRENT;
        if concurrent != (desc.queue_family_indices.len() >= 2) {
            st.violations
                .push(format!("sharing mode/family list mismatch: {desc:?}"));
        }
        let raw = st.alloc(Kind::Swapchain);
        st.swapchain_image_count.insert(raw, desc.min_image_count);
        st.swapchain_descs.push(desc.clone());
        st.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        let mut st = self.state.borrow_mut();
        st.check(Op::SwapchainImages)
            .or_else(|r| fail(r, RenderError::SwapchainImages))?;
        let count = st
            .swapchain_image_count
            .get(&swapchain.as_raw())
            .copied()
            .unwrap_or(0);
        // Owned by the swapchain, never destroyed individually.
        let images = (0..count)
            .map(|_| {
                let raw = st.next_handle;
                st.next_handle += 1;
                vk::Image::from_raw(raw)
            })
            .collect();
        Ok(images)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut st = self.state.borrow_mut();
        st.release(Kind::Swapchain, swapchain.as_raw());
        st.swapchain_image_count.remove(&swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> RenderResult<Acquire> {
        let mut st = self.state.borrow_mut();
        st.check(Op::Acquire).or_else(|r| fail(r, RenderError::Acquire))?;
        st.require_live(Kind::Swapchain, swapchain.as_raw(), "acquire");
        st.events.push(Event::Acquire(signal));
        let outcome = match st.acquire_script.pop_front() {
            Some(o) => o,
            None => {
                let count = st
                    .swapchain_image_count
                    .get(&swapchain.as_raw())
                    .copied()
                    .unwrap_or(1)
                    .max(1);
                let index = st.next_image % count;
                st.next_image += 1;
                Acquire::Image {
                    index,
                    suboptimal: false,
                }
            }
        };
        if let Acquire::Image { .. } = outcome {
            st.signal_semaphore(signal, "acquire");
        }
        Ok(outcome)
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let mut st = self.state.borrow_mut();
        st.check(Op::Present).or_else(|r| fail(r, RenderError::Present))?;
        st.require_live(Kind::Swapchain, swapchain.as_raw(), "present");
        st.consume_semaphore(wait, "present");
        st.events.push(Event::Present { image_index, wait });
        Ok(st
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Optimal))
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<GpuBuffer> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateBuffer)
            .or_else(|r| fail(r, RenderError::Buffer))?;
        let buffer = st.alloc(Kind::Buffer);
        let host_visible = properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let memory = st.alloc_memory(size as usize, host_visible);
        st.buffer_memory.insert(buffer, memory);
        Ok(GpuBuffer {
            buffer: vk::Buffer::from_raw(buffer),
            memory: vk::DeviceMemory::from_raw(memory),
            size,
        })
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        let mut st = self.state.borrow_mut();
        st.release(Kind::Buffer, buffer.buffer.as_raw());
        st.buffer_memory.remove(&buffer.buffer.as_raw());
        st.free_memory(buffer.memory.as_raw());
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
    ) -> RenderResult<NonNull<u8>> {
        let mut st = self.state.borrow_mut();
        st.check(Op::MapMemory)
            .or_else(|r| fail(r, RenderError::MemoryMap))?;
        let mapped = match st.memory.get_mut(&memory.as_raw()) {
            Some(b) if b.host_visible && b.bytes.len() as u64 >= size => {
                NonNull::new(b.bytes.as_mut_ptr())
            }
            _ => None,
        };
        match mapped {
            Some(p) => Ok(p),
            None => {
                st.violations.push(format!("bad map of {:#x}", memory.as_raw()));
                Err(RenderError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED))
            }
        }
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut st = self.state.borrow_mut();
        st.require_live(Kind::Memory, memory.as_raw(), "unmap");
    }

    fn create_image(&self, desc: &ImageDesc) -> RenderResult<GpuImage> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateImage)
            .or_else(|r| fail(r, RenderError::ImageCreate))?;
        let image = st.alloc(Kind::Image);
        let size = desc.extent.width as usize * desc.extent.height as usize * 4;
        let memory = st.alloc_memory(size, false);
        st.image_memory.insert(image, memory);
        Ok(GpuImage {
            image: vk::Image::from_raw(image),
            memory: vk::DeviceMemory::from_raw(memory),
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_image(&self, image: GpuImage) {
        let mut st = self.state.borrow_mut();
        st.release(Kind::Image, image.image.as_raw());
        st.image_memory.remove(&image.image.as_raw());
        st.free_memory(image.memory.as_raw());
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateImageView)
            .or_else(|r| fail(r, RenderError::ImageView))?;
        Ok(vk::ImageView::from_raw(st.alloc(Kind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state
            .borrow_mut()
            .release(Kind::ImageView, view.as_raw());
    }

    fn create_sampler(&self) -> RenderResult<vk::Sampler> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateSampler)
            .or_else(|r| fail(r, RenderError::Sampler))?;
        Ok(vk::Sampler::from_raw(st.alloc(Kind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state
            .borrow_mut()
            .release(Kind::Sampler, sampler.as_raw());
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<vk::RenderPass> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateRenderPass)
            .or_else(|r| fail(r, RenderError::RenderPass))?;
        st.render_pass_descs.push(*desc);
        Ok(vk::RenderPass::from_raw(st.alloc(Kind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state
            .borrow_mut()
            .release(Kind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateFramebuffer)
            .or_else(|r| fail(r, RenderError::Framebuffer))?;
        st.require_live(Kind::RenderPass, render_pass.as_raw(), "framebuffer");
        for view in attachments {
            st.require_live(Kind::ImageView, view.as_raw(), "framebuffer attachment");
        }
        Ok(vk::Framebuffer::from_raw(st.alloc(Kind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state
            .borrow_mut()
            .release(Kind::Framebuffer, framebuffer.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBinding],
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateDescriptorSetLayout)
            .or_else(|r| fail(r, RenderError::DescriptorSetLayout))?;
        Ok(vk::DescriptorSetLayout::from_raw(
            st.alloc(Kind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state
            .borrow_mut()
            .release(Kind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::PipelineLayout> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreatePipelineLayout)
            .or_else(|r| fail(r, RenderError::Pipeline))?;
        st.require_live(Kind::DescriptorSetLayout, set_layout.as_raw(), "pipeline layout");
        Ok(vk::PipelineLayout::from_raw(st.alloc(Kind::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state
            .borrow_mut()
            .release(Kind::PipelineLayout, layout.as_raw());
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> RenderResult<vk::Pipeline> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreatePipeline)
            .or_else(|r| fail(r, RenderError::Pipeline))?;
        st.require_live(Kind::RenderPass, desc.render_pass.as_raw(), "pipeline");
        st.require_live(Kind::PipelineLayout, desc.layout.as_raw(), "pipeline");
        Ok(vk::Pipeline::from_raw(st.alloc(Kind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state
            .borrow_mut()
            .release(Kind::Pipeline, pipeline.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        _max_sets: u32,
    ) -> RenderResult<vk::DescriptorPool> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateDescriptorPool)
            .or_else(|r| fail(r, RenderError::DescriptorPool))?;
        let raw = st.alloc(Kind::DescriptorPool);
        st.pool_sets.insert(raw, Vec::new());
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut st = self.state.borrow_mut();
        st.release(Kind::DescriptorPool, pool.as_raw());
        let sets = st.pool_sets.remove(&pool.as_raw()).unwrap_or_default();
        for set in sets {
            st.release(Kind::DescriptorSet, set);
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        let mut st = self.state.borrow_mut();
        st.check(Op::AllocateDescriptorSets)
            .or_else(|r| fail(r, RenderError::DescriptorSet))?;
        let sets: Vec<u64> = (0..count).map(|_| st.alloc(Kind::DescriptorSet)).collect();
        st.pool_sets
            .entry(pool.as_raw())
            .or_default()
            .extend(&sets);
        Ok(sets.into_iter().map(vk::DescriptorSet::from_raw).collect())
    }

    fn write_mesh_descriptor(&self, write: &MeshDescriptorWrite) {
        let mut st = self.state.borrow_mut();
        st.require_live(Kind::DescriptorSet, write.set.as_raw(), "descriptor write");
        st.require_live(Kind::Buffer, write.uniform_buffer.as_raw(), "descriptor write");
        st.require_live(Kind::ImageView, write.texture_view.as_raw(), "descriptor write");
        st.require_live(Kind::Sampler, write.sampler.as_raw(), "descriptor write");
    }

    fn create_command_pool(&self) -> RenderResult<vk::CommandPool> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateCommandPool)
            .or_else(|r| fail(r, RenderError::CommandPool))?;
        Ok(vk::CommandPool::from_raw(st.alloc(Kind::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state
            .borrow_mut()
            .release(Kind::CommandPool, pool.as_raw());
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RenderResult<Vec<vk::CommandBuffer>> {
        let mut st = self.state.borrow_mut();
        st.check(Op::AllocateCommandBuffers)
            .or_else(|r| fail(r, RenderError::CommandBuffers))?;
        st.require_live(Kind::CommandPool, pool.as_raw(), "allocate command buffers");
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(st.alloc(Kind::CommandBuffer)))
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut st = self.state.borrow_mut();
        for cmd in buffers {
            st.release(Kind::CommandBuffer, cmd.as_raw());
        }
    }

    fn submit_one_shot(&self, pool: vk::CommandPool, ops: &[TransferOp]) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.check(Op::SubmitOneShot)
            .or_else(|r| fail(r, RenderError::Transfer))?;
        st.require_live(Kind::CommandPool, pool.as_raw(), "one-shot");
        for op in ops {
            match *op {
                TransferOp::CopyBuffer { src, dst, size } => {
                    let s = st.buffer_memory.get(&src.as_raw()).copied();
                    let d = st.buffer_memory.get(&dst.as_raw()).copied();
                    st.copy(s, d, size as usize);
                }
                TransferOp::CopyBufferToImage { src, dst, extent } => {
                    let s = st.buffer_memory.get(&src.as_raw()).copied();
                    let d = st.image_memory.get(&dst.as_raw()).copied();
                    st.copy(s, d, extent.width as usize * extent.height as usize * 4);
                }
                TransferOp::Barrier(b) => {
                    st.require_live(Kind::Image, b.image.as_raw(), "barrier");
                }
            }
        }
        st.events.push(Event::OneShot(ops.to_vec()));
        Ok(())
    }

    fn record_frame(&self, cmd: vk::CommandBuffer, frame: &FrameCommands) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.check(Op::RecordFrame)
            .or_else(|r| fail(r, RenderError::CommandBuffers))?;
        st.require_live(Kind::CommandBuffer, cmd.as_raw(), "record");
        st.require_live(Kind::Framebuffer, frame.framebuffer.as_raw(), "record");
        st.require_live(Kind::Pipeline, frame.pipeline.as_raw(), "record");
        for d in &frame.draws {
            st.require_live(Kind::DescriptorSet, d.descriptor_set.as_raw(), "draw");
            st.require_live(Kind::Buffer, d.vertex_buffer.as_raw(), "draw");
            st.require_live(Kind::Buffer, d.index_buffer.as_raw(), "draw");
        }
        st.events.push(Event::Record(cmd, frame.draws.len()));
        Ok(())
    }

    fn submit_frame(&self, submit: &FrameSubmit) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.check(Op::SubmitFrame)
            .or_else(|r| fail(r, RenderError::Submit))?;
        st.consume_semaphore(submit.wait, "submit");
        st.signal_semaphore(submit.signal, "submit");
        let armed = match st.fence_signaled.get_mut(&submit.fence.as_raw()) {
            Some(s) if !*s => {
                *s = true;
                true
            }
            _ => false,
        };
        if !armed {
            st.violations
                .push("submit with a signaled or unknown fence".into());
        }
        st.events.push(Event::Submit(*submit));
        Ok(())
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateSemaphore)
            .or_else(|r| fail(r, RenderError::SyncObject))?;
        let raw = st.alloc(Kind::Semaphore);
        st.semaphore_signaled.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut st = self.state.borrow_mut();
        st.release(Kind::Semaphore, semaphore.as_raw());
        st.semaphore_signaled.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut st = self.state.borrow_mut();
        st.check(Op::CreateFence)
            .or_else(|r| fail(r, RenderError::SyncObject))?;
        let raw = st.alloc(Kind::Fence);
        st.fence_signaled.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut st = self.state.borrow_mut();
        st.release(Kind::Fence, fence.as_raw());
        st.fence_signaled.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.check(Op::WaitFence)
            .or_else(|r| fail(r, RenderError::Fence))?;
        st.events.push(Event::WaitFence(fence));
        if st.fence_signaled.get(&fence.as_raw()) != Some(&true) {
            st.violations.push("wait on a fence that will never signal".into());
            return Err(RenderError::Fence(vk::Result::TIMEOUT));
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.events.push(Event::ResetFence(fence));
        let known = match st.fence_signaled.get_mut(&fence.as_raw()) {
            Some(s) => {
                *s = false;
                true
            }
            None => false,
        };
        if !known {
            st.violations.push("reset of unknown fence".into());
        }
        Ok(())
    }
}
