// SPDX-License-Identifier: CEPL-1.0
use crate::error::RenderResult;
use crate::gpu::Gpu;
use crate::unwind::Unwind;
use ash::vk;
use prism_render::MAX_FRAMES_IN_FLIGHT;

/// Sync objects for one frame slot. The fence starts signaled so the first
/// wait on each slot returns immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn create<G: Gpu + ?Sized>(gpu: &G) -> RenderResult<Self> {
        let mut unwind = Unwind::new();
        let image_available = gpu.create_semaphore()?;
        unwind.push("image-available semaphore", move || {
            gpu.destroy_semaphore(image_available)
        });
        let render_finished = gpu.create_semaphore()?;
        unwind.push("render-finished semaphore", move || {
            gpu.destroy_semaphore(render_finished)
        });
        let in_flight = gpu.create_fence(true)?;
        unwind.disarm();
        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        gpu.destroy_fence(self.in_flight);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_semaphore(self.image_available);
    }
}

/// Command pool (also used for one-shot uploads), one primary command
/// buffer per slot, one `FrameSync` per slot.
#[derive(Clone, Debug, Default)]
pub struct FrameResources {
    pub command_pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub sync: Vec<FrameSync>,
}

impl FrameResources {
    pub fn create<G: Gpu + ?Sized>(gpu: &G) -> RenderResult<Self> {
        let mut unwind = Unwind::new();
        let command_pool = gpu.create_command_pool()?;
        unwind.push("command pool", move || gpu.destroy_command_pool(command_pool));

        let command_buffers =
            gpu.allocate_command_buffers(command_pool, MAX_FRAMES_IN_FLIGHT as u32)?;
        {
            let bufs = command_buffers.clone();
            unwind.push("frame command buffers", move || {
                gpu.free_command_buffers(command_pool, &bufs)
            });
        }

        let mut sync = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let s = FrameSync::create(gpu)?;
            unwind.push("frame sync", move || s.destroy(gpu));
            sync.push(s);
        }
        unwind.disarm();

        Ok(Self {
            command_pool,
            command_buffers,
            sync,
        })
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        for s in self.sync.into_iter().rev() {
            s.destroy(gpu);
        }
        gpu.free_command_buffers(self.command_pool, &self.command_buffers);
        gpu.destroy_command_pool(self.command_pool);
    }
}
