// SPDX-License-Identifier: CEPL-1.0
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameResources;
use crate::gpu::{Acquire, FrameCommands, FrameSubmit, Gpu};
use crate::mesh::MeshSet;
use crate::pipeline::{PipelineResources, ShaderSet};
use crate::swapchain::{Swapchain, SwapchainInfo};
use crate::unwind::Unwind;
use anyhow::{Context, Result};
use prism_render::{FrameOutcome, FrameState, MeshSource, RenderSize, Renderer, Scene, SurfaceProvider};
use tracing::{error, info, warn};

/// Consecutive failed swapchain rebuilds tolerated before the error is
/// surfaced to the caller.
pub const RECREATE_RETRY_LIMIT: u32 = 3;

pub struct VkRenderer<G: Gpu = DeviceContext> {
    // `None` only while degraded after a failed rebuild.
    swapchain: Option<Swapchain>,
    pipeline: PipelineResources,
    frames: FrameResources,
    meshes: MeshSet,
    clear_color: [f32; 4],
    recreate_failures: u32,
    // Declared last: dropped after `Drop::drop` released everything above.
    gpu: G,
}

struct Parts {
    swapchain: Swapchain,
    pipeline: PipelineResources,
    frames: FrameResources,
    meshes: MeshSet,
}

// STRICT ORDER (build):
// 1) swapchain + views + depth (no framebuffers yet)
// 2) descriptor layout, pipeline layout, render pass, pipeline
// 3) framebuffers against that render pass
// 4) command pool, per-slot command buffers and sync
// 5) meshes (uploads use the pool from 4)
// Failure at any step tears down the finished steps in reverse.
fn build_parts<G: Gpu>(
    gpu: &G,
    drawable: RenderSize,
    shaders: ShaderSet,
    sources: Vec<MeshSource>,
) -> RenderResult<Parts> {
    let mut unwind = Unwind::new();

    let info = SwapchainInfo::populate(gpu)?;
    let mut swapchain = Swapchain::build(gpu, &info, drawable)?;
    {
        let sc = swapchain.clone();
        unwind.push("swapchain", move || sc.destroy(gpu));
    }

    let pipeline = PipelineResources::build(gpu, shaders, swapchain.surface_format.format)?;
    {
        let p = pipeline.clone();
        unwind.push("pipeline", move || p.destroy(gpu));
    }

    swapchain.bind_framebuffers(gpu, pipeline.render_pass)?;
    {
        let fbs = swapchain.framebuffers.clone();
        unwind.push("framebuffers", move || {
            for fb in fbs {
                gpu.destroy_framebuffer(fb);
            }
        });
    }

    let frames = FrameResources::create(gpu)?;
    {
        let f = frames.clone();
        unwind.push("frame resources", move || f.destroy(gpu));
    }

    let meshes = MeshSet::build(gpu, frames.command_pool, pipeline.set_layout, sources)?;
    unwind.disarm();

    Ok(Parts {
        swapchain,
        pipeline,
        frames,
        meshes,
    })
}

impl<G: Gpu> VkRenderer<G> {
    pub fn with_gpu(
        gpu: G,
        drawable: RenderSize,
        shaders: ShaderSet,
        meshes: Vec<MeshSource>,
    ) -> RenderResult<Self> {
        let parts = build_parts(&gpu, drawable, shaders, meshes)?;
        info!(
            "renderer ready: {} mesh(es), {} swapchain image(s)",
            parts.meshes.len(),
            parts.swapchain.images.len()
        );
        Ok(Self {
            swapchain: Some(parts.swapchain),
            pipeline: parts.pipeline,
            frames: parts.frames,
            meshes: parts.meshes,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            recreate_failures: 0,
            gpu,
        })
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn pipeline(&self) -> &PipelineResources {
        &self.pipeline
    }

    pub fn meshes(&self) -> &MeshSet {
        &self.meshes
    }

    pub fn is_degraded(&self) -> bool {
        self.swapchain.is_none()
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    // STRICT PER-FRAME ORDER (slot i = state.current_frame()):
    // 1) wait in_flight[i]          (slot i's previous submission is done)
    // 2) acquire -> image_available[i]; out-of-date: rebuild, end tick
    // 3) reset in_flight[i]         (only once we know we will submit)
    // 4) write uniforms[i], record cmd[i]
    // 5) submit: wait image_available[i], signal render_finished[i], fence in_flight[i]
    // 6) present: wait render_finished[i]; stale or resized: rebuild
    // 7) advance i
    pub fn draw_frame(
        &mut self,
        state: &mut FrameState,
        drawable: RenderSize,
    ) -> RenderResult<FrameOutcome> {
        if drawable.is_empty() {
            return Ok(FrameOutcome::Paused);
        }
        if self.swapchain.is_none() {
            if !self.recreate_swapchain(drawable)? {
                return Ok(FrameOutcome::Skipped);
            }
            state.resized = false;
        }

        let slot = state.current_frame();
        let sync = self.frames.sync[slot];
        let cmd = self.frames.command_buffers[slot];

        self.gpu.wait_for_fence(sync.in_flight)?;

        let Some(handle) = self.swapchain.as_ref().map(|sc| sc.handle) else {
            return Ok(FrameOutcome::Skipped);
        };
        let image_index = match self.gpu.acquire_next_image(handle, sync.image_available)? {
            Acquire::Image { index, .. } => index,
            Acquire::OutOfDate => {
                info!("acquire: surface out of date, rebuilding swapchain");
                if self.recreate_swapchain(drawable)? {
                    state.resized = false;
                    return Ok(FrameOutcome::SwapchainRecreated);
                }
                return Ok(FrameOutcome::Skipped);
            }
        };
        let (framebuffer, extent) = self
            .swapchain
            .as_ref()
            .and_then(|sc| Some((sc.framebuffer(image_index)?, sc.extent)))
            .ok_or(RenderError::MissingFramebuffer(image_index))?;

        self.gpu.reset_fence(sync.in_flight)?;

        let aspect = RenderSize::new(extent.width, extent.height).aspect();
        self.meshes
            .write_uniforms(slot, &state.camera.uniforms(aspect));
        self.gpu.record_frame(
            cmd,
            &FrameCommands {
                render_pass: self.pipeline.render_pass,
                framebuffer,
                extent,
                clear_color: self.clear_color,
                pipeline: self.pipeline.pipeline,
                pipeline_layout: self.pipeline.pipeline_layout,
                draws: self.meshes.draw_calls(slot),
            },
        )?;
        self.gpu.submit_frame(&FrameSubmit {
            command_buffer: cmd,
            wait: sync.image_available,
            signal: sync.render_finished,
            fence: sync.in_flight,
        })?;

        let presented = self
            .gpu
            .present(handle, image_index, sync.render_finished)?;
        let mut recreated = false;
        if presented.is_stale() || state.resized {
            info!(?presented, resized = state.resized, "rebuilding swapchain after present");
            state.resized = false;
            recreated = self.recreate_swapchain(drawable)?;
        }

        state.advance();
        Ok(FrameOutcome::Presented { recreated })
    }

    // STRICT ORDER (recreate):
    // 1) device idle (nothing in flight references the old chain)
    // 2) destroy framebuffers, depth, views, swapchain
    //    (render pass, pipeline, meshes stay)
    // 3) re-query surface, build new chain
    // 4) rebuild render pass + pipeline only if the colour format changed
    // 5) bind framebuffers
    /// Returns whether a usable swapchain exists afterwards. A failed rebuild
    /// leaves the renderer degraded; the error is only returned once
    /// `RECREATE_RETRY_LIMIT` rebuilds in a row have failed.
    pub fn recreate_swapchain(&mut self, drawable: RenderSize) -> RenderResult<bool> {
        self.gpu.wait_idle()?;
        if let Some(old) = self.swapchain.take() {
            old.destroy(&self.gpu);
        }
        match self.rebuild_swapchain(drawable) {
            Ok(sc) => {
                if self.recreate_failures > 0 {
                    info!(
                        "swapchain restored after {} failed attempt(s)",
                        self.recreate_failures
                    );
                }
                self.swapchain = Some(sc);
                self.recreate_failures = 0;
                Ok(true)
            }
            Err(e) => {
                self.recreate_failures += 1;
                if self.recreate_failures >= RECREATE_RETRY_LIMIT {
                    error!(
                        attempts = self.recreate_failures,
                        "swapchain rebuild keeps failing: {e}"
                    );
                    return Err(e);
                }
                warn!(
                    attempt = self.recreate_failures,
                    "swapchain rebuild failed, skipping frames: {e}"
                );
                Ok(false)
            }
        }
    }

    fn rebuild_swapchain(&mut self, drawable: RenderSize) -> RenderResult<Swapchain> {
        let gpu = &self.gpu;
        let info = SwapchainInfo::populate(gpu)?;
        let mut sc = Swapchain::build(gpu, &info, drawable)?;
        let mut unwind = Unwind::new();
        {
            let s = sc.clone();
            unwind.push("swapchain", move || s.destroy(gpu));
        }
        self.pipeline
            .rebuild_for_format(gpu, sc.surface_format.format)?;
        sc.bind_framebuffers(gpu, self.pipeline.render_pass)?;
        unwind.disarm();
        Ok(sc)
    }
}

// STRICT TEARDOWN ORDER (reverse of build):
// device idle -> meshes -> frame sync/commands -> framebuffers
// -> pipeline/render pass/layouts -> depth/views/swapchain -> device.
impl<G: Gpu> Drop for VkRenderer<G> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            warn!("device idle before teardown failed: {e}");
        }
        std::mem::take(&mut self.meshes).destroy(&self.gpu);
        std::mem::take(&mut self.frames).destroy(&self.gpu);
        if let Some(sc) = self.swapchain.as_mut() {
            sc.destroy_framebuffers(&self.gpu);
        }
        std::mem::take(&mut self.pipeline).destroy(&self.gpu);
        if let Some(sc) = self.swapchain.take() {
            sc.destroy(&self.gpu);
        }
        info!("renderer torn down");
    }
}

impl Renderer for VkRenderer<DeviceContext> {
    fn new(surface: &dyn SurfaceProvider, scene: Scene) -> Result<Self> {
        let shaders = ShaderSet::resolve(
            scene.vertex_shader.as_deref(),
            scene.fragment_shader.as_deref(),
        )
        .context("loading SPIR-V shaders")?;
        let gpu = DeviceContext::create(surface).context("creating Vulkan device")?;
        let renderer = VkRenderer::with_gpu(gpu, surface.drawable_size(), shaders, scene.meshes)
            .context("building renderer resources")?;
        Ok(renderer)
    }

    fn render(&mut self, state: &mut FrameState, drawable: RenderSize) -> Result<FrameOutcome> {
        Ok(self.draw_frame(state, drawable)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        VkRenderer::set_clear_color(self, rgba);
    }
}
