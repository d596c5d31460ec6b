// SPDX-License-Identifier: CEPL-1.0
//! Staged uploads into device-local memory.
//!
//! Host bytes go into a host-visible staging buffer, a one-shot command
//! buffer copies them into the destination, and the queue is drained
//! before the staging buffer is freed. The destination is rolled back on
//! any failure; the staging buffer is always released.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{Gpu, GpuBuffer, GpuImage, ImageDesc, LayoutBarrier, TransferOp};
use crate::unwind::Unwind;
use ash::vk;
use prism_render::TextureData;
use tracing::debug;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

const STAGING_PROPS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// The only two layout changes uploads need. Anything else is rejected
/// before a command buffer is touched.
pub fn layout_barrier(
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RenderResult<LayoutBarrier> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => return Err(RenderError::UnsupportedLayoutTransition { old, new }),
    };
    Ok(LayoutBarrier {
        image,
        old_layout: old,
        new_layout: new,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Standalone one-shot layout change.
pub fn transition_image_layout<G: Gpu + ?Sized>(
    gpu: &G,
    pool: vk::CommandPool,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RenderResult<()> {
    let barrier = layout_barrier(image, old, new)?;
    gpu.submit_one_shot(pool, &[TransferOp::Barrier(barrier)])
}

/// Staging buffer filled with `bytes`. Caller owns the result.
fn stage<G: Gpu + ?Sized>(gpu: &G, bytes: &[u8]) -> RenderResult<GpuBuffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = gpu.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, STAGING_PROPS)?;
    let mapped = match gpu.map_memory(staging.memory, size) {
        Ok(p) => p,
        Err(e) => {
            gpu.destroy_buffer(staging);
            return Err(e);
        }
    };
    // SAFETY: the mapping covers `size` bytes and does not alias `bytes`.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.as_ptr(), bytes.len());
    }
    gpu.unmap_memory(staging.memory);
    Ok(staging)
}

/// Uploads `bytes` into a new device-local buffer with `usage`
/// (TRANSFER_DST is added).
pub fn upload_buffer<G: Gpu + ?Sized>(
    gpu: &G,
    pool: vk::CommandPool,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> RenderResult<GpuBuffer> {
    if bytes.is_empty() {
        // Vulkan forbids zero-sized buffers.
        return Err(RenderError::EmptyUpload);
    }
    let size = bytes.len() as vk::DeviceSize;
    let staging = stage(gpu, bytes)?;
    let mut cleanup = Unwind::new();
    cleanup.push("staging buffer", move || gpu.destroy_buffer(staging));

    let dst = gpu.create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let mut rollback = Unwind::new();
    rollback.push("destination buffer", move || gpu.destroy_buffer(dst));

    gpu.submit_one_shot(
        pool,
        &[TransferOp::CopyBuffer {
            src: staging.buffer,
            dst: dst.buffer,
            size,
        }],
    )?;
    rollback.disarm();
    debug!(bytes = size, ?usage, "uploaded buffer");
    Ok(dst)
}

/// Uploads RGBA8 texels into a sampled image left in
/// SHADER_READ_ONLY_OPTIMAL.
pub fn upload_texture<G: Gpu + ?Sized>(
    gpu: &G,
    pool: vk::CommandPool,
    texture: &TextureData,
) -> RenderResult<GpuImage> {
    let expected = texture.width as usize * texture.height as usize * 4;
    if expected == 0 || texture.rgba.len() != expected {
        return Err(RenderError::TextureSize {
            width: texture.width,
            height: texture.height,
            expected,
            actual: texture.rgba.len(),
        });
    }
    let extent = vk::Extent2D {
        width: texture.width,
        height: texture.height,
    };
    let staging = stage(gpu, &texture.rgba)?;
    let mut cleanup = Unwind::new();
    cleanup.push("staging buffer", move || gpu.destroy_buffer(staging));

    let image = gpu.create_image(&ImageDesc {
        extent,
        format: TEXTURE_FORMAT,
        usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
    })?;
    let mut rollback = Unwind::new();
    rollback.push("texture image", move || gpu.destroy_image(image));

    let ops = [
        TransferOp::Barrier(layout_barrier(
            image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?),
        TransferOp::CopyBufferToImage {
            src: staging.buffer,
            dst: image.image,
            extent,
        },
        TransferOp::Barrier(layout_barrier(
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?),
    ];
    gpu.submit_one_shot(pool, &ops)?;
    rollback.disarm();
    debug!(
        width = texture.width,
        height = texture.height,
        "uploaded texture"
    );
    Ok(image)
}
