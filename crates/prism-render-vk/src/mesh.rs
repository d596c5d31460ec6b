// SPDX-License-Identifier: CEPL-1.0
//! Per-mesh GPU state: geometry, texture, one uniform buffer and one
//! descriptor set per frame slot.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{DrawCall, Gpu, GpuBuffer, GpuImage, MeshDescriptorWrite};
use crate::upload::{upload_buffer, upload_texture, TEXTURE_FORMAT};
use crate::unwind::Unwind;
use ash::vk;
use prism_math::MeshUniforms;
use prism_render::{MeshData, MeshSource, MAX_FRAMES_IN_FLIGHT};
use std::ptr::NonNull;
use tracing::{debug, info};

const UNIFORM_SIZE: vk::DeviceSize = std::mem::size_of::<MeshUniforms>() as vk::DeviceSize;

/// Host-visible, host-coherent uniform buffer mapped for its whole life.
#[derive(Debug)]
pub struct UniformSlot {
    pub buffer: GpuBuffer,
    mapped: NonNull<u8>,
}

impl UniformSlot {
    fn create<G: Gpu + ?Sized>(gpu: &G) -> RenderResult<Self> {
        let buffer = gpu.create_buffer(
            UNIFORM_SIZE,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        match gpu.map_memory(buffer.memory, UNIFORM_SIZE) {
            Ok(mapped) => Ok(Self { buffer, mapped }),
            Err(e) => {
                gpu.destroy_buffer(buffer);
                Err(e)
            }
        }
    }

    /// Plain memory copy into the persistent mapping. Only call for a slot
    /// whose in-flight fence has been waited on.
    pub fn write(&self, uniforms: &MeshUniforms) {
        let bytes = bytemuck::bytes_of(uniforms);
        // SAFETY: the mapping is UNIFORM_SIZE bytes, host-coherent, and the
        // GPU is not reading this slot.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.as_ptr(), bytes.len());
        }
    }

    fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        gpu.unmap_memory(self.buffer.memory);
        gpu.destroy_buffer(self.buffer);
    }
}

#[derive(Debug)]
pub struct MeshResource {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    pub index_count: u32,
    pub texture: GpuImage,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub uniforms: Vec<UniformSlot>,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

impl MeshResource {
    /// Everything for one mesh. Descriptor sets come from `pool` and are
    /// released with it.
    fn build<G: Gpu + ?Sized>(
        gpu: &G,
        command_pool: vk::CommandPool,
        descriptor_pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        data: &MeshData,
    ) -> RenderResult<Self> {
        let mut unwind = Unwind::new();

        let vertex = upload_buffer(
            gpu,
            command_pool,
            bytemuck::cast_slice(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        unwind.push("vertex buffer", move || gpu.destroy_buffer(vertex));

        let index = upload_buffer(
            gpu,
            command_pool,
            bytemuck::cast_slice(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        unwind.push("index buffer", move || gpu.destroy_buffer(index));

        let texture = upload_texture(gpu, command_pool, &data.texture)?;
        unwind.push("texture", move || gpu.destroy_image(texture));
        let texture_view =
            gpu.create_image_view(texture.image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;
        unwind.push("texture view", move || gpu.destroy_image_view(texture_view));
        let sampler = gpu.create_sampler()?;
        unwind.push("sampler", move || gpu.destroy_sampler(sampler));

        let mut uniforms = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let slot = UniformSlot::create(gpu)?;
            let buffer = slot.buffer;
            unwind.push("uniform buffer", move || {
                gpu.unmap_memory(buffer.memory);
                gpu.destroy_buffer(buffer);
            });
            uniforms.push(slot);
        }

        let descriptor_sets =
            gpu.allocate_descriptor_sets(descriptor_pool, set_layout, MAX_FRAMES_IN_FLIGHT)?;
        for (set, slot) in descriptor_sets.iter().zip(&uniforms) {
            gpu.write_mesh_descriptor(&MeshDescriptorWrite {
                set: *set,
                uniform_buffer: slot.buffer.buffer,
                uniform_range: UNIFORM_SIZE,
                texture_view,
                sampler,
            });
        }
        unwind.disarm();

        Ok(Self {
            vertex,
            index,
            index_count: data.indices.len() as u32,
            texture,
            texture_view,
            sampler,
            uniforms,
            descriptor_sets,
        })
    }

    pub fn draw_call(&self, slot: usize) -> DrawCall {
        DrawCall {
            descriptor_set: self.descriptor_sets[slot],
            vertex_buffer: self.vertex.buffer,
            index_buffer: self.index.buffer,
            index_count: self.index_count,
        }
    }

    fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        for slot in self.uniforms {
            slot.destroy(gpu);
        }
        gpu.destroy_sampler(self.sampler);
        gpu.destroy_image_view(self.texture_view);
        gpu.destroy_image(self.texture);
        gpu.destroy_buffer(self.index);
        gpu.destroy_buffer(self.vertex);
    }
}

/// All meshes plus the descriptor pool their sets come from.
#[derive(Debug, Default)]
pub struct MeshSet {
    pool: vk::DescriptorPool,
    meshes: Vec<MeshResource>,
}

/// One entry per descriptor type, each `slots * mesh_count` deep.
pub fn pool_sizes(mesh_count: usize) -> [vk::DescriptorPoolSize; 2] {
    let count = (MAX_FRAMES_IN_FLIGHT * mesh_count) as u32;
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: count,
        },
    ]
}

impl MeshSet {
    pub fn build<G: Gpu + ?Sized>(
        gpu: &G,
        command_pool: vk::CommandPool,
        set_layout: vk::DescriptorSetLayout,
        sources: Vec<MeshSource>,
    ) -> RenderResult<Self> {
        let data: Vec<MeshData> = sources.into_iter().map(MeshSource::into_data).collect();
        for (index, mesh) in data.iter().enumerate() {
            mesh.validate()
                .map_err(|source| RenderError::InvalidMesh { index, source })?;
        }
        if data.is_empty() {
            return Ok(Self {
                pool: vk::DescriptorPool::null(),
                meshes: Vec::new(),
            });
        }

        let max_sets = (MAX_FRAMES_IN_FLIGHT * data.len()) as u32;
        let pool = gpu.create_descriptor_pool(&pool_sizes(data.len()), max_sets)?;
        let mut meshes: Vec<MeshResource> = Vec::with_capacity(data.len());
        for (i, mesh) in data.iter().enumerate() {
            match MeshResource::build(gpu, command_pool, pool, set_layout, mesh) {
                Ok(m) => {
                    debug!(
                        mesh = i,
                        vertices = mesh.vertices.len(),
                        indices = m.index_count,
                        "mesh resident"
                    );
                    meshes.push(m);
                }
                Err(e) => {
                    for m in meshes.drain(..).rev() {
                        m.destroy(gpu);
                    }
                    gpu.destroy_descriptor_pool(pool);
                    return Err(e);
                }
            }
        }
        info!("{} mesh(es) uploaded", meshes.len());
        Ok(Self { pool, meshes })
    }

    pub fn meshes(&self) -> &[MeshResource] {
        &self.meshes
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn write_uniforms(&self, slot: usize, uniforms: &MeshUniforms) {
        for mesh in &self.meshes {
            mesh.uniforms[slot].write(uniforms);
        }
    }

    pub fn draw_calls(&self, slot: usize) -> Vec<DrawCall> {
        self.meshes.iter().map(|m| m.draw_call(slot)).collect()
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        for mesh in self.meshes.into_iter().rev() {
            mesh.destroy(gpu);
        }
        if self.pool != vk::DescriptorPool::null() {
            gpu.destroy_descriptor_pool(self.pool);
        }
    }
}
