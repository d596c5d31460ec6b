// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, RenderResult};
use crate::gpu::{DescriptorBinding, Gpu, PipelineDesc, RenderPassDesc};
use crate::unwind::Unwind;
use ash::util::read_spv;
use ash::vk;
use prism_render::Vertex;
use std::io::Cursor;
use std::mem::{offset_of, size_of};
use std::path::Path;
use tracing::debug;

/// Binding 0: per-mesh uniform block (vertex stage).
/// Binding 1: per-mesh texture + sampler (fragment stage).
pub const MESH_BINDINGS: [DescriptorBinding; 2] = [
    DescriptorBinding {
        binding: 0,
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        stages: vk::ShaderStageFlags::VERTEX,
    },
    DescriptorBinding {
        binding: 1,
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        stages: vk::ShaderStageFlags::FRAGMENT,
    },
];

/// Binding 0, per-vertex: position (loc 0), colour (loc 1), uv (loc 2).
pub fn vertex_layout() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 3],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attrs = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, uv) as u32,
        },
    ];
    (binding, attrs)
}

/// Orders this frame's attachment writes after the previous use of the same
/// attachments. The depth image is shared by every frame in flight, so the
/// source side includes the late depth writes of the frame before.
pub fn frame_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// SPIR-V words for the two stages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

const BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
const BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

impl ShaderSet {
    pub fn load(vertex: &Path, fragment: &Path) -> RenderResult<Self> {
        Ok(Self {
            vertex: load_spv(vertex)?,
            fragment: load_spv(fragment)?,
        })
    }

    /// The mesh shaders compiled into the crate.
    pub fn builtin() -> RenderResult<Self> {
        Ok(Self {
            vertex: decode_spv(Path::new("<builtin>/mesh.vert"), BUILTIN_VERT)?,
            fragment: decode_spv(Path::new("<builtin>/mesh.frag"), BUILTIN_FRAG)?,
        })
    }

    /// Each stage from its file when given, else the builtin one.
    pub fn resolve(vertex: Option<&Path>, fragment: Option<&Path>) -> RenderResult<Self> {
        let builtin = Self::builtin()?;
        Ok(Self {
            vertex: vertex.map_or(Ok(builtin.vertex), load_spv)?,
            fragment: fragment.map_or(Ok(builtin.fragment), load_spv)?,
        })
    }
}

fn load_spv(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;
    let words = decode_spv(path, &bytes)?;
    debug!(path = %path.display(), words = words.len(), "loaded shader");
    Ok(words)
}

fn decode_spv(path: &Path, bytes: &[u8]) -> RenderResult<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Render pass, descriptor layout and the graphics pipeline. The render
/// pass and pipeline depend on the swapchain colour format; the
/// descriptor layout does not.
#[derive(Clone, Debug, Default)]
pub struct PipelineResources {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    shaders: ShaderSet,
}

struct FormatBound {
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
}

impl PipelineResources {
    pub fn build<G: Gpu + ?Sized>(
        gpu: &G,
        shaders: ShaderSet,
        color_format: vk::Format,
    ) -> RenderResult<Self> {
        let depth_format = gpu.depth_format();
        let mut unwind = Unwind::new();

        let set_layout = gpu.create_descriptor_set_layout(&MESH_BINDINGS)?;
        unwind.push("descriptor set layout", move || {
            gpu.destroy_descriptor_set_layout(set_layout)
        });
        let pipeline_layout = gpu.create_pipeline_layout(set_layout)?;
        unwind.push("pipeline layout", move || {
            gpu.destroy_pipeline_layout(pipeline_layout)
        });
        let bound = build_format_bound(gpu, &shaders, pipeline_layout, color_format, depth_format)?;
        unwind.disarm();

        Ok(Self {
            set_layout,
            pipeline_layout,
            render_pass: bound.render_pass,
            pipeline: bound.pipeline,
            color_format,
            depth_format,
            shaders,
        })
    }

    /// Rebuilds render pass and pipeline for a new colour format. A no-op
    /// when the format is unchanged. On failure the old objects stay.
    pub fn rebuild_for_format<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        color_format: vk::Format,
    ) -> RenderResult<bool> {
        if color_format == self.color_format {
            return Ok(false);
        }
        let bound = build_format_bound(
            gpu,
            &self.shaders,
            self.pipeline_layout,
            color_format,
            self.depth_format,
        )?;
        gpu.destroy_pipeline(self.pipeline);
        gpu.destroy_render_pass(self.render_pass);
        debug!(from = ?self.color_format, to = ?color_format, "rebuilt pipeline for new format");
        self.render_pass = bound.render_pass;
        self.pipeline = bound.pipeline;
        self.color_format = color_format;
        Ok(true)
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        gpu.destroy_pipeline(self.pipeline);
        gpu.destroy_render_pass(self.render_pass);
        gpu.destroy_pipeline_layout(self.pipeline_layout);
        gpu.destroy_descriptor_set_layout(self.set_layout);
    }
}

fn build_format_bound<G: Gpu + ?Sized>(
    gpu: &G,
    shaders: &ShaderSet,
    layout: vk::PipelineLayout,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> RenderResult<FormatBound> {
    let render_pass = gpu.create_render_pass(&RenderPassDesc {
        color: color_format,
        depth: depth_format,
        dependency: frame_dependency(),
    })?;
    let mut unwind = Unwind::new();
    unwind.push("render pass", move || gpu.destroy_render_pass(render_pass));

    let (vertex_binding, vertex_attributes) = vertex_layout();
    let pipeline = gpu.create_graphics_pipeline(&PipelineDesc {
        vertex_spv: &shaders.vertex,
        fragment_spv: &shaders.fragment,
        render_pass,
        layout,
        vertex_binding,
        vertex_attributes: &vertex_attributes,
    })?;
    unwind.disarm();
    Ok(FormatBound {
        render_pass,
        pipeline,
    })
}
