// SPDX-License-Identifier: CEPL-1.0
//! Binary glTF meshes and their base-colour textures, turned into
//! [`MeshData`] the renderer can upload.
#![deny(unsafe_op_in_unsafe_fn)]

use anyhow::{anyhow, bail, Context, Result};
use gltf::mesh::util::ReadIndices;
use gltf::mesh::Mode;
use prism_render::{IndexData, MeshData, TextureData};
use std::path::Path;
use tracing::{debug, info, warn};

pub const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_HEADER_LEN: usize = 12;

/// The fixed 12-byte header of a `.glb` container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlbHeader {
    pub version: u32,
    pub length: u32,
}

impl GlbHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(header) = bytes.get(..GLB_HEADER_LEN) else {
            bail!("too short for a GLB header ({} bytes)", bytes.len());
        };
        if &header[..4] != GLB_MAGIC {
            bail!("not a GLB container (bad magic)");
        }
        let word = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
        let version = word(4);
        let length = word(8);
        if version != 2 {
            bail!("unsupported GLB version {version}");
        }
        if length as usize > bytes.len() {
            bail!("GLB declares {length} bytes, file has {}", bytes.len());
        }
        Ok(Self { version, length })
    }
}

/// Decodes any format the `image` crate was built with into tightly packed
/// RGBA8.
pub fn decode_rgba(bytes: &[u8]) -> Result<TextureData> {
    let img = image::load_from_memory(bytes)
        .context("decoding texture")?
        .to_rgba8();
    let (width, height) = img.dimensions();
    Ok(TextureData {
        width,
        height,
        rgba: img.into_raw(),
    })
}

pub fn load_glb(path: &Path) -> Result<Vec<MeshData>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let meshes = parse_glb(&bytes).with_context(|| format!("loading {}", path.display()))?;
    info!("{}: {} primitive(s)", path.display(), meshes.len());
    Ok(meshes)
}

/// One `MeshData` per triangle-list primitive, in document order.
pub fn parse_glb(bytes: &[u8]) -> Result<Vec<MeshData>> {
    GlbHeader::parse(bytes)?;
    let gltf = gltf::Gltf::from_slice(bytes).context("parsing glTF")?;
    let blob = gltf.blob.as_deref();

    let mut out = Vec::new();
    for mesh in gltf.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                warn!(mesh = mesh.index(), mode = ?primitive.mode(), "skipping non-triangle primitive");
                continue;
            }
            let reader = primitive.reader(|buffer| match buffer.source() {
                gltf::buffer::Source::Bin => blob,
                gltf::buffer::Source::Uri(_) => None,
            });

            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .ok_or_else(|| anyhow!("mesh {} has a primitive without positions", mesh.index()))?
                .collect();
            let uvs = reader
                .read_tex_coords(0)
                .map(|t| t.into_f32().collect::<Vec<_>>());
            let indices = match reader.read_indices() {
                Some(ReadIndices::U8(it)) => IndexData::U8(it.collect()),
                Some(ReadIndices::U16(it)) => IndexData::U16(it.collect()),
                Some(ReadIndices::U32(it)) => IndexData::U32(it.collect()),
                None => IndexData::U32((0..positions.len() as u32).collect()),
            };
            let texture = base_color_texture(&primitive, blob)?;

            debug!(
                mesh = mesh.index(),
                vertices = positions.len(),
                textured = texture.width > 1 || texture.height > 1,
                "primitive read"
            );
            out.push(MeshData::from_attributes(positions, uvs, indices, texture));
        }
    }
    if out.is_empty() {
        bail!("no triangle primitives");
    }
    Ok(out)
}

/// Embedded base-colour image, or 1x1 white when the material has none.
fn base_color_texture(primitive: &gltf::Primitive<'_>, blob: Option<&[u8]>) -> Result<TextureData> {
    let Some(info) = primitive
        .material()
        .pbr_metallic_roughness()
        .base_color_texture()
    else {
        return Ok(TextureData::white());
    };
    match info.texture().source().source() {
        gltf::image::Source::View { view, .. } => {
            if let gltf::buffer::Source::Uri(uri) = view.buffer().source() {
                bail!("embedded texture view points at external buffer {uri}");
            }
            let blob = blob.ok_or_else(|| anyhow!("texture refers to a missing BIN chunk"))?;
            let start = view.offset();
            let bytes = blob
                .get(start..start + view.length())
                .ok_or_else(|| anyhow!("texture view out of range"))?;
            decode_rgba(bytes)
        }
        gltf::image::Source::Uri { uri, .. } => {
            warn!(uri, "external texture not supported, using white");
            Ok(TextureData::white())
        }
    }
}
