// SPDX-License-Identifier: CEPL-1.0
//! CPU-side mesh payloads handed to a renderer backend.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

/// Tightly packed RGBA8 texels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    pub fn solid(rgba: [u8; 4], width: u32, height: u32) -> Self {
        let texels = (width as usize) * (height as usize);
        Self {
            width,
            height,
            rgba: rgba.repeat(texels),
        }
    }

    pub fn white() -> Self {
        Self::solid([255; 4], 1, 1)
    }
}

/// Indices as stored by the source; the renderer only consumes 32-bit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn into_u32(self) -> Vec<u32> {
        match self {
            IndexData::U8(v) => v.into_iter().map(u32::from).collect(),
            IndexData::U16(v) => v.into_iter().map(u32::from).collect(),
            IndexData::U32(v) => v,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshDataError {
    #[error("mesh has no vertices")]
    NoVertices,
    #[error("mesh has no indices")]
    NoIndices,
    #[error("index {index} out of range for {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },
    #[error("texture is {width}x{height} but carries {len} bytes")]
    TextureSize { width: u32, height: u32, len: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub texture: TextureData,
}

impl MeshData {
    /// Builds vertices from loose attributes. Colour is white; a missing uv
    /// set (or a short one) maps to (0, 0).
    pub fn from_attributes(
        positions: Vec<[f32; 3]>,
        uvs: Option<Vec<[f32; 2]>>,
        indices: IndexData,
        texture: TextureData,
    ) -> Self {
        let uvs = uvs.unwrap_or_default();
        let vertices = positions
            .into_iter()
            .enumerate()
            .map(|(i, position)| Vertex {
                position,
                color: [1.0; 3],
                uv: uvs.get(i).copied().unwrap_or([0.0; 2]),
            })
            .collect();
        Self {
            vertices,
            indices: indices.into_u32(),
            texture,
        }
    }

    pub fn validate(&self) -> Result<(), MeshDataError> {
        if self.vertices.is_empty() {
            return Err(MeshDataError::NoVertices);
        }
        if self.indices.is_empty() {
            return Err(MeshDataError::NoIndices);
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            return Err(MeshDataError::IndexOutOfRange {
                index,
                vertices: self.vertices.len(),
            });
        }
        let t = &self.texture;
        let want = (t.width as usize) * (t.height as usize) * 4;
        if t.width == 0 || t.height == 0 || t.rgba.len() != want {
            return Err(MeshDataError::TextureSize {
                width: t.width,
                height: t.height,
                len: t.rgba.len(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Cube,
}

/// Where a mesh comes from. Both variants feed the same construction path.
#[derive(Clone, Debug, PartialEq)]
pub enum MeshSource {
    Builtin(Primitive),
    Loaded(MeshData),
}

impl MeshSource {
    pub fn into_data(self) -> MeshData {
        match self {
            MeshSource::Builtin(Primitive::Cube) => cube(),
            MeshSource::Loaded(data) => data,
        }
    }
}

const FACE_COLORS: [[f32; 3]; 6] = [
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 1.0, 0.0],
    [1.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
];

// Corners per face, counter-clockwise seen from outside.
const FACES: [[[f32; 3]; 4]; 6] = {
    const H: f32 = 0.5;
    [
        [[-H, -H, H], [H, -H, H], [H, H, H], [-H, H, H]],
        [[H, -H, -H], [-H, -H, -H], [-H, H, -H], [H, H, -H]],
        [[H, -H, H], [H, -H, -H], [H, H, -H], [H, H, H]],
        [[-H, -H, -H], [-H, -H, H], [-H, H, H], [-H, H, -H]],
        [[-H, H, H], [H, H, H], [H, H, -H], [-H, H, -H]],
        [[-H, -H, -H], [H, -H, -H], [H, -H, H], [-H, -H, H]],
    ]
};

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

/// Unit cube: 24 vertices (4 per face, own colour per face), 36 indices,
/// 2x2 white texture.
pub fn cube() -> MeshData {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, corners) in FACES.iter().enumerate() {
        let base = vertices.len() as u32;
        for (corner, &position) in corners.iter().enumerate() {
            vertices.push(Vertex {
                position,
                color: FACE_COLORS[face],
                uv: FACE_UVS[corner],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    MeshData {
        vertices,
        indices,
        texture: TextureData::solid([255; 4], 2, 2),
    }
}
