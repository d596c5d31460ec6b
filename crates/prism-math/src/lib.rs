// SPDX-License-Identifier: CEPL-1.0
//! Camera and uniform-block math on top of glam.

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Vec3};

pub use glam;

/// Per-mesh uniform block: model, view and projection, column-major.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

/// Orbit-style camera: the model is rotated, the eye stays put.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// Model rotation in radians about x, y, z.
    pub rotation: Vec3,
    pub eye: Vec3,
    pub target: Vec3,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            rotation: Vec3::ZERO,
            eye: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            fov_y: 45f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Nudges the model rotation; angles wrap into (-TAU, TAU).
    pub fn rotate(&mut self, delta: Vec3) {
        let wrapped = (self.rotation + delta) % std::f32::consts::TAU;
        self.rotation = wrapped;
    }

    pub fn model(&self) -> Mat4 {
        let r = self.rotation;
        Mat4::from_euler(EulerRot::XYZ, r.x, r.y, r.z)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, Vec3::Y)
    }

    /// Right-handed, depth 0..1, with y flipped for Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        let mut p = Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far);
        p.y_axis.y *= -1.0;
        p
    }

    pub fn uniforms(&self, aspect: f32) -> MeshUniforms {
        MeshUniforms {
            model: self.model().to_cols_array_2d(),
            view: self.view().to_cols_array_2d(),
            projection: self.projection(aspect).to_cols_array_2d(),
        }
    }
}
