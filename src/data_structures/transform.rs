//! Local transforms of scene nodes.
//!
//! Every [`SceneNode`](crate::data_structures::scene_graph::SceneNode) carries a
//! position, a rotation (as quaternion) and a non-uniform scale relative to its
//! parent. World transforms are obtained by composing the chain of locals with `*`.

use std::ops::Mul;

use cgmath::{EuclideanSpace, One, SquareMatrix};

/// Position, rotation and scale of a node relative to its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Transform {
    /// Identity transform (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn from_position(position: cgmath::Vector3<f32>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_uniform_scale(mut self, factor: f32) -> Self {
        self.scale = cgmath::Vector3::new(factor, factor, factor);
        self
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Apply the transform to a point given in the local frame.
    pub fn transform_point(&self, point: cgmath::Point3<f32>) -> cgmath::Point3<f32> {
        let scaled = cgmath::Vector3::new(
            self.scale.x * point.x,
            self.scale.y * point.y,
            self.scale.z * point.z,
        );
        cgmath::Point3::from_vec(self.position + self.rotation * scaled)
    }

    pub fn to_raw(&self) -> TransformRaw {
        let world_matrix = self.to_matrix();
        TransformRaw::from_matrix(world_matrix)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl From<cgmath::Vector3<f32>> for Transform {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Self::from_position(position)
    }
}

impl<'a, 'b> Mul<&'b Transform> for &'a Transform {
    type Output = Transform;

    /// Parent-times-child composition: the result maps child-local points into
    /// the parent's parent frame. Shear from rotated non-uniform scale is dropped,
    /// as in any TRS hierarchy.
    fn mul(self, rhs: &'b Transform) -> Self::Output {
        let new_rotation = self.rotation * rhs.rotation;

        let new_scale = cgmath::Vector3::new(
            self.scale.x * rhs.scale.x,
            self.scale.y * rhs.scale.y,
            self.scale.z * rhs.scale.z,
        );
        let scaled_rhs_pos = cgmath::Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        let new_position = self.position + (self.rotation * scaled_rhs_pos);

        Transform {
            position: new_position,
            rotation: new_rotation,
            scale: new_scale,
        }
    }
}

impl Mul<Transform> for Transform {
    type Output = Self;

    fn mul(self, rhs: Transform) -> Self::Output {
        &self * &rhs
    }
}

/**
 * The raw transform is what ends up in the per-draw uniform on the GPU.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformRaw {
    pub model: [[f32; 4]; 4],
    // mat3 columns padded to vec4 for uniform alignment
    pub normal: [[f32; 4]; 3],
}

impl TransformRaw {
    pub fn from_matrix(model: cgmath::Matrix4<f32>) -> Self {
        use cgmath::Matrix;
        // inverse-transpose keeps normals perpendicular under non-uniform scale
        let normal = model
            .invert()
            .map(|inv| inv.transpose())
            .unwrap_or_else(cgmath::Matrix4::identity);
        Self {
            model: model.into(),
            normal: [
                [normal.x.x, normal.x.y, normal.x.z, 0.0],
                [normal.y.x, normal.y.y, normal.y.z, 0.0],
                [normal.z.x, normal.z.y, normal.z.z, 0.0],
            ],
        }
    }
}
