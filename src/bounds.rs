//! Axis-aligned bounding volumes of scene subtrees.

use cgmath::{EuclideanSpace, Point3, Vector3};

use crate::data_structures::{scene_graph::SceneNode, transform::Transform};

/// Axis-aligned box around every transformed vertex of a subtree.
///
/// Volumes are recomputed on every call; nothing is cached on the nodes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingVolume {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
    pub center: Point3<f32>,
    pub size: Vector3<f32>,
}

impl BoundingVolume {
    pub fn from_corners(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self {
            min,
            max,
            center: min.midpoint(max),
            size: max - min,
        }
    }

    /// A zero-sized volume at `point`.
    pub fn point(point: Point3<f32>) -> Self {
        Self::from_corners(point, point)
    }

    /// Volume of `root` expressed in its parent's frame.
    ///
    /// The root's own local transform is applied like every other transform on
    /// the way down to the vertices. Subtrees without any vertex yield a
    /// degenerate volume at the root's position.
    pub fn of(root: &SceneNode) -> Self {
        let mut min = Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
        let mut max = Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY);
        let mut seen = false;

        root.visit_world(&Transform::new(), &mut |node, world| {
            let Some(mesh) = node.mesh_data() else {
                return;
            };
            for position in &mesh.geometry.data().positions {
                let p = world.transform_point(Point3::from(*position));
                min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
                max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
                seen = true;
            }
        });

        if seen {
            Self::from_corners(min, max)
        } else {
            Self::point(Point3::from_vec(root.transform.position))
        }
    }

    pub fn max_dimension(&self) -> f32 {
        self.size.x.max(self.size.y).max(self.size.z)
    }

    pub fn is_degenerate(&self) -> bool {
        self.max_dimension() <= 0.0
    }

    pub fn union(&self, other: &BoundingVolume) -> Self {
        Self::from_corners(
            Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        )
    }
}
