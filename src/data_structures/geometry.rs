//! CPU-side geometry and procedural primitives.
//!
//! Geometry data is immutable once built and shared behind an `Arc`, so a cached
//! parse can be handed to several pipelines. Each [`Geometry`] still owns its
//! own [`ResourceId`]: two instances of the same data are two GPU allocations.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use cgmath::InnerSpace;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a disposable resource (geometry buffer, material).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    Triangles,
    Lines,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeometryData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub topology: Topology,
}

impl GeometryData {
    /// Builds triangle data; normals are computed from faces when `normals` is
    /// empty or does not match the vertex count.
    pub fn triangles(positions: Vec<[f32; 3]>, normals: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        let normals = if normals.len() == positions.len() {
            normals
        } else {
            face_normals(&positions, &indices)
        };
        Self {
            positions,
            normals,
            indices,
            topology: Topology::Triangles,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// A geometry buffer owned by exactly one scene node.
#[derive(Debug)]
pub struct Geometry {
    id: ResourceId,
    data: Arc<GeometryData>,
}

impl Geometry {
    pub fn new(data: GeometryData) -> Self {
        Self::from_shared(Arc::new(data))
    }

    pub fn from_shared(data: Arc<GeometryData>) -> Self {
        Self {
            id: ResourceId::next(),
            data,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn data(&self) -> &GeometryData {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<GeometryData> {
        Arc::clone(&self.data)
    }

    /// Same vertex data, new identity.
    pub fn instantiate(&self) -> Self {
        Self::from_shared(self.data.clone())
    }
}

/// Averaged per-vertex normals for an indexed triangle list.
pub fn face_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![cgmath::Vector3::new(0.0f32, 0.0, 0.0); positions.len()];
    for tri in indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let (Some(p0), Some(p1), Some(p2)) = (positions.get(i0), positions.get(i1), positions.get(i2))
        else {
            continue;
        };
        let p0 = cgmath::Vector3::from(*p0);
        let edge1 = cgmath::Vector3::from(*p1) - p0;
        let edge2 = cgmath::Vector3::from(*p2) - p0;
        let face = edge1.cross(edge2);
        for i in [i0, i1, i2] {
            normals[i] += face;
        }
    }
    normals
        .into_iter()
        .map(|n| {
            if n.magnitude2() > 0.0 {
                n.normalize().into()
            } else {
                [0.0, 1.0, 0.0]
            }
        })
        .collect()
}

/// An axis-aligned box of the given full extents, centered at the origin.
///
/// Each face has its own four vertices so normals stay flat.
pub fn cuboid(width: f32, height: f32, depth: f32) -> GeometryData {
    let (x, y, z) = (width / 2.0, height / 2.0, depth / 2.0);
    #[rustfmt::skip]
    let positions = vec![
        // Front face
        [-x, -y,  z], [ x, -y,  z], [ x,  y,  z], [-x,  y,  z],
        // Back face
        [-x, -y, -z], [-x,  y, -z], [ x,  y, -z], [ x, -y, -z],
        // Left face
        [-x, -y, -z], [-x, -y,  z], [-x,  y,  z], [-x,  y, -z],
        // Right face
        [ x, -y,  z], [ x, -y, -z], [ x,  y, -z], [ x,  y,  z],
        // Top face
        [-x,  y,  z], [ x,  y,  z], [ x,  y, -z], [-x,  y, -z],
        // Bottom face
        [-x, -y, -z], [ x, -y, -z], [ x, -y,  z], [-x, -y,  z],
    ];
    let face_normals: [[f32; 3]; 6] = [
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
        [-1.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, -1.0, 0.0],
    ];
    let normals = face_normals
        .iter()
        .flat_map(|n| std::iter::repeat_n(*n, 4))
        .collect();
    // Two counter-clockwise triangles per face
    let indices = (0..6u32)
        .flat_map(|face| {
            let b = face * 4;
            [b, b + 1, b + 2, b + 2, b + 3, b]
        })
        .collect();
    GeometryData {
        positions,
        normals,
        indices,
        topology: Topology::Triangles,
    }
}

/// The unit wireframe cube: eight corners, twelve edges as a line list.
pub fn wire_cube() -> GeometryData {
    let h = 0.5;
    let positions: Vec<[f32; 3]> = (0..8)
        .map(|i| {
            [
                if i & 1 == 0 { -h } else { h },
                if i & 2 == 0 { -h } else { h },
                if i & 4 == 0 { -h } else { h },
            ]
        })
        .collect();
    let normals = positions
        .iter()
        .map(|p| cgmath::Vector3::from(*p).normalize().into())
        .collect();
    #[rustfmt::skip]
    let indices = vec![
        0, 1, 2, 3, 4, 5, 6, 7, // edges along x
        0, 2, 1, 3, 4, 6, 5, 7, // along y
        0, 4, 1, 5, 2, 6, 3, 7, // along z
    ];
    GeometryData {
        positions,
        normals,
        indices,
        topology: Topology::Lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuboid_spans_its_extents() {
        let data = cuboid(8.0, 0.1, 4.0);
        let max_x = data.positions.iter().map(|p| p[0]).fold(f32::MIN, f32::max);
        let min_z = data.positions.iter().map(|p| p[2]).fold(f32::MAX, f32::min);
        assert_eq!(max_x, 4.0);
        assert_eq!(min_z, -2.0);
        assert_eq!(data.indices.len(), 36);
        assert_eq!(data.normals.len(), data.positions.len());
    }

    #[test]
    fn wire_cube_has_twelve_edges() {
        let data = wire_cube();
        assert_eq!(data.topology, Topology::Lines);
        assert_eq!(data.indices.len(), 24);
        assert!(data.positions.iter().all(|p| p.iter().all(|c| c.abs() == 0.5)));
    }

    #[test]
    fn instantiate_keeps_data_but_not_identity() {
        let a = Geometry::new(cuboid(1.0, 1.0, 1.0));
        let b = a.instantiate();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn missing_normals_are_derived_from_faces() {
        let data = GeometryData::triangles(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![],
            vec![0, 1, 2],
        );
        assert_eq!(data.normals, vec![[0.0, 0.0, 1.0]; 3]);
    }
}
