//! Scene graph and hierarchical scene organization.
//!
//! A [`SceneNode`] owns its children. Group nodes only carry a transform,
//! mesh nodes additionally own one [`Geometry`] and their materials. Taking a
//! subtree out of the graph with [`SceneNode::detach_child`] hands it back to
//! the caller untouched; freeing GPU resources is the job of
//! [`ResourceLifecycleManager`](crate::lifecycle::ResourceLifecycleManager).

use std::{
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};

use log::warn;

use crate::data_structures::{geometry::Geometry, material::Material, transform::Transform};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A range of the index buffer drawn with one material slot.
#[derive(Clone, Debug, PartialEq)]
pub struct SubMesh {
    pub indices: Range<u32>,
    pub material: usize,
}

#[derive(Debug)]
pub struct MeshData {
    pub geometry: Geometry,
    pub materials: Vec<Material>,
    pub sub_meshes: Vec<SubMesh>,
}

impl MeshData {
    /// A mesh drawn in one piece with the first material.
    ///
    /// An empty material list gets [`Material::fallback`] so every mesh is
    /// drawable.
    pub fn new(geometry: Geometry, materials: Vec<Material>) -> Self {
        let index_count = geometry.data().indices.len() as u32;
        Self::with_sub_meshes(
            geometry,
            materials,
            vec![SubMesh {
                indices: 0..index_count,
                material: 0,
            }],
        )
    }

    pub fn with_sub_meshes(
        geometry: Geometry,
        mut materials: Vec<Material>,
        sub_meshes: Vec<SubMesh>,
    ) -> Self {
        if materials.is_empty() {
            materials.push(Material::fallback());
        }
        let slots = materials.len();
        let sub_meshes = sub_meshes
            .into_iter()
            .map(|mut sub| {
                if sub.material >= slots {
                    warn!(
                        "Sub-mesh refers to material slot {} but only {} exist, using slot 0.",
                        sub.material, slots
                    );
                    sub.material = 0;
                }
                sub
            })
            .collect();
        Self {
            geometry,
            materials,
            sub_meshes,
        }
    }

    fn instantiate(&self) -> Self {
        Self {
            geometry: self.geometry.instantiate(),
            materials: self.materials.iter().map(Material::instantiate).collect(),
            sub_meshes: self.sub_meshes.clone(),
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Group,
    Mesh(MeshData),
}

#[derive(Debug)]
pub struct SceneNode {
    id: NodeId,
    pub name: Option<String>,
    pub transform: Transform,
    children: Vec<SceneNode>,
    kind: NodeKind,
}

impl SceneNode {
    pub fn group() -> Self {
        Self::from_kind(NodeKind::Group)
    }

    pub fn mesh(data: MeshData) -> Self {
        Self::from_kind(NodeKind::Mesh(data))
    }

    fn from_kind(kind: NodeKind) -> Self {
        Self {
            id: NodeId::next(),
            name: None,
            transform: Transform::default(),
            children: Vec::new(),
            kind,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn mesh_data(&self) -> Option<&MeshData> {
        match &self.kind {
            NodeKind::Mesh(data) => Some(data),
            NodeKind::Group => None,
        }
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn add_child(&mut self, child: SceneNode) -> NodeId {
        let id = child.id;
        self.children.push(child);
        id
    }

    /// Removes the descendant with `id` and returns it with all its resources
    /// still alive.
    pub fn detach_child(&mut self, id: NodeId) -> Option<SceneNode> {
        if let Some(idx) = self.children.iter().position(|child| child.id == id) {
            return Some(self.children.remove(idx));
        }
        self.children
            .iter_mut()
            .find_map(|child| child.detach_child(id))
    }

    pub fn find(&self, id: NodeId) -> Option<&SceneNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SceneNode> {
        if self.name() == Some(name) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_name(name))
    }

    /// Depth-first visit with the accumulated transform of every node.
    ///
    /// `parent` is the world transform of this node's parent; the transform
    /// handed to `visit` already includes the node's own local transform.
    pub fn visit_world(&self, parent: &Transform, visit: &mut dyn FnMut(&SceneNode, &Transform)) {
        let world = parent * &self.transform;
        visit(self, &world);
        for child in &self.children {
            child.visit_world(&world, visit);
        }
    }

    /// Depth-first visit of this node and all descendants.
    pub fn walk(&self, visit: &mut dyn FnMut(&SceneNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut SceneNode)) {
        visit(self);
        for child in &mut self.children {
            child.walk_mut(visit);
        }
    }

    pub fn mesh_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |node| {
            if node.mesh_data().is_some() {
                count += 1;
            }
        });
        count
    }

    /// Deep copy with fresh node and resource identities.
    ///
    /// Vertex data stays shared; only the handles are new, so the copy can be
    /// disposed independently of the original.
    pub fn instantiate(&self) -> SceneNode {
        let kind = match &self.kind {
            NodeKind::Group => NodeKind::Group,
            NodeKind::Mesh(data) => NodeKind::Mesh(data.instantiate()),
        };
        SceneNode {
            id: NodeId::next(),
            name: self.name.clone(),
            transform: self.transform,
            children: self.children.iter().map(SceneNode::instantiate).collect(),
            kind,
        }
    }
}
