//! Ownership bookkeeping for the resources a scene subtree allocates.
//!
//! Every loaded model and every generated room gets one
//! [`ResourceLifecycleManager`]. It remembers the geometry and material ids of
//! the subtree and releases each of them exactly once when the owner goes away.
//! The actual freeing is delegated to a [`ResourceReleaser`], so the same
//! bookkeeping drives GPU buffers, revoked blob URLs, or a test recorder.

use std::{collections::HashSet, rc::Rc};

use log::{debug, warn};

use crate::data_structures::{geometry::ResourceId, scene_graph::SceneNode};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Geometry,
    Material,
    /// Temporary object URL created for a local file.
    BlobUrl(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    pub id: ResourceId,
    pub kind: ResourceKind,
}

/// Frees whatever backs a handle. Called once per handle.
pub trait ResourceReleaser {
    fn release(&self, handle: &ResourceHandle);
}

/// Releaser for resources that were never uploaded anywhere.
pub struct NoopReleaser;

impl ResourceReleaser for NoopReleaser {
    fn release(&self, handle: &ResourceHandle) {
        debug!("Dropping {:?} {:?} without a backing store", handle.kind, handle.id);
    }
}

/// Forwards every handle to each releaser in order; releasers skip kinds they
/// do not own.
pub struct ReleaserChain(pub Vec<Rc<dyn ResourceReleaser>>);

impl ResourceReleaser for ReleaserChain {
    fn release(&self, handle: &ResourceHandle) {
        for releaser in &self.0 {
            releaser.release(handle);
        }
    }
}

pub struct ResourceLifecycleManager {
    releaser: Rc<dyn ResourceReleaser>,
    handles: Vec<ResourceHandle>,
    seen: HashSet<ResourceId>,
    disposed: bool,
}

impl ResourceLifecycleManager {
    pub fn new(releaser: Rc<dyn ResourceReleaser>) -> Self {
        Self {
            releaser,
            handles: Vec::new(),
            seen: HashSet::new(),
            disposed: false,
        }
    }

    /// Collects one handle per distinct geometry and material of `root`.
    ///
    /// Returns the number of new handles. After [`dispose`](Self::dispose) the
    /// new handles are released right away instead of being kept.
    pub fn register(&mut self, root: &SceneNode) -> usize {
        let mut found = Vec::new();
        root.walk(&mut |node| {
            let Some(mesh) = node.mesh_data() else {
                return;
            };
            found.push(ResourceHandle {
                id: mesh.geometry.id(),
                kind: ResourceKind::Geometry,
            });
            found.extend(mesh.materials.iter().map(|material| ResourceHandle {
                id: material.id(),
                kind: ResourceKind::Material,
            }));
        });
        found
            .into_iter()
            .filter(|handle| self.track(handle.clone()))
            .count()
    }

    /// Records a temporary `blob:` URL to revoke on disposal.
    pub fn register_blob(&mut self, url: &str) -> bool {
        let already_known = self
            .handles
            .iter()
            .any(|handle| handle.kind == ResourceKind::BlobUrl(url.to_string()));
        if already_known {
            return false;
        }
        self.track(ResourceHandle {
            id: ResourceId::next(),
            kind: ResourceKind::BlobUrl(url.to_string()),
        })
    }

    fn track(&mut self, handle: ResourceHandle) -> bool {
        if !self.seen.insert(handle.id) {
            return false;
        }
        if self.disposed {
            warn!(
                "Registered {:?} {:?} after disposal, releasing it immediately.",
                handle.kind, handle.id
            );
            self.releaser.release(&handle);
        } else {
            self.handles.push(handle);
        }
        true
    }

    /// Releases every registered handle. Further calls do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        debug!("Disposing {} resource handles", self.handles.len());
        for handle in self.handles.drain(..) {
            self.releaser.release(&handle);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }
}

impl Drop for ResourceLifecycleManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::data_structures::{
        geometry::{Geometry, cuboid},
        material::Material,
        scene_graph::MeshData,
    };

    #[derive(Default)]
    struct Recorder(RefCell<Vec<ResourceHandle>>);

    impl ResourceReleaser for Recorder {
        fn release(&self, handle: &ResourceHandle) {
            self.0.borrow_mut().push(handle.clone());
        }
    }

    fn two_material_mesh() -> SceneNode {
        SceneNode::mesh(MeshData::new(
            Geometry::new(cuboid(1.0, 1.0, 1.0)),
            vec![Material::fallback(), Material::fallback()],
        ))
    }

    #[test]
    fn every_material_element_is_its_own_handle() {
        let mut manager = ResourceLifecycleManager::new(Rc::new(NoopReleaser));
        assert_eq!(manager.register(&two_material_mesh()), 3);
    }

    #[test]
    fn registering_the_same_tree_twice_adds_nothing() {
        let mut manager = ResourceLifecycleManager::new(Rc::new(NoopReleaser));
        let tree = two_material_mesh();
        manager.register(&tree);
        assert_eq!(manager.register(&tree), 0);
        assert_eq!(manager.len(), 3);
    }

    #[test]
    fn dispose_releases_once() {
        let recorder = Rc::new(Recorder::default());
        let mut manager = ResourceLifecycleManager::new(recorder.clone());
        manager.register(&two_material_mesh());
        manager.register_blob("blob:flow-stage/1");
        manager.dispose();
        manager.dispose();
        drop(manager);
        assert_eq!(recorder.0.borrow().len(), 4);
    }

    #[test]
    fn late_registration_is_released_immediately() {
        let recorder = Rc::new(Recorder::default());
        let mut manager = ResourceLifecycleManager::new(recorder.clone());
        manager.dispose();
        manager.register(&two_material_mesh());
        assert_eq!(recorder.0.borrow().len(), 3);
        assert!(manager.is_empty());
    }
}
