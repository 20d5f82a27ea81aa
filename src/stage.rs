//! The scene host: lighting, room, loaded models, camera and placement.
//!
//! A [`Stage`] is what the application renders. It never touches the GPU
//! itself; [`Stage::draw_list`] flattens the current scene into [`DrawItem`]s
//! which the renderer in [`crate::gpu`] uploads and draws.

use std::{cell::RefCell, collections::BTreeMap, fmt, ops::Range, rc::Rc, sync::Arc};

use cgmath::{InnerSpace, Matrix4, Vector3};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    bounds::BoundingVolume,
    camera::{InputSurface, OrbitCamera, OrbitControls},
    config::StageConfig,
    data_structures::{
        geometry::{GeometryData, ResourceId, Topology},
        material::{Material, MaterialLibrary},
        scene_graph::{NodeId, SceneNode},
        transform::Transform,
    },
    lifecycle::{ReleaserChain, ResourceLifecycleManager, ResourceReleaser},
    pipeline::{LoadCallbacks, LoadRequest, LoadTask, ModelPipeline},
    placement::{Gizmo, PlacementController, PlacementError, TransformMode},
    resources::{
        cache::AssetCache,
        fetch::{AssetSource, BlobStore, Fetch},
    },
    room::{RoomSpec, generate},
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            intensity: 0.35,
        }
    }
}

/// The single sun of the stage. `direction` points from the light into the
/// scene.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalLight {
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    pub cast_shadows: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: [-0.4, -1.0, -0.3],
            color: [1.0, 0.98, 0.92],
            intensity: 1.0,
            cast_shadows: true,
        }
    }
}

impl DirectionalLight {
    /// Normalized direction, straight down if the configured one is unusable.
    pub fn unit_direction(&self) -> Vector3<f32> {
        let direction = Vector3::from(self.direction);
        if direction.magnitude2() > f32::EPSILON && direction.magnitude2().is_finite() {
            direction.normalize()
        } else {
            Vector3::new(0.0, -1.0, 0.0)
        }
    }

    /// Orthographic light-space projection enclosing `bounds`, used to render
    /// the shadow map.
    pub fn view_projection(&self, bounds: &BoundingVolume) -> Matrix4<f32> {
        let direction = self.unit_direction();
        let radius = (bounds.size.magnitude() / 2.0).max(0.5);
        let center = bounds.center;
        let eye = center - direction * (radius * 2.0);
        let up = if direction.y.abs() > 0.99 {
            Vector3::unit_z()
        } else {
            Vector3::unit_y()
        };
        let view = Matrix4::look_at_rh(eye, center, up);
        let projection = cgmath::ortho(-radius, radius, -radius, radius, 0.01, radius * 4.0);
        crate::camera::OPENGL_TO_WGPU_MATRIX * projection * view
    }
}

/// Fixed ambient light, one directional shadow-casting light and the clear
/// colour behind the scene.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingRig {
    pub ambient: AmbientLight,
    pub sun: DirectionalLight,
    pub backdrop: [f32; 4],
}

impl Default for LightingRig {
    fn default() -> Self {
        Self {
            ambient: AmbientLight::default(),
            sun: DirectionalLight::default(),
            backdrop: [0.92, 0.93, 0.95, 1.0],
        }
    }
}

/// Surface parameters of one draw, copied out of the [`Material`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surface {
    pub material: ResourceId,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub wireframe: bool,
}

impl From<&Material> for Surface {
    fn from(material: &Material) -> Self {
        Self {
            material: material.id(),
            base_color: material.base_color,
            metallic: material.metallic,
            roughness: material.roughness,
            wireframe: material.wireframe,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawLayer {
    /// Lit, depth tested, shadow casting.
    Scene,
    /// Drawn last without depth test (gizmo handles).
    Overlay,
}

/// One sub-mesh of one node, ready to be drawn.
#[derive(Clone, Debug)]
pub struct DrawItem {
    pub node: NodeId,
    pub geometry: ResourceId,
    pub data: Arc<GeometryData>,
    pub topology: Topology,
    pub indices: Range<u32>,
    pub surface: Surface,
    pub world: Matrix4<f32>,
    pub layer: DrawLayer,
}

fn collect_draws(root: &SceneNode, parent: &Transform, layer: DrawLayer, out: &mut Vec<DrawItem>) {
    root.visit_world(parent, &mut |node, world| {
        let Some(mesh) = node.mesh_data() else {
            return;
        };
        let matrix = world.to_matrix();
        for sub in &mesh.sub_meshes {
            if sub.indices.is_empty() {
                continue;
            }
            let Some(material) = mesh.materials.get(sub.material) else {
                continue;
            };
            out.push(DrawItem {
                node: node.id(),
                geometry: mesh.geometry.id(),
                data: mesh.geometry.shared_data(),
                topology: mesh.geometry.data().topology,
                indices: sub.indices.clone(),
                surface: Surface::from(material),
                world: matrix,
                layer,
            });
        }
    });
}

/// Identifies a model pipeline on its stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(u64);

struct StagedRoom {
    spec: RoomSpec,
    root: SceneNode,
    lifecycle: ResourceLifecycleManager,
}

/// Gizmo handles for one mode. Dropping it releases the handle meshes.
struct GizmoOverlay {
    mode: TransformMode,
    handles: SceneNode,
    _lifecycle: ResourceLifecycleManager,
}

pub struct Stage {
    lighting: LightingRig,
    library: MaterialLibrary,
    releaser: Rc<dyn ResourceReleaser>,
    blobs: BlobStore,
    cache: AssetCache,
    room: Option<StagedRoom>,
    pipelines: BTreeMap<PipelineId, ModelPipeline>,
    next_pipeline: u64,
    camera: Rc<RefCell<OrbitCamera>>,
    controls: OrbitControls,
    input: InputSurface,
    placement: PlacementController,
    overlay: Option<GizmoOverlay>,
}

impl Stage {
    /// `releaser` frees GPU-side resources of disposed handles; `remote`
    /// fetches every URL that is not a `blob:` reference of this stage.
    pub fn new(config: &StageConfig, releaser: Rc<dyn ResourceReleaser>, remote: Rc<dyn Fetch>) -> Self {
        let blobs = BlobStore::new();
        let releaser: Rc<dyn ResourceReleaser> =
            Rc::new(ReleaserChain(vec![releaser, Rc::new(blobs.clone())]));
        let cache = AssetCache::new(Rc::new(AssetSource::new(remote, blobs.clone())));

        let camera = Rc::new(RefCell::new(OrbitCamera::new(
            config.camera.distance,
            config.camera.pitch,
            config.camera.yaw,
            Vector3::from(config.camera.target),
            1.0,
        )));
        let input = InputSurface::new();
        let mut controls = OrbitControls::new();
        controls.bind(Rc::clone(&camera), &input);
        controls.apply_options(&config.controls);

        let mut stage = Self {
            lighting: config.lighting,
            library: MaterialLibrary::default(),
            releaser,
            blobs,
            cache,
            room: None,
            pipelines: BTreeMap::new(),
            next_pipeline: 0,
            camera,
            controls,
            input,
            placement: PlacementController::new(),
            overlay: None,
        };
        if let Some(spec) = &config.room {
            stage.set_room(spec.clone());
        }
        stage
    }

    pub fn lighting(&self) -> &LightingRig {
        &self.lighting
    }

    /// Materials a room palette may name; add presets before [`Stage::set_room`].
    pub fn library_mut(&mut self) -> &mut MaterialLibrary {
        &mut self.library
    }

    /// Replaces the room. The previous room is detached first and then
    /// disposed.
    pub fn set_room(&mut self, spec: RoomSpec) -> NodeId {
        self.clear_room();
        let root = generate(&spec, &self.library);
        let mut lifecycle = ResourceLifecycleManager::new(Rc::clone(&self.releaser));
        lifecycle.register(&root);
        info!(
            "Room {}x{}x{} ({} resources)",
            spec.width(),
            spec.height(),
            spec.depth(),
            lifecycle.len()
        );
        let id = root.id();
        self.room = Some(StagedRoom { spec, root, lifecycle });
        id
    }

    pub fn clear_room(&mut self) -> bool {
        let Some(StagedRoom { root, mut lifecycle, .. }) = self.room.take() else {
            return false;
        };
        drop(root);
        lifecycle.dispose();
        true
    }

    pub fn room(&self) -> Option<&SceneNode> {
        self.room.as_ref().map(|room| &room.root)
    }

    pub fn room_spec(&self) -> Option<&RoomSpec> {
        self.room.as_ref().map(|room| &room.spec)
    }

    pub fn room_resource_count(&self) -> usize {
        self.room.as_ref().map_or(0, |room| room.lifecycle.len())
    }

    /// Starts loading a model onto the stage. The returned task has to be
    /// spawned (or polled) for the load to make progress.
    pub fn load_model(
        &mut self,
        request: impl Into<LoadRequest>,
        callbacks: LoadCallbacks,
    ) -> (PipelineId, LoadTask) {
        let (pipeline, task) =
            ModelPipeline::start_load(request, &self.cache, Rc::clone(&self.releaser), callbacks);
        (self.add_pipeline(pipeline), task)
    }

    pub fn add_pipeline(&mut self, pipeline: ModelPipeline) -> PipelineId {
        let id = PipelineId(self.next_pipeline);
        self.next_pipeline += 1;
        debug!("Stage pipeline {id:?} for {}", pipeline.url());
        self.pipelines.insert(id, pipeline);
        id
    }

    /// Takes the pipeline off the stage and tears it down. A placement
    /// session on it ends.
    pub fn remove_pipeline(&mut self, id: PipelineId) -> bool {
        let Some(pipeline) = self.pipelines.remove(&id) else {
            return false;
        };
        pipeline.teardown();
        self.placement.sync();
        true
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&ModelPipeline> {
        self.pipelines.get(&id)
    }

    pub fn pipeline_ids(&self) -> impl Iterator<Item = PipelineId> + '_ {
        self.pipelines.keys().copied()
    }

    /// Attaches the placement controller to a ready pipeline.
    pub fn select(&mut self, id: PipelineId) -> Result<(), PlacementError> {
        let pipeline = self.pipelines.get(&id).ok_or(PlacementError::NotReady)?;
        self.placement.attach(pipeline)
    }

    pub fn placement(&self) -> &PlacementController {
        &self.placement
    }

    pub fn placement_mut(&mut self) -> &mut PlacementController {
        &mut self.placement
    }

    pub fn camera(&self) -> Rc<RefCell<OrbitCamera>> {
        Rc::clone(&self.camera)
    }

    pub fn controls_mut(&mut self) -> &mut OrbitControls {
        &mut self.controls
    }

    pub fn input(&self) -> &InputSurface {
        &self.input
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.borrow_mut().resize_projection(width, height);
    }

    /// Advances camera damping and drops a placement session whose target is
    /// gone. Returns whether the camera is still moving.
    pub fn update(&mut self, dt: f32) -> bool {
        self.placement.sync();
        self.controls.update(dt)
    }

    /// Bounds of the room and every ready model, if there is anything.
    pub fn scene_bounds(&self) -> Option<BoundingVolume> {
        let room = self.room().map(BoundingVolume::of);
        self.pipelines
            .values()
            .filter(|pipeline| pipeline.is_ready())
            .filter_map(|pipeline| pipeline.with_render_root(BoundingVolume::of))
            .chain(room)
            .reduce(|acc, bounds| acc.union(&bounds))
    }

    /// Everything to draw this frame: the room, every pipeline (placeholder
    /// while loading) and the gizmo of an active placement session.
    pub fn draw_list(&mut self) -> Vec<DrawItem> {
        let mut items = Vec::new();
        let identity = Transform::new();
        if let Some(room) = self.room() {
            collect_draws(room, &identity, DrawLayer::Scene, &mut items);
        }
        for pipeline in self.pipelines.values() {
            pipeline.with_render_root(|root| collect_draws(root, &identity, DrawLayer::Scene, &mut items));
        }

        self.placement.sync();
        match self.placement.target_transform() {
            Some(target) => {
                let mode = self.placement.mode();
                let overlay = self.gizmo_overlay(mode);
                let anchor = Transform {
                    position: target.position,
                    rotation: target.rotation,
                    scale: Vector3::new(1.0, 1.0, 1.0),
                };
                collect_draws(&overlay.handles, &anchor, DrawLayer::Overlay, &mut items);
            }
            None => self.overlay = None,
        }
        items
    }

    fn gizmo_overlay(&mut self, mode: TransformMode) -> &GizmoOverlay {
        if self.overlay.as_ref().is_some_and(|overlay| overlay.mode != mode) {
            self.overlay = None;
        }
        self.overlay.get_or_insert_with(|| {
            let handles = Gizmo::handles(mode);
            let mut lifecycle = ResourceLifecycleManager::new(Rc::clone(&self.releaser));
            lifecycle.register(&handles);
            GizmoOverlay {
                mode,
                handles,
                _lifecycle: lifecycle,
            }
        })
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("room", &self.room_spec())
            .field("pipelines", &self.pipelines)
            .field("placement_mode", &self.placement.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lifecycle::NoopReleaser,
        resources::fetch::FileFetcher,
        room::MaterialPalette,
    };

    fn stage() -> Stage {
        Stage::new(
            &StageConfig::default(),
            Rc::new(NoopReleaser),
            Rc::new(FileFetcher::default()),
        )
    }

    #[test]
    fn room_replacement_disposes_the_old_room() {
        let mut stage = stage();
        let first = stage.set_room(RoomSpec::new(4.0, 3.0, 4.0, MaterialPalette::default()).unwrap());
        assert_eq!(stage.room().map(SceneNode::id), Some(first));
        // 5 boxes, one geometry and one material each
        assert_eq!(stage.room_resource_count(), 10);

        let second = stage.set_room(RoomSpec::new(6.0, 3.0, 6.0, MaterialPalette::default()).unwrap());
        assert_ne!(first, second);
        assert_eq!(stage.room_spec().map(RoomSpec::width), Some(6.0));
        assert!(stage.clear_room());
        assert!(!stage.clear_room());
        assert!(stage.room().is_none());
    }

    #[test]
    fn room_draws_one_item_per_box() {
        let mut stage = stage();
        stage.set_room(RoomSpec::new(8.0, 3.0, 8.0, MaterialPalette::default()).unwrap());
        let items = stage.draw_list();
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|item| item.layer == DrawLayer::Scene));
        assert!(items.iter().all(|item| item.topology == Topology::Triangles));
    }

    #[test]
    fn loading_pipeline_contributes_the_placeholder() {
        let mut stage = stage();
        let (id, _task) = stage.load_model("chair.obj", LoadCallbacks::new());
        let items = stage.draw_list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].topology, Topology::Lines);
        assert!(items[0].surface.wireframe);
        assert!(stage.select(id).is_err());

        assert!(stage.remove_pipeline(id));
        assert!(!stage.remove_pipeline(id));
        assert!(stage.draw_list().is_empty());
    }

    #[test]
    fn config_controls_are_applied() {
        let config = StageConfig::from_json(r#"{ "controls": { "rotate_speed": 0.5 } }"#).unwrap();
        let mut stage = Stage::new(&config, Rc::new(NoopReleaser), Rc::new(FileFetcher::default()));
        assert_eq!(stage.controls_mut().rotate_speed, 0.5);
        assert_eq!(stage.input().listener_count(), 1);
    }

    #[test]
    fn sun_projection_keeps_the_scene_in_clip_space() {
        let sun = DirectionalLight::default();
        let bounds = BoundingVolume::from_corners(
            cgmath::Point3::new(-4.0, 0.0, -4.0),
            cgmath::Point3::new(4.0, 3.0, 4.0),
        );
        let clip = sun.view_projection(&bounds) * bounds.center.to_homogeneous();
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
