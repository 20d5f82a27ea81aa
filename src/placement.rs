//! Move, rotate and scale placed models through a gizmo.
//!
//! The [`PlacementController`] is a three-state machine over [`TransformMode`].
//! Every mode is reachable from every other one in a single step. The active
//! mode decides which transform component the [`Gizmo`] writes, and the other
//! two are never touched. The controller only attaches to pipelines that have
//! finished loading; if the pipeline is torn down while attached, the session
//! ends on the next interaction or [`PlacementController::sync`].

use std::{collections::VecDeque, f32::consts::TAU, fmt, str::FromStr};

use cgmath::{Rad, Rotation3, Vector3};

use crate::{
    data_structures::{
        geometry::{Geometry, GeometryData, Topology},
        material::Material,
        scene_graph::{MeshData, NodeId, SceneNode},
        transform::Transform,
    },
    pipeline::{ModelPipeline, PlacementTarget},
};

/// Smallest scale factor the gizmo lets a component shrink to.
pub const MIN_SCALE: f32 = 0.01;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransformMode {
    #[default]
    Translate,
    Rotate,
    Scale,
}

impl TransformMode {
    pub const ALL: [TransformMode; 3] = [TransformMode::Translate, TransformMode::Rotate, TransformMode::Scale];

    pub fn label(&self) -> &'static str {
        match self {
            TransformMode::Translate => "translate",
            TransformMode::Rotate => "rotate",
            TransformMode::Scale => "scale",
        }
    }
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TransformMode {
    type Err = PlacementError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        TransformMode::ALL
            .into_iter()
            .find(|mode| mode.label().eq_ignore_ascii_case(label.trim()))
            .ok_or_else(|| PlacementError::UnknownMode(label.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GizmoAxis {
    X,
    Y,
    Z,
    /// All axes at once; only meaningful for scaling. Translate and rotate
    /// use the up axis.
    Uniform,
}

impl GizmoAxis {
    pub fn direction(&self) -> Vector3<f32> {
        match self {
            GizmoAxis::X => Vector3::unit_x(),
            GizmoAxis::Y | GizmoAxis::Uniform => Vector3::unit_y(),
            GizmoAxis::Z => Vector3::unit_z(),
        }
    }
}

/// Cursor affordance the host should show.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InteractionHint {
    #[default]
    Idle,
    Grabbing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlacementEvent {
    ModeChanged(TransformMode),
    TargetChanged(Option<NodeId>),
    Hint(InteractionHint),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("the model is not loaded yet (or failed to load)")]
    NotReady,
    #[error("unknown transform mode '{0}'")]
    UnknownMode(String),
}

/// Writes gizmo drags into exactly one component of a transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gizmo {
    pub mode: TransformMode,
    pub min_scale: f32,
}

impl Gizmo {
    pub fn new(mode: TransformMode) -> Self {
        Self {
            mode,
            min_scale: MIN_SCALE,
        }
    }

    /// `amount` is a distance for translate, radians for rotate and a relative
    /// factor (`0.1` = 10% larger) for scale.
    pub fn apply(&self, transform: &mut Transform, axis: GizmoAxis, amount: f32) {
        match self.mode {
            TransformMode::Translate => transform.position += axis.direction() * amount,
            TransformMode::Rotate => {
                transform.rotation = cgmath::Quaternion::from_axis_angle(axis.direction(), Rad(amount)) * transform.rotation;
            }
            TransformMode::Scale => {
                let factor = 1.0 + amount;
                let min = self.min_scale;
                let scale = &mut transform.scale;
                match axis {
                    GizmoAxis::X => scale.x = (scale.x * factor).max(min),
                    GizmoAxis::Y => scale.y = (scale.y * factor).max(min),
                    GizmoAxis::Z => scale.z = (scale.z * factor).max(min),
                    GizmoAxis::Uniform => {
                        scale.x = (scale.x * factor).max(min);
                        scale.y = (scale.y * factor).max(min);
                        scale.z = (scale.z * factor).max(min);
                    }
                }
            }
        }
    }

    /// Handle geometry for `mode`, one line mesh per axis, coloured x/y/z as
    /// red/green/blue. Sized for a unit model.
    pub fn handles(mode: TransformMode) -> SceneNode {
        let mut root = SceneNode::group().with_name(&format!("gizmo_{}", mode.label()));
        let axes = [
            (GizmoAxis::X, [0.9, 0.2, 0.2, 1.0]),
            (GizmoAxis::Y, [0.2, 0.9, 0.2, 1.0]),
            (GizmoAxis::Z, [0.2, 0.3, 0.9, 1.0]),
        ];
        for (axis, color) in axes {
            let data = match mode {
                TransformMode::Translate => arrow_lines(axis.direction(), 0.8),
                TransformMode::Rotate => ring_lines(axis, 0.7, 48),
                TransformMode::Scale => scale_lines(axis.direction(), 0.8),
            };
            let mut material = Material::new(&format!("gizmo_{axis:?}"), color, 0.0, 1.0);
            material.wireframe = true;
            root.add_child(SceneNode::mesh(MeshData::new(Geometry::new(data), vec![material])));
        }
        root
    }
}

fn lines(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> GeometryData {
    GeometryData {
        normals: vec![[0.0, 1.0, 0.0]; positions.len()],
        positions,
        indices,
        topology: Topology::Lines,
    }
}

fn arrow_lines(dir: Vector3<f32>, length: f32) -> GeometryData {
    let tip = dir * length;
    // two short barbs in the plane of the next axis
    let side = Vector3::new(dir.y, dir.z, dir.x) * (length * 0.08);
    let back = dir * (length * 0.85);
    lines(
        vec![[0.0; 3], tip.into(), (back + side).into(), (back - side).into()],
        vec![0, 1, 1, 2, 1, 3],
    )
}

fn ring_lines(axis: GizmoAxis, radius: f32, segments: u32) -> GeometryData {
    let positions = (0..segments)
        .map(|i| {
            let angle = TAU * i as f32 / segments as f32;
            let (s, c) = (angle.sin() * radius, angle.cos() * radius);
            match axis {
                GizmoAxis::X => [0.0, c, s],
                GizmoAxis::Z => [c, s, 0.0],
                GizmoAxis::Y | GizmoAxis::Uniform => [c, 0.0, s],
            }
        })
        .collect();
    let indices = (0..segments).flat_map(|i| [i, (i + 1) % segments]).collect();
    lines(positions, indices)
}

fn scale_lines(dir: Vector3<f32>, length: f32) -> GeometryData {
    let end = dir * length;
    let side = Vector3::new(dir.y, dir.z, dir.x) * (length * 0.06);
    let up = Vector3::new(dir.z, dir.x, dir.y) * (length * 0.06);
    lines(
        vec![
            [0.0; 3],
            end.into(),
            (end + side + up).into(),
            (end + side - up).into(),
            (end - side - up).into(),
            (end - side + up).into(),
        ],
        vec![0, 1, 2, 3, 3, 4, 4, 5, 5, 2],
    )
}

/// Mode, target and gesture state of the placement session.
pub struct PlacementController {
    gizmo: Gizmo,
    target: Option<PlacementTarget>,
    grabbing: bool,
    events: VecDeque<PlacementEvent>,
}

impl PlacementController {
    pub fn new() -> Self {
        Self {
            gizmo: Gizmo::new(TransformMode::default()),
            target: None,
            grabbing: false,
            events: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> TransformMode {
        self.gizmo.mode
    }

    pub fn gizmo(&self) -> &Gizmo {
        &self.gizmo
    }

    pub fn select_mode(&mut self, mode: TransformMode) {
        if self.gizmo.mode != mode {
            self.gizmo.mode = mode;
            self.events.push_back(PlacementEvent::ModeChanged(mode));
        }
    }

    pub fn select_label(&mut self, label: &str) -> Result<TransformMode, PlacementError> {
        let mode = label.parse()?;
        self.select_mode(mode);
        Ok(mode)
    }

    pub fn attach(&mut self, pipeline: &ModelPipeline) -> Result<(), PlacementError> {
        let target = pipeline.target().ok_or(PlacementError::NotReady)?;
        self.attach_target(target)
    }

    pub fn attach_target(&mut self, target: PlacementTarget) -> Result<(), PlacementError> {
        if !target.is_alive() {
            return Err(PlacementError::NotReady);
        }
        if self.target.as_ref() == Some(&target) {
            return Ok(());
        }
        self.release_grab();
        self.events
            .push_back(PlacementEvent::TargetChanged(Some(target.node_id())));
        self.target = Some(target);
        Ok(())
    }

    pub fn detach(&mut self) {
        if self.target.take().is_some() {
            self.release_grab();
            self.events.push_back(PlacementEvent::TargetChanged(None));
        }
    }

    pub fn target(&self) -> Option<&PlacementTarget> {
        self.target.as_ref()
    }

    /// World-free local transform of the current target.
    pub fn target_transform(&self) -> Option<Transform> {
        self.target.as_ref().and_then(PlacementTarget::transform)
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    /// Ends the session if the target's pipeline went away. Returns whether a
    /// session is still active.
    pub fn sync(&mut self) -> bool {
        if self.target.as_ref().is_some_and(|target| !target.is_alive()) {
            log::debug!("Placement target disappeared, ending session.");
            self.detach();
        }
        self.is_active()
    }

    /// Starts a drag on the gizmo. Does nothing without a live target.
    pub fn begin_gesture(&mut self) -> bool {
        if !self.sync() {
            return false;
        }
        if !self.grabbing {
            self.grabbing = true;
            self.events
                .push_back(PlacementEvent::Hint(InteractionHint::Grabbing));
        }
        true
    }

    /// Applies one gizmo movement to the target's bound component.
    pub fn drag(&mut self, axis: GizmoAxis, amount: f32) -> bool {
        if !self.sync() {
            return false;
        }
        let gizmo = self.gizmo;
        self.target
            .as_ref()
            .and_then(|target| target.update_transform(|transform| gizmo.apply(transform, axis, amount)))
            .is_some()
    }

    pub fn end_gesture(&mut self) {
        self.release_grab();
    }

    fn release_grab(&mut self) {
        if self.grabbing {
            self.grabbing = false;
            self.events
                .push_back(PlacementEvent::Hint(InteractionHint::Idle));
        }
    }

    pub fn drain_events(&mut self) -> Vec<PlacementEvent> {
        self.events.drain(..).collect()
    }
}

impl Default for PlacementController {
    fn default() -> Self {
        Self::new()
    }
}
