mod common;

use std::rc::Rc;

use cgmath::{InnerSpace, Quaternion, Vector3};
use common::test_utils::{MemoryFetcher, RecordingReleaser, TRIANGLE_OBJ, drive, glb_box};
use flow_stage::{
    LoadCallbacks, Stage, StageConfig, TransformMode,
    placement::{GizmoAxis, InteractionHint, PlacementError, PlacementEvent},
    stage::PipelineId,
};
use futures::executor::LocalPool;

fn stage_with_model() -> (Stage, PipelineId, LocalPool) {
    let fetcher = MemoryFetcher::new()
        .with("box.glb", glb_box([1.0, 2.0, 1.0], [0.0, 0.0, 0.0]))
        .with("tri.obj", TRIANGLE_OBJ);
    let mut stage = Stage::new(&StageConfig::default(), Rc::new(RecordingReleaser::new()), Rc::new(fetcher));
    let mut pool = LocalPool::new();
    let (id, task) = stage.load_model("box.glb", LoadCallbacks::new());
    drive(&mut pool, task);
    (stage, id, pool)
}

fn node_of(stage: &Stage, id: PipelineId) -> flow_stage::data_structures::scene_graph::NodeId {
    stage
        .pipeline(id)
        .and_then(|pipeline| pipeline.target())
        .map(|target| target.node_id())
        .expect("the model is ready")
}

#[test]
fn selecting_a_ready_model_starts_a_session() {
    let (mut stage, id, _pool) = stage_with_model();
    assert!(stage.placement_mut().drain_events().is_empty());

    stage.select(id).expect("ready models can be selected");
    let node = node_of(&stage, id);
    assert!(stage.placement().is_active());
    assert_eq!(stage.placement().mode(), TransformMode::Translate);
    assert_eq!(stage.placement_mut().drain_events(), vec![PlacementEvent::TargetChanged(Some(node))]);

    // selecting it again is not a change
    stage.select(id).expect("still ready");
    assert!(stage.placement_mut().drain_events().is_empty());
}

#[test]
fn loading_models_cannot_be_selected() {
    let fetcher = MemoryFetcher::new();
    let mut stage = Stage::new(&StageConfig::default(), Rc::new(RecordingReleaser::new()), Rc::new(fetcher));
    let (id, _task) = stage.load_model("never.obj", LoadCallbacks::new());

    assert_eq!(stage.select(id), Err(PlacementError::NotReady));
    assert!(!stage.placement().is_active());
}

#[test]
fn mode_changes_are_reported_once() {
    let (mut stage, _, _pool) = stage_with_model();
    let placement = stage.placement_mut();

    assert_eq!(placement.select_label("Rotate"), Ok(TransformMode::Rotate));
    placement.select_mode(TransformMode::Rotate);
    assert_eq!(placement.select_label(" scale "), Ok(TransformMode::Scale));
    placement.select_mode(TransformMode::Translate);
    assert_eq!(
        placement.select_label("shear"),
        Err(PlacementError::UnknownMode("shear".to_string()))
    );

    assert_eq!(
        placement.drain_events(),
        vec![
            PlacementEvent::ModeChanged(TransformMode::Rotate),
            PlacementEvent::ModeChanged(TransformMode::Scale),
            PlacementEvent::ModeChanged(TransformMode::Translate),
        ]
    );
    assert_eq!(placement.mode(), TransformMode::Translate);
}

#[test]
fn each_mode_changes_only_its_component() {
    let (mut stage, id, _pool) = stage_with_model();
    stage.select(id).expect("ready");
    let placement = stage.placement_mut();
    let start = placement.target_transform().expect("attached");

    assert!(placement.drag(GizmoAxis::X, 0.5));
    let moved = placement.target_transform().expect("attached");
    assert_eq!(moved.position, start.position + Vector3::new(0.5, 0.0, 0.0));
    assert_eq!(moved.rotation, start.rotation);
    assert_eq!(moved.scale, start.scale);

    placement.select_mode(TransformMode::Rotate);
    assert!(placement.drag(GizmoAxis::Y, std::f32::consts::FRAC_PI_2));
    let turned = placement.target_transform().expect("attached");
    assert_eq!(turned.position, moved.position);
    assert_eq!(turned.scale, moved.scale);
    assert!((turned.rotation - Quaternion::new(1.0, 0.0, 0.0, 0.0)).magnitude() > 0.1);

    placement.select_mode(TransformMode::Scale);
    assert!(placement.drag(GizmoAxis::Uniform, 1.0));
    let scaled = placement.target_transform().expect("attached");
    assert_eq!(scaled.position, turned.position);
    assert_eq!(scaled.rotation, turned.rotation);
    assert!((scaled.scale - turned.scale * 2.0).magnitude() < 1e-6);

    // scaling never collapses the model
    assert!(placement.drag(GizmoAxis::X, -5.0));
    let clamped = placement.target_transform().expect("attached");
    assert!(clamped.scale.x > 0.0);
}

#[test]
fn gestures_report_cursor_hints() {
    let (mut stage, id, _pool) = stage_with_model();
    stage.select(id).expect("ready");
    let placement = stage.placement_mut();
    placement.drain_events();

    assert!(placement.begin_gesture());
    assert!(placement.is_grabbing());
    placement.end_gesture();
    placement.end_gesture();

    assert_eq!(
        placement.drain_events(),
        vec![
            PlacementEvent::Hint(InteractionHint::Grabbing),
            PlacementEvent::Hint(InteractionHint::Idle),
        ]
    );
}

#[test]
fn removing_the_model_ends_the_session() {
    let (mut stage, id, _pool) = stage_with_model();
    stage.select(id).expect("ready");
    stage.placement_mut().begin_gesture();
    stage.placement_mut().drain_events();

    assert!(stage.remove_pipeline(id));

    assert!(!stage.placement().is_active());
    assert!(!stage.placement().is_grabbing());
    assert_eq!(
        stage.placement_mut().drain_events(),
        vec![
            PlacementEvent::Hint(InteractionHint::Idle),
            PlacementEvent::TargetChanged(None),
        ]
    );
    assert!(!stage.placement_mut().drag(GizmoAxis::X, 1.0));
    assert!(!stage.placement_mut().begin_gesture());
}

#[test]
fn gizmo_follows_the_target_and_its_mode() {
    let (mut stage, id, _pool) = stage_with_model();
    assert_eq!(stage.draw_list().len(), 1);

    stage.select(id).expect("ready");
    stage.placement_mut().drag(GizmoAxis::Z, 2.0);
    let items = stage.draw_list();
    let overlay: Vec<_> = items
        .iter()
        .filter(|item| item.layer == flow_stage::stage::DrawLayer::Overlay)
        .collect();
    assert_eq!(overlay.len(), 3);
    assert!(overlay.iter().all(|item| (item.world.w.z - 2.0).abs() < 1e-6));

    stage.placement_mut().select_mode(TransformMode::Rotate);
    let rotate_ids: Vec<_> = stage
        .draw_list()
        .iter()
        .filter(|item| item.layer == flow_stage::stage::DrawLayer::Overlay)
        .map(|item| item.geometry)
        .collect();
    assert_eq!(rotate_ids.len(), 3);
    assert!(overlay.iter().all(|item| !rotate_ids.contains(&item.geometry)));

    stage.placement_mut().detach();
    assert_eq!(stage.draw_list().len(), 1);
}
