mod common;

use std::{cell::RefCell, rc::Rc};

use cgmath::{EuclideanSpace, InnerSpace, Vector3};
use common::test_utils::{GatedFetcher, MemoryFetcher, RecordingReleaser, TRIANGLE_OBJ, drive, glb_box, gltf_box_parts};
use flow_stage::{
    LoadCallbacks, ModelPipeline,
    bounds::BoundingVolume,
    lifecycle::ResourceKind,
    pipeline::PipelineStatus,
    resources::{LoadError, cache::AssetCache},
};
use futures::executor::LocalPool;

#[derive(Debug, PartialEq)]
enum Outcome {
    Loaded(Option<String>),
    Failed(LoadError),
}

fn recording_callbacks() -> (LoadCallbacks, Rc<RefCell<Vec<Outcome>>>) {
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let on_load = Rc::clone(&outcomes);
    let on_error = Rc::clone(&outcomes);
    let callbacks = LoadCallbacks::new()
        .on_load(move |root| on_load.borrow_mut().push(Outcome::Loaded(root.name().map(str::to_string))))
        .on_error(move |err| on_error.borrow_mut().push(Outcome::Failed(err.clone())));
    (callbacks, outcomes)
}

#[test]
fn offset_box_is_centred_and_scaled_to_unit_size() {
    let fetcher = MemoryFetcher::new().with("models/box.glb", glb_box([2.0, 4.0, 1.0], [10.0, 10.0, 10.0]));
    let cache = AssetCache::new(Rc::new(fetcher));
    let releaser = RecordingReleaser::new();
    let (callbacks, outcomes) = recording_callbacks();

    let (pipeline, task) = ModelPipeline::start_load("models/box.glb", &cache, Rc::new(releaser.clone()), callbacks);
    assert!(pipeline.shows_placeholder());

    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert_eq!(pipeline.status(), PipelineStatus::Ready);
    assert!(!pipeline.shows_placeholder());
    assert_eq!(pipeline.scale_factor(), Some(0.25));
    assert_eq!(pipeline.is_degenerate(), Some(false));
    assert_eq!(*outcomes.borrow(), vec![Outcome::Loaded(Some("normalized".to_string()))]);

    let (position, bounds) = pipeline
        .with_render_root(|root| (root.transform.position, BoundingVolume::of(root)))
        .expect("ready pipelines render their model");
    assert_eq!(position, Vector3::new(0.0, 0.0, 0.0));
    assert!(bounds.center.to_vec().magnitude() < 1e-5);
    assert!((bounds.max_dimension() - 1.0).abs() < 1e-5);
    assert!((bounds.size - Vector3::new(0.5, 1.0, 0.25)).magnitude() < 1e-5);

    // placeholder geometry and material, the box geometry and its material
    assert_eq!(pipeline.resource_count(), 4);
    assert_eq!(releaser.count(), 0);
}

#[test]
fn unsupported_extension_reports_one_error_and_keeps_the_placeholder() {
    let fetcher = MemoryFetcher::new();
    let cache = AssetCache::new(Rc::new(fetcher.clone()));
    let (callbacks, outcomes) = recording_callbacks();

    let (pipeline, task) = ModelPipeline::start_load("models/chair.fbx", &cache, Rc::new(RecordingReleaser::new()), callbacks);
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    let expected = LoadError::UnsupportedFormat("models/chair.fbx".to_string());
    assert_eq!(*outcomes.borrow(), vec![Outcome::Failed(expected.clone())]);
    assert_eq!(pipeline.status(), PipelineStatus::Failed(expected));
    assert!(pipeline.shows_placeholder());
    assert!(pipeline.target().is_none());
    assert_eq!(fetcher.total_requests(), 0);
    let placeholder = pipeline.with_render_root(|root| root.name().map(str::to_string));
    assert_eq!(placeholder, Some(Some("placeholder".to_string())));
}

#[test]
fn missing_file_fails_the_load() {
    let cache = AssetCache::new(Rc::new(MemoryFetcher::new()));
    let (callbacks, outcomes) = recording_callbacks();

    let (pipeline, task) = ModelPipeline::start_load("missing.obj", &cache, Rc::new(RecordingReleaser::new()), callbacks);
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert!(matches!(pipeline.status(), PipelineStatus::Failed(LoadError::Fetch { .. })));
    assert_eq!(outcomes.borrow().len(), 1);
    assert!(pipeline.scale_factor().is_none());
}

#[test]
fn teardown_before_the_first_poll_silences_callbacks() {
    let fetcher = MemoryFetcher::new().with("tri.obj", TRIANGLE_OBJ);
    let cache = AssetCache::new(Rc::new(fetcher));
    let releaser = RecordingReleaser::new();
    let (callbacks, outcomes) = recording_callbacks();

    let (pipeline, task) = ModelPipeline::start_load("tri.obj", &cache, Rc::new(releaser.clone()), callbacks);
    pipeline.teardown();
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert!(outcomes.borrow().is_empty());
    assert_eq!(pipeline.status(), PipelineStatus::TornDown);
    assert!(pipeline.is_disposed());
    assert!(pipeline.with_render_root(|_| ()).is_none());
    // the placeholder's geometry and material
    assert_eq!(releaser.count(), 2);

    pipeline.teardown();
    assert_eq!(releaser.count(), 2);
}

#[test]
fn teardown_while_fetching_drops_the_late_result() {
    let fetcher = GatedFetcher::new();
    let cache = AssetCache::new(Rc::new(fetcher.clone()));
    let releaser = RecordingReleaser::new();
    let (callbacks, outcomes) = recording_callbacks();

    let (pipeline, task) = ModelPipeline::start_load("slow.obj", &cache, Rc::new(releaser.clone()), callbacks);
    let mut pool = LocalPool::new();
    drive(&mut pool, task);
    assert_eq!(fetcher.pending("slow.obj"), 1);
    assert_eq!(pipeline.status(), PipelineStatus::Loading);

    pipeline.teardown();
    pool.run_until_stalled();
    fetcher.open("slow.obj", TRIANGLE_OBJ.as_bytes());
    pool.run_until_stalled();

    assert!(outcomes.borrow().is_empty());
    assert_eq!(pipeline.status(), PipelineStatus::TornDown);
    assert_eq!(releaser.count(), 2);
}

#[test]
fn dropping_an_unfinished_task_fails_the_load() {
    let fetcher = GatedFetcher::new();
    let cache = AssetCache::new(Rc::new(fetcher.clone()));
    let releaser = RecordingReleaser::new();
    let (callbacks, outcomes) = recording_callbacks();

    let (pipeline, task) = ModelPipeline::start_load("slow.obj", &cache, Rc::new(releaser.clone()), callbacks);
    drop(task);

    assert_eq!(*outcomes.borrow(), vec![Outcome::Failed(LoadError::Aborted)]);
    assert_eq!(pipeline.status(), PipelineStatus::Failed(LoadError::Aborted));
    assert!(pipeline.shows_placeholder());
    pipeline.teardown();
    assert_eq!(*outcomes.borrow(), vec![Outcome::Failed(LoadError::Aborted)]);
    assert_eq!(releaser.count(), 2);
}

#[test]
fn dropping_the_handle_tears_the_pipeline_down() {
    let fetcher = MemoryFetcher::new().with("tri.obj", TRIANGLE_OBJ);
    let cache = AssetCache::new(Rc::new(fetcher));
    let releaser = RecordingReleaser::new();

    let (pipeline, task) = ModelPipeline::start_load("tri.obj", &cache, Rc::new(releaser.clone()), LoadCallbacks::new());
    let mut pool = LocalPool::new();
    drive(&mut pool, task);
    let registered = pipeline.resource_count();
    assert!(registered > 2);

    drop(pipeline);
    assert_eq!(releaser.count(), registered);
}

#[test]
fn flat_point_model_is_flagged_degenerate() {
    let point = "o dot\nv 1 1 1\nv 1 1 1\nv 1 1 1\nf 1 2 3\n";
    let fetcher = MemoryFetcher::new().with("dot.obj", point);
    let cache = AssetCache::new(Rc::new(fetcher));

    let (pipeline, task) = ModelPipeline::start_load("dot.obj", &cache, Rc::new(RecordingReleaser::new()), LoadCallbacks::new());
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert!(pipeline.is_ready());
    assert_eq!(pipeline.scale_factor(), Some(1.0));
    assert_eq!(pipeline.is_degenerate(), Some(true));
}

#[test]
fn callback_may_tear_down_its_own_pipeline() {
    let fetcher = MemoryFetcher::new().with("tri.obj", TRIANGLE_OBJ);
    let cache = AssetCache::new(Rc::new(fetcher));
    let releaser = RecordingReleaser::new();
    let slot: Rc<RefCell<Option<ModelPipeline>>> = Rc::new(RefCell::new(None));

    let from_callback = Rc::clone(&slot);
    let callbacks = LoadCallbacks::new().on_load(move |_| {
        if let Some(pipeline) = from_callback.borrow().as_ref() {
            pipeline.teardown();
        }
    });
    let (pipeline, task) = ModelPipeline::start_load("tri.obj", &cache, Rc::new(releaser.clone()), callbacks);
    *slot.borrow_mut() = Some(pipeline);

    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    let slot = slot.borrow();
    let pipeline = slot.as_ref().expect("pipeline stays in its slot");
    assert_eq!(pipeline.status(), PipelineStatus::TornDown);
    assert!(pipeline.target().is_none());
    // placeholder and triangle, geometry and material each
    assert_eq!(pipeline.resource_count(), 0);
    assert_eq!(releaser.count(), 4);
}

#[test]
fn external_gltf_buffers_resolve_next_to_the_model() {
    let (document, bin) = gltf_box_parts([1.0, 1.0, 1.0], [0.0, 0.0, 0.0], Some("box.bin"));
    let fetcher = MemoryFetcher::new()
        .with("models/box.gltf", serde_json::to_vec(&document).expect("valid json"))
        .with("models/box.bin", bin);
    let cache = AssetCache::new(Rc::new(fetcher.clone()));

    let (pipeline, task) = ModelPipeline::start_load("models/box.gltf", &cache, Rc::new(RecordingReleaser::new()), LoadCallbacks::new());
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert!(pipeline.is_ready());
    assert_eq!(fetcher.request_count("models/box.bin"), 1);
    assert_eq!(pipeline.scale_factor(), Some(1.0));
}

#[test]
fn only_the_default_gltf_scene_is_loaded() {
    let (mut document, bin) = gltf_box_parts([1.0, 1.0, 1.0], [0.0, 0.0, 0.0], Some("box.bin"));
    document["nodes"]
        .as_array_mut()
        .expect("nodes")
        .push(serde_json::json!({ "name": "variant", "mesh": 0, "translation": [10.0, 0.0, 0.0] }));
    document["scenes"] = serde_json::json!([{ "nodes": [1] }, { "nodes": [0] }]);
    document["scene"] = serde_json::json!(1);
    let fetcher = MemoryFetcher::new()
        .with("box.gltf", serde_json::to_vec(&document).expect("valid json"))
        .with("box.bin", bin);
    let cache = AssetCache::new(Rc::new(fetcher));

    let (pipeline, task) = ModelPipeline::start_load("box.gltf", &cache, Rc::new(RecordingReleaser::new()), LoadCallbacks::new());
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert!(pipeline.is_ready());
    assert_eq!(pipeline.scale_factor(), Some(1.0));
    assert_eq!(pipeline.with_render_root(|root| root.find_by_name("variant").is_none()), Some(true));
    assert_eq!(pipeline.with_render_root(|root| root.find_by_name("box").is_some()), Some(true));
}

#[test]
fn embedded_data_uris_are_rejected() {
    let (document, _) = gltf_box_parts([1.0, 1.0, 1.0], [0.0, 0.0, 0.0], Some("data:application/octet-stream;base64,AAAA"));
    let fetcher = MemoryFetcher::new().with("inline.gltf", serde_json::to_vec(&document).expect("valid json"));
    let cache = AssetCache::new(Rc::new(fetcher));

    let (pipeline, task) = ModelPipeline::start_load("inline.gltf", &cache, Rc::new(RecordingReleaser::new()), LoadCallbacks::new());
    let mut pool = LocalPool::new();
    drive(&mut pool, task);

    assert!(matches!(pipeline.status(), PipelineStatus::Failed(LoadError::Parse { .. })));
}

#[test]
fn blob_loads_revoke_their_reference_on_teardown() {
    let releaser = RecordingReleaser::new();
    let cache = AssetCache::new(Rc::new(MemoryFetcher::new()));

    let (pipeline, _task) = ModelPipeline::start_load("blob:page/7", &cache, Rc::new(releaser.clone()), LoadCallbacks::new());
    pipeline.teardown();

    assert_eq!(releaser.blobs(), vec!["blob:page/7".to_string()]);
    assert!(
        releaser
            .handles()
            .iter()
            .any(|handle| handle.kind == ResourceKind::Geometry)
    );
}
