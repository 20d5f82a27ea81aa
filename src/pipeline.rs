//! One model on the stage, from URL to normalized, disposable subtree.
//!
//! [`ModelPipeline::start_load`] returns the pipeline handle together with the
//! task that performs the load. The caller spawns the task on its executor
//! (`wasm_bindgen_futures::spawn_local`, a tokio `LocalSet`, a `LocalPool` in
//! tests) and keeps the handle for as long as the model is part of the scene.
//! [`ModelPipeline::teardown`] (or dropping the handle) aborts a pending load,
//! guarantees that no callback fires afterwards, detaches the subtree and
//! releases its resources.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use futures::{
    FutureExt,
    future::{AbortHandle, Abortable, LocalBoxFuture},
};
use log::{debug, error};

use crate::{
    data_structures::{
        geometry::{Geometry, wire_cube},
        material::Material,
        scene_graph::{MeshData, NodeId, SceneNode},
        transform::Transform,
    },
    lifecycle::{ResourceLifecycleManager, ResourceReleaser},
    normalize::{Normalized, normalize},
    resources::{LoadError, ParsedAsset, cache::AssetCache, format::{AssetFormat, is_blob_url}},
};

/// Work that drives a load to completion. Resolves to `()` whether the load
/// succeeded, failed or was aborted.
pub type LoadTask = LocalBoxFuture<'static, ()>;

#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest {
    pub url: String,
    pub hint: Option<AssetFormat>,
}

impl LoadRequest {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, format: AssetFormat) -> Self {
        self.hint = Some(format);
        self
    }
}

impl From<&str> for LoadRequest {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

type OnLoad = Box<dyn FnOnce(&SceneNode)>;
type OnError = Box<dyn FnOnce(&LoadError)>;

/// Completion callbacks of one load. At most one of them runs, at most once.
#[derive(Default)]
pub struct LoadCallbacks {
    on_load: Option<OnLoad>,
    on_error: Option<OnError>,
}

impl LoadCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_load(mut self, callback: impl FnOnce(&SceneNode) + 'static) -> Self {
        self.on_load = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&LoadError) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    fn loaded(self, root: &SceneNode) {
        if let Some(callback) = self.on_load {
            callback(root);
        }
    }

    fn failed(self, error: &LoadError) {
        if let Some(callback) = self.on_error {
            callback(error);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineStatus {
    Loading,
    Ready,
    Failed(LoadError),
    TornDown,
}

struct Model {
    root: SceneNode,
    scale_factor: f32,
    degenerate: bool,
}

struct PipelineState {
    status: PipelineStatus,
    placeholder: SceneNode,
    model: Option<Model>,
    lifecycle: ResourceLifecycleManager,
    callbacks: Option<LoadCallbacks>,
    abort: Option<AbortHandle>,
}

pub struct ModelPipeline {
    url: String,
    state: Rc<RefCell<PipelineState>>,
}

impl ModelPipeline {
    pub fn start_load(
        request: impl Into<LoadRequest>,
        cache: &AssetCache,
        releaser: Rc<dyn ResourceReleaser>,
        callbacks: LoadCallbacks,
    ) -> (Self, LoadTask) {
        let LoadRequest { url, hint } = request.into();
        let placeholder = placeholder();

        let mut lifecycle = ResourceLifecycleManager::new(releaser);
        lifecycle.register(&placeholder);
        if is_blob_url(&url) {
            lifecycle.register_blob(&url);
        }

        let (abort, registration) = AbortHandle::new_pair();
        let state = Rc::new(RefCell::new(PipelineState {
            status: PipelineStatus::Loading,
            placeholder,
            model: None,
            lifecycle,
            callbacks: Some(callbacks),
            abort: Some(abort),
        }));

        debug!("Loading {url}");
        let load = cache.load(&url, hint);
        let guard = TaskGuard(Rc::downgrade(&state));
        let task = Abortable::new(
            async move {
                let result = load.await;
                if let Some(state) = guard.0.upgrade() {
                    complete(&state, result);
                }
            },
            registration,
        )
        .map(|_| ())
        .boxed_local();

        (Self { url, state }, task)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> PipelineStatus {
        self.state.borrow().status.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().status == PipelineStatus::Ready
    }

    /// Uniform scale the normalizer applied, once ready.
    pub fn scale_factor(&self) -> Option<f32> {
        self.state.borrow().model.as_ref().map(|model| model.scale_factor)
    }

    pub fn is_degenerate(&self) -> Option<bool> {
        self.state.borrow().model.as_ref().map(|model| model.degenerate)
    }

    /// Runs `f` with what this pipeline currently shows: the normalized model
    /// once ready, the placeholder while loading or after a failure, nothing
    /// after teardown.
    pub fn with_render_root<R>(&self, f: impl FnOnce(&SceneNode) -> R) -> Option<R> {
        let state = self.state.borrow();
        match (&state.status, &state.model) {
            (PipelineStatus::TornDown, _) => None,
            (PipelineStatus::Ready, Some(model)) => Some(f(&model.root)),
            _ => Some(f(&state.placeholder)),
        }
    }

    pub fn shows_placeholder(&self) -> bool {
        let state = self.state.borrow();
        matches!(state.status, PipelineStatus::Loading | PipelineStatus::Failed(_))
    }

    /// Handle for the placement controller; only a ready pipeline has one.
    pub fn target(&self) -> Option<PlacementTarget> {
        let state = self.state.borrow();
        match (&state.status, &state.model) {
            (PipelineStatus::Ready, Some(model)) => Some(PlacementTarget {
                state: Rc::downgrade(&self.state),
                node: model.root.id(),
            }),
            _ => None,
        }
    }

    pub fn resource_count(&self) -> usize {
        self.state.borrow().lifecycle.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.borrow().lifecycle.is_disposed()
    }

    /// Aborts a pending load, detaches the subtree and disposes its resources.
    /// Calling it again does nothing.
    pub fn teardown(&self) {
        let mut state = self.state.borrow_mut();
        if state.status == PipelineStatus::TornDown {
            return;
        }
        if let Some(abort) = state.abort.take() {
            abort.abort();
        }
        state.callbacks = None;
        let detached = state.model.take();
        state.status = PipelineStatus::TornDown;
        state.lifecycle.dispose();
        debug!("Tore down {}", self.url);
        drop(detached);
    }
}

impl Drop for ModelPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ModelPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPipeline")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish()
    }
}

fn complete(state: &Rc<RefCell<PipelineState>>, result: Result<std::sync::Arc<ParsedAsset>, LoadError>) {
    let mut guard = state.borrow_mut();
    if guard.status != PipelineStatus::Loading {
        return;
    }
    let callbacks = guard.callbacks.take();
    guard.abort = None;
    match result {
        Ok(parsed) => {
            let Normalized {
                root,
                scale_factor,
                degenerate,
                ..
            } = normalize(parsed.root.instantiate());
            guard.lifecycle.register(&root);
            guard.status = PipelineStatus::Ready;
            debug!(
                "Loaded {} ({} resources, scale {scale_factor})",
                parsed.url,
                guard.lifecycle.len()
            );
            drop(guard);

            // The callback may tear the pipeline down; the model is only
            // stored if it is still wanted afterwards.
            if let Some(callbacks) = callbacks {
                callbacks.loaded(&root);
            }
            let mut guard = state.borrow_mut();
            if guard.status == PipelineStatus::Ready {
                guard.model = Some(Model {
                    root,
                    scale_factor,
                    degenerate,
                });
            }
        }
        Err(err) => {
            error!("Failed to load model: {err}");
            guard.status = PipelineStatus::Failed(err.clone());
            drop(guard);
            if let Some(callbacks) = callbacks {
                callbacks.failed(&err);
            }
        }
    }
}

/// Fails a still-loading pipeline with [`LoadError::Aborted`] when its task is
/// dropped by the executor before it finished.
struct TaskGuard(Weak<RefCell<PipelineState>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(state) = self.0.upgrade() {
            complete(&state, Err(LoadError::Aborted));
        }
    }
}

/// The unit wireframe cube shown while a model loads.
pub fn placeholder() -> SceneNode {
    SceneNode::mesh(MeshData::new(
        Geometry::new(wire_cube()),
        vec![Material::placeholder()],
    ))
    .with_name("placeholder")
}

/// Weak handle to the normalized root of a ready pipeline.
#[derive(Clone)]
pub struct PlacementTarget {
    state: Weak<RefCell<PipelineState>>,
    node: NodeId,
}

impl PlacementTarget {
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// False once the pipeline is torn down or gone.
    pub fn is_alive(&self) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.borrow().model.is_some())
    }

    pub fn transform(&self) -> Option<Transform> {
        let state = self.state.upgrade()?;
        let state = state.borrow();
        state.model.as_ref().map(|model| model.root.transform)
    }

    /// Mutates the target's local transform if it is still alive.
    pub fn update_transform<R>(&self, f: impl FnOnce(&mut Transform) -> R) -> Option<R> {
        let state = self.state.upgrade()?;
        let mut state = state.borrow_mut();
        let model = state.model.as_mut()?;
        Some(f(&mut model.root.transform))
    }
}

impl fmt::Debug for PlacementTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlacementTarget")
            .field("node", &self.node)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for PlacementTarget {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && Weak::ptr_eq(&self.state, &other.state)
    }
}
