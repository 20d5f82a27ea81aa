//! The windowed host of a [`Stage`].
//!
//! Every frame:
//! 1. Poll the pending load tasks
//! 2. Advance camera damping and the placement session
//! 3. Render the stage
//!
//! Pointer input goes to the stage's [`InputSurface`](crate::camera::InputSurface):
//! right drag orbits, middle drag pans and the wheel zooms. With a model
//! selected (`Tab` cycles through the ready ones) a left drag moves it with the
//! gizmo; `T`, `R` and `S` switch between translate, rotate and scale, `Esc`
//! ends the session and `Delete` removes the model. Files dropped on the window
//! are loaded through temporary `blob:` references.

use std::{rc::Rc, sync::Arc};

use instant::Instant;
use log::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::{CursorIcon, Window},
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

use crate::{
    camera::PointerInput,
    config::StageConfig,
    context::Context,
    gpu::{ReleaseQueue, Renderer},
    pipeline::LoadTask,
    placement::{GizmoAxis, InteractionHint, PlacementEvent, TransformMode},
    resources::fetch::FileFetcher,
    stage::{PipelineId, Stage},
};

/// Populates the stage once at start-up; the returned load tasks are spawned.
pub type StageSetup = Box<dyn FnOnce(&mut Stage) -> Vec<LoadTask>>;

struct Graphics {
    ctx: Context,
    renderer: Renderer,
}

impl Graphics {
    async fn new(window: Arc<Window>, releases: ReleaseQueue) -> anyhow::Result<Self> {
        let ctx = Context::new(window).await?;
        let renderer = Renderer::new(&ctx, releases)?;
        Ok(Self { ctx, renderer })
    }
}

enum AppEvent {
    #[allow(dead_code)]
    Initialized(anyhow::Result<Graphics>),
}

/// Drives load tasks on the render thread.
struct Tasks {
    #[cfg(not(target_arch = "wasm32"))]
    runtime: tokio::runtime::Runtime,
    #[cfg(not(target_arch = "wasm32"))]
    pool: futures::executor::LocalPool,
}

impl Tasks {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            runtime: tokio::runtime::Runtime::new()?,
            #[cfg(not(target_arch = "wasm32"))]
            pool: futures::executor::LocalPool::new(),
        })
    }

    fn spawn(&self, task: LoadTask) {
        #[cfg(not(target_arch = "wasm32"))]
        {
            use futures::task::LocalSpawnExt;
            if let Err(err) = self.pool.spawner().spawn_local(task) {
                error!("Could not spawn load task: {err}");
            }
        }
        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(task);
    }

    /// Runs every task that can make progress. Native file reads need the
    /// tokio runtime to be entered.
    fn poll(&mut self) {
        #[cfg(not(target_arch = "wasm32"))]
        {
            let _guard = self.runtime.enter();
            self.pool.run_until_stalled();
        }
    }
}

#[derive(Default)]
struct Pointer {
    position: Option<PhysicalPosition<f64>>,
    left: bool,
    middle: bool,
    right: bool,
}

struct App {
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    proxy: EventLoopProxy<AppEvent>,
    tasks: Tasks,
    stage: Stage,
    releases: ReleaseQueue,
    graphics: Option<Graphics>,
    selected: Option<PipelineId>,
    pointer: Pointer,
    last_time: Instant,
}

impl App {
    fn new(event_loop: &EventLoop<AppEvent>, config: StageConfig, setup: StageSetup) -> anyhow::Result<Self> {
        let releases = ReleaseQueue::new();
        let mut stage = Stage::new(
            &config,
            Rc::new(releases.clone()),
            Rc::new(FileFetcher::new(config.asset_root.clone())),
        );
        let tasks = Tasks::new()?;
        for task in setup(&mut stage) {
            tasks.spawn(task);
        }
        Ok(Self {
            proxy: event_loop.create_proxy(),
            tasks,
            stage,
            releases,
            graphics: None,
            selected: None,
            pointer: Pointer::default(),
            last_time: Instant::now(),
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(graphics) = &mut self.graphics {
            graphics.ctx.resize(width, height);
        }
        self.stage.resize(width, height);
    }

    fn frame(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_time).as_secs_f32();
        self.last_time = now;

        self.tasks.poll();
        self.stage.update(dt);
        self.apply_placement_events();

        let Some(graphics) = &mut self.graphics else {
            return;
        };
        graphics.ctx.window.request_redraw();
        if !graphics.ctx.is_surface_configured() {
            return;
        }
        match graphics.renderer.render(&graphics.ctx, &mut self.stage) {
            Ok(()) => {}
            // Reconfigure the surface if it's lost or outdated
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = graphics.ctx.window.inner_size();
                self.resize(size.width, size.height);
            }
            Err(e) => error!("Unable to render {}", e),
        }
    }

    fn apply_placement_events(&mut self) {
        for event in self.stage.placement_mut().drain_events() {
            debug!("Placement: {event:?}");
            match event {
                PlacementEvent::Hint(hint) => {
                    if let Some(graphics) = &self.graphics {
                        graphics.ctx.window.set_cursor(match hint {
                            InteractionHint::Grabbing => CursorIcon::Grabbing,
                            InteractionHint::Idle => CursorIcon::Default,
                        });
                    }
                }
                PlacementEvent::TargetChanged(None) => self.selected = None,
                PlacementEvent::TargetChanged(Some(_)) | PlacementEvent::ModeChanged(_) => {}
            }
        }
    }

    /// Selects the next ready model after the current one.
    fn cycle_selection(&mut self) {
        let ready: Vec<PipelineId> = self
            .stage
            .pipeline_ids()
            .filter(|id| self.stage.pipeline(*id).is_some_and(|p| p.is_ready()))
            .collect();
        let next = match self.selected {
            Some(current) => ready.iter().copied().find(|id| *id > current),
            None => None,
        }
        .or_else(|| ready.first().copied());
        if let Some(id) = next {
            match self.stage.select(id) {
                Ok(()) => self.selected = Some(id),
                Err(err) => warn!("Cannot select {id:?}: {err}"),
            }
        }
    }

    fn pointer_moved(&mut self, position: PhysicalPosition<f64>) {
        let Some(last) = self.pointer.position.replace(position) else {
            return;
        };
        let (dx, dy) = ((position.x - last.x) as f32, (position.y - last.y) as f32);
        let input = self.stage.input().clone();
        if self.pointer.right {
            input.emit(PointerInput::Rotate { dx, dy });
        }
        if self.pointer.middle {
            input.emit(PointerInput::Pan { dx, dy });
        }
        if self.pointer.left && self.stage.placement().is_grabbing() {
            let placement = self.stage.placement_mut();
            match placement.mode() {
                TransformMode::Translate => {
                    placement.drag(GizmoAxis::X, dx * 0.01);
                    placement.drag(GizmoAxis::Z, dy * 0.01);
                }
                TransformMode::Rotate => {
                    placement.drag(GizmoAxis::Y, dx * 0.01);
                }
                TransformMode::Scale => {
                    placement.drag(GizmoAxis::Uniform, -dy * 0.005);
                }
            }
        }
    }

    fn mouse_input(&mut self, button: MouseButton, pressed: bool) {
        match button {
            MouseButton::Left => {
                self.pointer.left = pressed;
                let placement = self.stage.placement_mut();
                if pressed {
                    placement.begin_gesture();
                } else {
                    placement.end_gesture();
                }
            }
            MouseButton::Middle => self.pointer.middle = pressed,
            MouseButton::Right => self.pointer.right = pressed,
            _ => {}
        }
    }

    fn key_pressed(&mut self, key: Key) {
        match key.as_ref() {
            Key::Named(NamedKey::Tab) => self.cycle_selection(),
            Key::Named(NamedKey::Escape) => self.stage.placement_mut().detach(),
            Key::Named(NamedKey::Delete | NamedKey::Backspace) => {
                if let Some(id) = self.selected.take() {
                    self.stage.remove_pipeline(id);
                }
            }
            Key::Character(label) => {
                let mode = match label.to_ascii_lowercase().as_str() {
                    "t" => TransformMode::Translate,
                    "r" => TransformMode::Rotate,
                    "s" => TransformMode::Scale,
                    _ => return,
                };
                self.stage.placement_mut().select_mode(mode);
            }
            _ => {}
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn load_dropped_file(&mut self, path: &std::path::Path) {
        use crate::{
            pipeline::{LoadCallbacks, LoadRequest},
            resources::format::AssetFormat,
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Could not read dropped file {}: {err}", path.display());
                return;
            }
        };
        let name = path.display().to_string();
        let url = self.stage.blobs().create(bytes);
        let mut request = LoadRequest::new(&url);
        request.hint = AssetFormat::from_url(&name);
        let callbacks = LoadCallbacks::new().on_load(move |root| {
            info!("Placed {name} ({} meshes)", root.mesh_count());
        });
        let (_, task) = self.stage.load_model(request, callbacks);
        self.tasks.spawn(task);
    }

    fn install(&mut self, graphics: anyhow::Result<Graphics>, event_loop: &ActiveEventLoop) {
        match graphics {
            Ok(graphics) => {
                let size = graphics.ctx.window.inner_size();
                graphics.ctx.window.request_redraw();
                self.graphics = Some(graphics);
                // Important: configure the surface now that we are initialized
                self.resize(size.width, size.height);
            }
            Err(err) => {
                error!("Graphics initialization failed: {err:#}");
                event_loop.exit();
            }
        }
    }
}

impl ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.graphics.is_some() {
            return;
        }
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("flow-stage");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let window = wgpu::web_sys::window().unwrap_throw();
            let document = window.document().unwrap_throw();
            let canvas = document.get_element_by_id(CANVAS_ID).unwrap_throw();
            let html_canvas_element = canvas.unchecked_into();
            window_attributes = window_attributes.with_canvas(Some(html_canvas_element));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("Could not create a window: {err}");
                event_loop.exit();
                return;
            }
        };
        let init = Graphics::new(window, self.releases.clone());

        #[cfg(not(target_arch = "wasm32"))]
        {
            let graphics = self.tasks.runtime.block_on(init);
            self.install(graphics, event_loop);
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let graphics = init.await;
                if proxy.send_event(AppEvent::Initialized(graphics)).is_err() {
                    log::error!("Event loop closed before graphics were ready");
                }
            });
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            // This is the message from our wasm `spawn_local`
            AppEvent::Initialized(graphics) => self.install(graphics, event_loop),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => self.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.frame(),
            WindowEvent::CursorMoved { position, .. } => self.pointer_moved(position),
            WindowEvent::CursorLeft { .. } => self.pointer.position = None,
            WindowEvent::MouseInput { state, button, .. } => {
                self.mouse_input(button, state == ElementState::Pressed)
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let delta = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y,
                    MouseScrollDelta::PixelDelta(position) => -(position.y as f32) / 50.0,
                };
                self.stage.input().emit(PointerInput::Zoom { delta });
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                self.key_pressed(event.logical_key)
            }
            #[cfg(not(target_arch = "wasm32"))]
            WindowEvent::DroppedFile(path) => self.load_dropped_file(&path),
            _ => {}
        }
    }
}

/// Opens a window showing a stage built from `config` and `setup`.
pub fn run(
    config: StageConfig,
    setup: impl FnOnce(&mut Stage) -> Vec<LoadTask> + 'static,
) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }
    #[cfg(target_arch = "wasm32")]
    {
        console_log::init_with_level(log::Level::Info).unwrap_throw();
    }

    let event_loop: EventLoop<AppEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config, Box::new(setup))?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
