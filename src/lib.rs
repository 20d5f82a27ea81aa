//! flow-stage
//!
//! Interactive room composition on top of a small wgpu scene graph, native and
//! WASM. Arbitrary glTF and OBJ assets are loaded asynchronously, normalized
//! into a unit-sized canonical space, placed into a parametric room and moved,
//! rotated or scaled through a gizmo. Every GPU-side resource a model brings in
//! is owned by exactly one lifecycle manager and released when the model goes.
//!
//! High-level modules
//! - `bounds`: world-space bounding volumes of scene subtrees
//! - `normalize`: centring and unit scaling of loaded models
//! - `lifecycle`: exactly-once disposal of geometry, materials and blob URLs
//! - `resources`: format detection, fetching, caching and the glTF/OBJ parsers
//! - `pipeline`: one model from URL to normalized, disposable subtree
//! - `placement`: transform mode state machine and the gizmo
//! - `room`: parametric floor and walls
//! - `stage`: the scene host (lighting, room, models, camera, placement)
//! - `camera`: orbit camera, input surface and damped controls
//! - `config`: JSON start-up configuration
//! - `context`, `gpu`, `pipelines`: wgpu device, buffers and render pipelines
//! - `app`: the winit event loop hosting a stage
//!

pub mod app;
pub mod bounds;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod gpu;
pub mod lifecycle;
pub mod normalize;
pub mod pipeline;
pub mod pipelines;
pub mod placement;
pub mod resources;
pub mod room;
pub mod stage;

// Re-exports commonly used types for convenience in downstream code.
pub use app::run;
pub use config::StageConfig;
pub use pipeline::{LoadCallbacks, LoadRequest, ModelPipeline};
pub use placement::TransformMode;
pub use room::{MaterialPalette, RoomSpec};
pub use stage::Stage;
pub use cgmath;
pub use winit::event::WindowEvent;
