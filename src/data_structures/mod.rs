//! Stage data structures: transforms, geometry, materials and scene graphs.
//!
//! - `transform` holds the position/rotation/scale of a node relative to its parent
//! - `geometry` contains CPU-side vertex data and the procedural primitives (boxes, wire cube)
//! - `material` contains PBR surface parameters and the palette library
//! - `scene_graph` enables hierarchical scene organization
//! - `texture` wraps the depth buffer and shadow map textures

pub mod geometry;
pub mod material;
pub mod scene_graph;
pub mod texture;
pub mod transform;
