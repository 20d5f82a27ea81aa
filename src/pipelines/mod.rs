//! Render pipelines of the stage renderer.
//!
//! - `basic`: the lit triangle, line and overlay pipelines
//! - `light`: lighting uniform and the shadow map bindings
//! - `shadow`: depth-only pass from the sun

pub mod basic;
pub mod light;
pub mod shadow;
