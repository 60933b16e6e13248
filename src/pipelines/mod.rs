//! Render pipelines and the bind group layouts they share.
//!
//! - `model`: the lit, skinned pipeline models are drawn with
//! - `light`: lights uniform and shadow map bindings
//! - `shadow`: depth only pass from the shadow casting light

pub mod light;
pub mod model;
pub mod shadow;
