//! stage-ngin
//!
//! Renders a single animated glTF model on a transparent surface, natively or
//! in a WASM canvas. The model is fetched once in the background, scaled and
//! given a uniform material look, lit by a fixed rig of eight lights with one
//! soft shadow map, and every animation clip it carries is played at half
//! speed.
//!
//! High-level modules
//! - `config`: the knobs of a stage and their defaults
//! - `stage`: scene, viewport and animation of one rendered page, GPU free
//! - `mixer`: animation actions and their blending onto a model
//! - `resources`: fetching and parsing the model
//! - `render`: per frame snapshots and the renderer that draws them
//! - `context`: window, surface and GPU device
//! - `flow`: the winit event loop tying everything together
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod flow;
pub mod mixer;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod stage;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::StageConfig;
pub use stage::{Stage, Viewport};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Entry point of the WASM build: renders the default model into the page's
/// `canvas.webgl`.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    flow::run(StageConfig::default()).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}
