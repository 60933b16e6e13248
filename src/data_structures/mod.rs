//! Engine data structures: scene graph, models, lights, animation clips and
//! textures.
//!
//! - `scene_graph` holds the scene and the node hierarchy of loaded models
//! - `model` contains geometry, material and mesh definitions
//! - `instance` holds a node's translation, rotation and scale
//! - `animation` contains keyframed clips and their sampling
//! - `light` describes the light rig and its GPU packing
//! - `texture` contains the GPU texture wrapper and creation utilities

pub mod animation;
pub mod instance;
pub mod light;
pub mod model;
pub mod scene_graph;
pub mod texture;
