use std::sync::Arc;

use cgmath::{Quaternion, Vector3};
use gltf::animation::util::ReadOutputs;

use crate::data_structures::animation::{AnimationClip, Channel, Interpolation, Keyframes};

/// Reads every animation of the document into a clip. Unnamed animations are
/// called `animation_<index>`.
pub fn load_animations(document: &gltf::Document, buffers: &[Vec<u8>]) -> Vec<Arc<AnimationClip>> {
    document
        .animations()
        .map(|animation| {
            let name = animation
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("animation_{}", animation.index()));
            let channels = animation
                .channels()
                .filter_map(|channel| load_channel(&channel, buffers, &name))
                .collect();
            Arc::new(AnimationClip::new(name, channels))
        })
        .collect()
}

fn load_channel(channel: &gltf::animation::Channel, buffers: &[Vec<u8>], clip: &str) -> Option<Channel> {
    let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
    let Some(inputs) = reader.read_inputs() else {
        log::warn!("{}: channel {} has no keyframe times", clip, channel.index());
        return None;
    };
    let timestamps: Vec<f32> = inputs.collect();
    let keyframes = match reader.read_outputs() {
        Some(ReadOutputs::Translations(translations)) => {
            Keyframes::Translation(translations.map(Vector3::from).collect())
        }
        Some(ReadOutputs::Rotations(rotations)) => Keyframes::Rotation(
            rotations
                .into_f32()
                .map(|[x, y, z, w]| Quaternion::new(w, x, y, z))
                .collect(),
        ),
        Some(ReadOutputs::Scales(scales)) => Keyframes::Scale(scales.map(Vector3::from).collect()),
        Some(ReadOutputs::MorphTargetWeights(_)) => {
            log::warn!("{}: morph target animation is not supported", clip);
            return None;
        }
        None => {
            log::warn!("{}: channel {} has no keyframe values", clip, channel.index());
            return None;
        }
    };
    let interpolation = match channel.sampler().interpolation() {
        gltf::animation::Interpolation::Linear => Interpolation::Linear,
        gltf::animation::Interpolation::Step => Interpolation::Step,
        gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
    };
    Some(Channel {
        target: channel.target().node().index(),
        interpolation,
        timestamps,
        keyframes,
    })
}
