//! Animation playback.
//!
//! An [`AnimationMixer`] is bound to one model in the scene and owns one
//! [`AnimationAction`] per clip it was asked to play. Every update advances
//! all actions, samples their clips and writes the blended result into the
//! model's node transforms.

use std::{collections::HashMap, sync::Arc};

use crate::data_structures::{
    animation::{AnimationClip, ChannelValue, Property},
    scene_graph::Model,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    /// Play once and stop at the end.
    Once,
    /// Start over from the beginning, forever.
    #[default]
    Repeat,
    /// Alternate between forward and backward playback, forever.
    PingPong,
}

/// Playback state of one clip.
#[derive(Clone, Debug)]
pub struct AnimationAction {
    clip: Arc<AnimationClip>,
    pub time_scale: f32,
    /// Influence on the animated nodes, 0 to 1.
    pub weight: f32,
    pub loop_mode: LoopMode,
    /// With [`LoopMode::Once`], hold the last frame instead of letting go.
    pub clamp_when_finished: bool,
    pub enabled: bool,
    pub paused: bool,
    /// Local time. For ping-pong this runs over twice the clip duration.
    time: f32,
    running: bool,
}

impl AnimationAction {
    fn new(clip: Arc<AnimationClip>) -> Self {
        Self {
            clip,
            time_scale: 1.0,
            weight: 1.0,
            loop_mode: LoopMode::default(),
            clamp_when_finished: false,
            enabled: true,
            paused: false,
            time: 0.0,
            running: false,
        }
    }

    /// The clip this action plays.
    pub fn clip(&self) -> &Arc<AnimationClip> {
        &self.clip
    }

    /// Schedules the action. It advances from the next mixer update on.
    pub fn play(&mut self) -> &mut Self {
        self.running = true;
        self
    }

    /// Unschedules the action and rewinds it.
    pub fn stop(&mut self) -> &mut Self {
        self.running = false;
        self.reset()
    }

    pub fn reset(&mut self) -> &mut Self {
        self.time = 0.0;
        self.paused = false;
        self.enabled = true;
        self
    }

    /// Whether the action is scheduled and its time moves.
    pub fn is_running(&self) -> bool {
        self.running && self.enabled && !self.paused && self.time_scale != 0.0
    }

    /// Whether the action is playing or paused, as opposed to stopped.
    pub fn is_scheduled(&self) -> bool {
        self.running
    }

    /// Position in the clip, in seconds.
    pub fn time(&self) -> f32 {
        let duration = self.clip.duration;
        if self.loop_mode == LoopMode::PingPong && self.time > duration {
            2.0 * duration - self.time
        } else {
            self.time
        }
    }

    /// Whether the action writes into the model this frame.
    fn is_effective(&self) -> bool {
        self.running && self.enabled && self.weight > 0.0
    }

    fn advance(&mut self, dt: f32) {
        if !self.is_running() {
            return;
        }
        let duration = self.clip.duration;
        if duration <= 0.0 {
            self.time = 0.0;
            return;
        }
        self.time += dt * self.time_scale;
        match self.loop_mode {
            LoopMode::Repeat => self.time = self.time.rem_euclid(duration),
            LoopMode::PingPong => self.time = self.time.rem_euclid(2.0 * duration),
            LoopMode::Once => {
                if self.time >= duration || self.time < 0.0 {
                    self.time = self.time.clamp(0.0, duration);
                    if self.clamp_when_finished {
                        self.paused = true;
                    } else {
                        self.enabled = false;
                    }
                }
            }
        }
    }
}

/// Blended value of one property of one node.
struct Blend {
    value: ChannelValue,
    weight: f32,
}

pub struct AnimationMixer {
    /// Scene index of the model the mixer animates.
    root: usize,
    actions: Vec<AnimationAction>,
    pub time_scale: f32,
    time: f32,
}

impl AnimationMixer {
    pub fn new(root: usize) -> Self {
        Self {
            root,
            actions: Vec::new(),
            time_scale: 1.0,
            time: 0.0,
        }
    }

    /// Scene index of the model the mixer animates.
    pub fn root(&self) -> usize {
        self.root
    }

    /// Global mixer time, scaled by [`AnimationMixer::time_scale`].
    pub fn time(&self) -> f32 {
        self.time
    }

    /// The action playing `clip`, created on first request. Clips are
    /// matched by identity, so asking twice returns the same action.
    pub fn clip_action(&mut self, clip: &Arc<AnimationClip>) -> &mut AnimationAction {
        let idx = match self
            .actions
            .iter()
            .position(|action| Arc::ptr_eq(&action.clip, clip))
        {
            Some(idx) => idx,
            None => {
                self.actions.push(AnimationAction::new(clip.clone()));
                self.actions.len() - 1
            }
        };
        &mut self.actions[idx]
    }

    /// The action bound to `clip`, without creating one.
    pub fn existing_action(&self, clip: &Arc<AnimationClip>) -> Option<&AnimationAction> {
        self.actions
            .iter()
            .find(|action| Arc::ptr_eq(&action.clip, clip))
    }

    /// Every action, in creation order.
    pub fn actions(&self) -> &[AnimationAction] {
        &self.actions
    }

    pub fn stop_all_action(&mut self) {
        for action in self.actions.iter_mut() {
            action.stop();
        }
    }

    /// Advances every action by `dt` seconds and poses `model`.
    ///
    /// Actions touching the same property are blended by weight. When the
    /// weights sum to less than one the remainder is taken from the node's
    /// rest pose.
    pub fn update(&mut self, dt: f32, model: &mut Model) {
        let dt = dt * self.time_scale;
        self.time += dt;

        let mut blends: HashMap<(usize, Property), Blend> = HashMap::new();
        for action in self.actions.iter_mut() {
            // an action finishing this frame still shows its last pose
            let effective = action.is_effective();
            action.advance(dt);
            if !effective {
                continue;
            }
            let weight = action.weight;
            let time = action.time();
            for channel in &action.clip.channels {
                let Some(value) = channel.sample(time) else {
                    continue;
                };
                blends
                    .entry((channel.target, channel.property()))
                    .and_modify(|blend| {
                        let total = blend.weight + weight;
                        blend.value = blend.value.lerp(&value, weight / total);
                        blend.weight = total;
                    })
                    .or_insert(Blend { value, weight });
            }
        }

        for ((target, property), blend) in blends {
            let Some(node) = model.nodes.get_mut(target) else {
                continue;
            };
            let value = if blend.weight < 1.0 {
                ChannelValue::of(&node.rest, property).lerp(&blend.value, blend.weight)
            } else {
                blend.value
            };
            value.apply(&mut node.transform);
        }
    }
}
