//! Animation clips and keyframe sampling.
//!
//! A clip is a set of channels. Every channel drives one property
//! (translation, rotation or scale) of one node of the model with its own
//! keyframe track. Sampling a channel at a time yields a [`ChannelValue`] that
//! the mixer blends and writes back into the node.

use cgmath::{InnerSpace, Quaternion, Vector3, VectorSpace};

use crate::data_structures::instance::{Instance, slerp_shortest};

#[derive(Clone, Debug, PartialEq)]
pub enum Keyframes {
    Translation(Vec<Vector3<f32>>),
    Rotation(Vec<Quaternion<f32>>),
    Scale(Vec<Vector3<f32>>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Translation,
    Rotation,
    Scale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
    /// Outputs are stored as `(in_tangent, value, out_tangent)` triplets.
    CubicSpline,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelValue {
    Translation(Vector3<f32>),
    Rotation(Quaternion<f32>),
    Scale(Vector3<f32>),
}

impl ChannelValue {
    pub fn property(&self) -> Property {
        match self {
            ChannelValue::Translation(_) => Property::Translation,
            ChannelValue::Rotation(_) => Property::Rotation,
            ChannelValue::Scale(_) => Property::Scale,
        }
    }

    /// The current value of `property` on `instance`.
    pub fn of(instance: &Instance, property: Property) -> Self {
        match property {
            Property::Translation => ChannelValue::Translation(instance.position),
            Property::Rotation => ChannelValue::Rotation(instance.rotation),
            Property::Scale => ChannelValue::Scale(instance.scale),
        }
    }

    /// Blends towards `other` by `t`. Mismatched properties keep `self`.
    pub fn lerp(&self, other: &ChannelValue, t: f32) -> ChannelValue {
        match (self, other) {
            (ChannelValue::Translation(a), ChannelValue::Translation(b)) => {
                ChannelValue::Translation(a.lerp(*b, t))
            }
            (ChannelValue::Rotation(a), ChannelValue::Rotation(b)) => {
                ChannelValue::Rotation(slerp_shortest(*a, *b, t))
            }
            (ChannelValue::Scale(a), ChannelValue::Scale(b)) => ChannelValue::Scale(a.lerp(*b, t)),
            _ => *self,
        }
    }

    pub fn apply(&self, instance: &mut Instance) {
        match self {
            ChannelValue::Translation(v) => instance.position = *v,
            ChannelValue::Rotation(q) => instance.rotation = *q,
            ChannelValue::Scale(v) => instance.scale = *v,
        }
    }
}

/// One animated property of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub target: usize,
    pub interpolation: Interpolation,
    pub timestamps: Vec<f32>,
    pub keyframes: Keyframes,
}

impl Channel {
    pub fn property(&self) -> Property {
        match self.keyframes {
            Keyframes::Translation(_) => Property::Translation,
            Keyframes::Rotation(_) => Property::Rotation,
            Keyframes::Scale(_) => Property::Scale,
        }
    }

    /// Time of the last keyframe, in seconds.
    pub fn duration(&self) -> f32 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }

    /// Samples the track at `time`. Times outside the track clamp to its ends.
    pub fn sample(&self, time: f32) -> Option<ChannelValue> {
        let frames = self.timestamps.len();
        if frames == 0 {
            return None;
        }
        let next = self.timestamps.partition_point(|&t| t <= time);
        if next == 0 {
            return self.value_at(0);
        }
        if next >= frames {
            return self.value_at(frames - 1);
        }
        let prev = next - 1;
        let t0 = self.timestamps[prev];
        let t1 = self.timestamps[next];
        let span = t1 - t0;
        if span <= f32::EPSILON {
            return self.value_at(next);
        }
        let s = (time - t0) / span;
        match self.interpolation {
            Interpolation::Step => self.value_at(prev),
            Interpolation::Linear => {
                let a = self.value_at(prev)?;
                let b = self.value_at(next)?;
                Some(a.lerp(&b, s))
            }
            Interpolation::CubicSpline => self.cubic(prev, next, s, span),
        }
    }

    /// Keyframe value, skipping the tangents of cubic spline tracks.
    fn value_at(&self, frame: usize) -> Option<ChannelValue> {
        let idx = match self.interpolation {
            Interpolation::CubicSpline => frame * 3 + 1,
            _ => frame,
        };
        match &self.keyframes {
            Keyframes::Translation(v) => v.get(idx).map(|v| ChannelValue::Translation(*v)),
            Keyframes::Rotation(q) => q.get(idx).map(|q| ChannelValue::Rotation(*q)),
            Keyframes::Scale(v) => v.get(idx).map(|v| ChannelValue::Scale(*v)),
        }
    }

    fn cubic(&self, prev: usize, next: usize, s: f32, span: f32) -> Option<ChannelValue> {
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        let (v0, b0) = (prev * 3 + 1, prev * 3 + 2);
        let (a1, v1) = (next * 3, next * 3 + 1);
        match &self.keyframes {
            Keyframes::Translation(v) | Keyframes::Scale(v) => {
                let p = *v.get(v0)? * h00
                    + *v.get(b0)? * (h10 * span)
                    + *v.get(v1)? * h01
                    + *v.get(a1)? * (h11 * span);
                Some(match self.keyframes {
                    Keyframes::Translation(_) => ChannelValue::Translation(p),
                    _ => ChannelValue::Scale(p),
                })
            }
            Keyframes::Rotation(q) => {
                let p = *q.get(v0)? * h00
                    + *q.get(b0)? * (h10 * span)
                    + *q.get(v1)? * h01
                    + *q.get(a1)? * (h11 * span);
                Some(ChannelValue::Rotation(p.normalize()))
            }
        }
    }
}

/// A named animation: every channel it drives and its total length.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub channels: Vec<Channel>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        let duration = channels
            .iter()
            .map(Channel::duration)
            .fold(0.0_f32, f32::max);
        Self {
            name: name.into(),
            duration,
            channels,
        }
    }
}
