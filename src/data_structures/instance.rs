//! Local transforms of scene nodes.
//!
//! glTF nodes carry translation, rotation and scale separately and animation
//! channels target them one at a time, so transforms are kept decomposed and
//! only turned into matrices when world transforms are computed.

use cgmath::One;

/// Translation, rotation (unit quaternion) and scale of one node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Converts glTF's decomposed `([x, y, z], [x, y, z, w], [x, y, z])`.
    pub fn from_gltf(decomposed: ([f32; 3], [f32; 4], [f32; 3])) -> Self {
        let (t, r, s) = decomposed;
        Self {
            position: t.into(),
            rotation: cgmath::Quaternion::new(r[3], r[0], r[1], r[2]),
            scale: s.into(),
        }
    }

    pub fn with_uniform_scale(mut self, factor: f32) -> Self {
        self.scale = cgmath::Vector3::new(factor, factor, factor);
        self
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

/// Slerp along the shorter arc; `q` and `-q` are the same rotation.
pub(crate) fn slerp_shortest(
    from: cgmath::Quaternion<f32>,
    to: cgmath::Quaternion<f32>,
    t: f32,
) -> cgmath::Quaternion<f32> {
    use cgmath::InnerSpace;
    let to = if from.dot(to) < 0.0 { -to } else { to };
    from.slerp(to, t).normalize()
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl From<cgmath::Vector3<f32>> for Instance {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;

    #[test]
    fn gltf_rotation_is_xyzw() {
        // 90° about z, glTF order [x, y, z, w]
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let instance = Instance::from_gltf(([0.0; 3], [0.0, 0.0, half, half], [1.0; 3]));
        let rotated = instance.rotation * Vector3::new(1.0, 0.0, 0.0);
        assert!(rotated.x.abs() < 1e-5);
        assert!((rotated.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn uniform_scale_only_touches_scale() {
        let instance = Instance::from(Vector3::new(4.0, 5.0, 6.0)).with_uniform_scale(3.5);
        assert_eq!(instance.scale, Vector3::new(3.5, 3.5, 3.5));
        assert_eq!(instance.position, Vector3::new(4.0, 5.0, 6.0));
    }
}
