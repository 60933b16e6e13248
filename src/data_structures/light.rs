//! Scene lights and their shader representation.
//!
//! Lights are plain values: they are created once with [`studio_rig`] and
//! never mutated. Every frame they are packed into a [`LightsUniform`].
//!
//! Directional and spot lights flagged with `cast_shadow` each get one layer
//! of the shadow map array. Directional lights render it through an
//! orthographic frustum, spot lights through a perspective one covering
//! their cone.

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Vector3, ortho, perspective};

use crate::{camera::OPENGL_TO_WGPU_MATRIX, config::ShadowMapSettings};

/// Upper bound of non-ambient lights the shader iterates over.
pub const MAX_LIGHTS: usize = 8;

/// Layers of the shadow map array, one per casting light.
pub const MAX_SHADOW_CASTERS: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum LightKind {
    Ambient,
    /// Parallel rays travelling from `position` towards `target`.
    Directional { target: Point3<f32> },
    Spot {
        target: Point3<f32>,
        /// Half-angle of the cone, radians.
        angle: f32,
        /// Fraction of the cone over which the light fades out.
        penumbra: f32,
        /// 0 means unbounded.
        distance: f32,
        decay: f32,
    },
    Point { distance: f32, decay: f32 },
}

/// Frustum a light's shadow map layer is rendered with. Directional lights
/// use the orthographic bounds, spot lights only `near` and `far`.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowCamera {
    pub map_size: u32,
    pub near: f32,
    pub far: f32,
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Default for ShadowCamera {
    fn default() -> Self {
        Self {
            map_size: 512,
            near: 0.5,
            far: 500.0,
            left: -5.0,
            right: 5.0,
            top: 5.0,
            bottom: -5.0,
        }
    }
}

impl ShadowCamera {
    /// Box frustum for directional lights.
    pub fn orthographic(&self) -> Matrix4<f32> {
        ortho(
            self.left,
            self.right,
            self.bottom,
            self.top,
            self.near,
            self.far,
        )
    }

    /// Square frustum with a vertical opening of `fov`.
    pub fn perspective(&self, fov: Rad<f32>) -> Matrix4<f32> {
        perspective(fov, 1.0, self.near, self.far)
    }
}

/// View matrix of a light at `position` looking at `target`.
fn light_view(position: Point3<f32>, target: Point3<f32>) -> Matrix4<f32> {
    let direction = (target - position).normalize();
    // look_at degenerates when looking straight along the up vector
    let up = if direction.y.abs() > 0.99 {
        Vector3::unit_z()
    } else {
        Vector3::unit_y()
    };
    Matrix4::look_at_rh(position, target, up)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
    pub position: Point3<f32>,
    pub cast_shadow: bool,
    pub shadow: ShadowCamera,
}

impl Light {
    fn new(name: &str, kind: LightKind, intensity: f32, position: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            color: [1.0, 1.0, 1.0],
            intensity,
            position: position.into(),
            cast_shadow: false,
            shadow: ShadowCamera::default(),
        }
    }

    pub fn ambient(intensity: f32) -> Self {
        Self::new("ambient", LightKind::Ambient, intensity, [0.0; 3])
    }

    /// Directional light aimed at the origin.
    pub fn directional(name: &str, intensity: f32, position: [f32; 3]) -> Self {
        let target = Point3::origin();
        Self::new(name, LightKind::Directional { target }, intensity, position)
    }

    /// Spot light aimed at the origin, unbounded range with physical decay.
    pub fn spot(name: &str, intensity: f32, position: [f32; 3], angle: f32, penumbra: f32) -> Self {
        let kind = LightKind::Spot {
            target: Point3::origin(),
            angle,
            penumbra,
            distance: 0.0,
            decay: 2.0,
        };
        Self::new(name, kind, intensity, position)
    }

    pub fn point(name: &str, intensity: f32, position: [f32; 3]) -> Self {
        let kind = LightKind::Point {
            distance: 0.0,
            decay: 2.0,
        };
        Self::new(name, kind, intensity, position)
    }

    pub fn with_shadow(mut self, shadow: ShadowCamera) -> Self {
        self.cast_shadow = true;
        self.shadow = shadow;
        self
    }

    /// Casts shadows with the default [`ShadowCamera`].
    pub fn casting_shadow(mut self) -> Self {
        self.cast_shadow = true;
        self
    }

    /// Point a directional or spot light aims at.
    pub fn target(&self) -> Option<Point3<f32>> {
        match self.kind {
            LightKind::Directional { target } | LightKind::Spot { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Light colour scaled by its intensity.
    pub fn radiance(&self) -> [f32; 3] {
        self.color.map(|c| c * self.intensity)
    }
}

/// The fixed lighting of the stage: one ambient, three directional, two spot
/// and two point lights, all white.
pub fn studio_rig() -> Vec<Light> {
    let cone = std::f32::consts::PI / 6.0;
    vec![
        Light::ambient(2.0),
        Light::directional("key", 2.0, [5.0, 5.0, 5.0]).casting_shadow(),
        Light::directional("fill", 1.5, [-5.0, 5.0, 5.0]),
        Light::directional("top", 2.0, [0.0, 10.0, 0.0]).with_shadow(ShadowCamera {
            map_size: 2048,
            near: 0.5,
            far: 50.0,
            left: -10.0,
            right: 10.0,
            top: 10.0,
            bottom: -10.0,
        }),
        Light::spot("spot_top", 2.0, [0.0, 10.0, 0.0], cone, 0.1).casting_shadow(),
        Light::spot("spot_key", 1.5, [5.0, 5.0, 5.0], cone, 0.1).casting_shadow(),
        Light::point("point_left", 1.5, [-5.0, -5.0, 5.0]),
        Light::point("point_right", 1.5, [5.0, -5.0, 5.0]),
    ]
}

/// The lights that render a shadow map layer, in layer order.
///
/// Only directional and spot lights cast; point light shadows would need a
/// cube map. Casters beyond [`MAX_SHADOW_CASTERS`] are dropped with a warning.
pub fn shadow_casters<'a>(lights: impl IntoIterator<Item = &'a Light>) -> Vec<&'a Light> {
    let mut casters = Vec::new();
    for light in lights.into_iter().filter(|light| light.cast_shadow) {
        if !matches!(light.kind, LightKind::Directional { .. } | LightKind::Spot { .. }) {
            log::warn!("{} cannot cast shadows, ignoring its shadow flag", light.name);
            continue;
        }
        if casters.len() == MAX_SHADOW_CASTERS {
            log::warn!(
                "Only {} lights can cast shadows, ignoring {}",
                MAX_SHADOW_CASTERS,
                light.name
            );
            continue;
        }
        casters.push(light);
    }
    casters
}

/// Edge length of the shadow map array: the largest map any caster asks for.
/// All layers share it. 1 when nothing casts.
pub fn shadow_map_size(casters: &[&Light]) -> u32 {
    casters
        .iter()
        .map(|light| light.shadow.map_size)
        .max()
        .unwrap_or(1)
        .max(1)
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    /// xyz position, w kind (1 directional, 2 point, 3 spot)
    position: [f32; 4],
    /// xyz normalised direction, w cosine of the outer cone angle
    direction: [f32; 4],
    /// rgb radiance, w cosine of the inner cone angle
    color: [f32; 4],
    /// distance, decay, casts a shadow, shadow map layer
    params: [f32; 4],
}

impl GpuLight {
    fn new(light: &Light, shadow_layer: Option<usize>) -> Option<Self> {
        let position = light.position;
        let direction = light
            .target()
            .map(|target| (target - position).normalize())
            .unwrap_or(Vector3::new(0.0, -1.0, 0.0));
        let [r, g, b] = light.radiance();
        let (shadow, layer) = match shadow_layer {
            Some(layer) => (1.0, layer as f32),
            None => (0.0, 0.0),
        };
        let (kind, outer, inner, distance, decay) = match light.kind {
            LightKind::Ambient => return None,
            LightKind::Directional { .. } => (1.0, 0.0, 0.0, 0.0, 0.0),
            LightKind::Point { distance, decay } => (2.0, 0.0, 0.0, distance, decay),
            LightKind::Spot {
                angle,
                penumbra,
                distance,
                decay,
                ..
            } => (
                3.0,
                angle.cos(),
                (angle * (1.0 - penumbra)).cos(),
                distance,
                decay,
            ),
        };
        Some(Self {
            position: [position.x, position.y, position.z, kind],
            direction: [direction.x, direction.y, direction.z, outer],
            color: [r, g, b, inner],
            params: [distance, decay, shadow, layer],
        })
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightsUniform {
    /// Sum of all ambient lights.
    ambient: [f32; 4],
    /// One view-projection per shadow map layer.
    shadow_view_proj: [[[f32; 4]; 4]; MAX_SHADOW_CASTERS],
    /// enabled, map size, kernel radius, number of casters
    shadow_params: [f32; 4],
    /// number of used entries in `lights`
    count: [u32; 4],
    lights: [GpuLight; MAX_LIGHTS],
}

impl LightsUniform {
    pub fn new(lights: &[&Light], shadow: &ShadowMapSettings) -> Self {
        use cgmath::SquareMatrix;

        let casters = if shadow.enabled {
            shadow_casters(lights.iter().copied())
        } else {
            Vec::new()
        };
        let mut ambient = [0.0_f32; 4];
        let mut packed = [GpuLight::default(); MAX_LIGHTS];
        let mut count = 0;
        for light in lights {
            if matches!(light.kind, LightKind::Ambient) {
                for (sum, c) in ambient.iter_mut().zip(light.radiance()) {
                    *sum += c;
                }
                continue;
            }
            if count == MAX_LIGHTS {
                log::warn!("Only {} lights are supported, ignoring {}", MAX_LIGHTS, light.name);
                continue;
            }
            let layer = casters
                .iter()
                .position(|caster| std::ptr::eq(*caster, *light));
            if let Some(gpu_light) = GpuLight::new(light, layer) {
                packed[count] = gpu_light;
                count += 1;
            }
        }

        let identity: [[f32; 4]; 4] = Matrix4::identity().into();
        let mut shadow_view_proj = [identity; MAX_SHADOW_CASTERS];
        for (slot, light) in shadow_view_proj.iter_mut().zip(&casters) {
            *slot = light_view_projection(light).into();
        }
        let shadow_params = if casters.is_empty() {
            [0.0; 4]
        } else {
            [
                1.0,
                shadow_map_size(&casters) as f32,
                shadow.kind.kernel_radius() as f32,
                casters.len() as f32,
            ]
        };

        Self {
            ambient,
            shadow_view_proj,
            shadow_params,
            count: [count as u32, 0, 0, 0],
            lights: packed,
        }
    }

    /// Non-ambient lights packed into the uniform.
    pub fn light_count(&self) -> u32 {
        self.count[0]
    }

    /// Whether at least one light renders a shadow map layer.
    pub fn shadows_enabled(&self) -> bool {
        self.shadow_params[0] > 0.0
    }

    /// Number of shadow map layers in use.
    pub fn shadow_caster_count(&self) -> usize {
        self.shadow_params[3] as usize
    }

    /// Summed ambient radiance.
    pub fn ambient(&self) -> [f32; 3] {
        [self.ambient[0], self.ambient[1], self.ambient[2]]
    }
}

/// View-projection of a light's shadow camera. A spot light's frustum opens
/// to the full cone.
pub fn light_view_projection(light: &Light) -> Matrix4<f32> {
    let target = light.target().unwrap_or(Point3::origin());
    let projection = match light.kind {
        LightKind::Spot { angle, .. } => light.shadow.perspective(Rad(2.0 * angle)),
        _ => light.shadow.orthographic(),
    };
    OPENGL_TO_WGPU_MATRIX * projection * light_view(light.position, target)
}

#[cfg(test)]
mod tests {
    use cgmath::{Transform, Vector4};

    use super::*;
    use crate::config::ShadowMapKind;

    #[test]
    fn rig_has_one_ambient_three_directional_two_spot_two_point() {
        let rig = studio_rig();
        let count = |f: fn(&LightKind) -> bool| rig.iter().filter(|l| f(&l.kind)).count();
        assert_eq!(count(|k| matches!(k, LightKind::Ambient)), 1);
        assert_eq!(count(|k| matches!(k, LightKind::Directional { .. })), 3);
        assert_eq!(count(|k| matches!(k, LightKind::Spot { .. })), 2);
        assert_eq!(count(|k| matches!(k, LightKind::Point { .. })), 2);
    }

    #[test]
    fn every_flagged_directional_and_spot_light_casts() {
        let rig = studio_rig();
        let casters = shadow_casters(&rig);
        let names: Vec<&str> = casters.iter().map(|light| light.name.as_str()).collect();
        assert_eq!(names, ["key", "top", "spot_top", "spot_key"]);
        // the array is as large as the finest map
        assert_eq!(shadow_map_size(&casters), 2048);
        assert_eq!(shadow_map_size(&[]), 1);
    }

    #[test]
    fn point_lights_and_overflow_do_not_cast() {
        let lights: Vec<Light> = (0..6)
            .map(|i| Light::directional(&format!("d{i}"), 1.0, [1.0, 5.0, i as f32]).casting_shadow())
            .chain(std::iter::once(
                Light::point("p", 1.0, [0.0, 5.0, 0.0]).casting_shadow(),
            ))
            .collect();
        let casters = shadow_casters(&lights);
        assert_eq!(casters.len(), MAX_SHADOW_CASTERS);
        assert!(casters.iter().all(|light| light.name.starts_with('d')));
    }

    #[test]
    fn overhead_shadow_camera_sees_origin() {
        let rig = studio_rig();
        let light = rig.iter().find(|light| light.name == "top").unwrap();
        let clip = light_view_projection(light).transform_point(Point3::origin());
        assert!(clip.x.abs() < 1e-5);
        assert!(clip.y.abs() < 1e-5);
        // depth in wgpu's 0..1 range
        assert!(clip.z > 0.0 && clip.z < 1.0);
        let edge = light_view_projection(light) * Vector4::new(10.0, 0.0, 0.0, 1.0);
        assert!((edge.x.abs() - 1.0).abs() < 1e-5 || (edge.y.abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn spot_shadow_camera_covers_its_cone() {
        let rig = studio_rig();
        let light = rig.iter().find(|light| light.name == "spot_key").unwrap();
        let view_proj = light_view_projection(light);

        let centre = view_proj * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!(centre.w > 0.0);
        assert!((centre.x / centre.w).abs() < 1e-4);
        assert!((centre.y / centre.w).abs() < 1e-4);
        let depth = centre.z / centre.w;
        assert!(depth > 0.0 && depth < 1.0);

        // perspective: a point twice as far away lands closer to the centre
        let offset = Vector3::new(0.5, 0.0, -0.5);
        let near = view_proj.transform_point(Point3::from_vec(Vector3::new(1.0, 1.0, 1.0) + offset));
        let far = view_proj.transform_point(Point3::from_vec(Vector3::new(-3.0, -3.0, -3.0) + offset));
        assert!(far.x.abs() < near.x.abs());
    }

    #[test]
    fn uniform_sums_ambient_and_packs_the_rest() {
        let rig = studio_rig();
        let refs: Vec<&Light> = rig.iter().collect();
        let uniform = LightsUniform::new(&refs, &ShadowMapSettings::default());
        assert_eq!(uniform.ambient(), [2.0, 2.0, 2.0]);
        assert_eq!(uniform.light_count(), 7);
        assert!(uniform.shadows_enabled());
        assert_eq!(uniform.shadow_params[1], 2048.0);
        assert_eq!(uniform.shadow_params[2], 2.0);
        assert_eq!(uniform.shadow_caster_count(), 4);

        let layers: Vec<f32> = uniform
            .lights
            .iter()
            .filter(|l| l.params[2] == 1.0)
            .map(|l| l.params[3])
            .collect();
        assert_eq!(layers, [0.0, 1.0, 2.0, 3.0]);
        for (layer, name) in ["key", "top", "spot_top", "spot_key"].iter().enumerate() {
            let light = rig.iter().find(|light| light.name == *name).unwrap();
            let expected: [[f32; 4]; 4] = light_view_projection(light).into();
            assert_eq!(uniform.shadow_view_proj[layer], expected);
        }
    }

    #[test]
    fn uniform_size_matches_shader_struct() {
        // ambient, 4 shadow matrices, shadow params, count, 8 lights
        assert_eq!(std::mem::size_of::<LightsUniform>(), 16 + 4 * 64 + 16 + 16 + 8 * 64);
    }

    #[test]
    fn disabled_shadow_map_packs_no_caster() {
        let rig = studio_rig();
        let refs: Vec<&Light> = rig.iter().collect();
        let settings = ShadowMapSettings {
            enabled: false,
            kind: ShadowMapKind::Basic,
        };
        let uniform = LightsUniform::new(&refs, &settings);
        assert!(!uniform.shadows_enabled());
        assert_eq!(uniform.shadow_caster_count(), 0);
        assert!(uniform.lights.iter().all(|l| l.params[2] == 0.0));
    }

    #[test]
    fn spot_cone_is_encoded_as_cosines() {
        let spot = Light::spot("s", 1.0, [0.0, 10.0, 0.0], std::f32::consts::PI / 6.0, 0.1);
        let gpu = GpuLight::new(&spot, None).unwrap();
        assert_eq!(gpu.position[3], 3.0);
        assert!((gpu.direction[3] - (std::f32::consts::PI / 6.0).cos()).abs() < 1e-6);
        assert!(gpu.color[3] > gpu.direction[3]);
        assert_eq!(gpu.direction[1], -1.0);
    }
}
