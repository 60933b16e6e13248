//! Camera types and the uniform that feeds them to shaders.
//!
//! The camera is split into a view part ([`Camera`]: where it sits and where
//! it looks) and a [`Projection`] (field of view, aspect, clip planes). Only
//! the projection changes on resize.

use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};

use crate::config::CameraConfig;

/// cgmath builds OpenGL clip space (z in -1..1), wgpu expects z in 0..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Position plus yaw/pitch orientation.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    yaw: Rad<f32>,
    pitch: Rad<f32>,
}

impl Camera {
    pub fn new<V: Into<Point3<f32>>, Y: Into<Rad<f32>>, P: Into<Rad<f32>>>(
        position: V,
        yaw: Y,
        pitch: P,
    ) -> Self {
        Self {
            position: position.into(),
            yaw: yaw.into(),
            pitch: pitch.into(),
        }
    }

    pub fn forward(&self) -> Vector3<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();
        Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw).normalize()
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.position, self.forward(), Vector3::unit_y())
    }
}

/// Perspective projection. The matrix is cached and only rebuilt by
/// [`Projection::update_projection_matrix`].
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    aspect: f32,
    fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
    matrix: Matrix4<f32>,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        let mut projection = Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
            matrix: Matrix4::from_scale(1.0),
        };
        projection.update_projection_matrix();
        projection
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height as f32;
    }

    pub fn update_projection_matrix(&mut self) {
        self.matrix =
            OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar);
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fovy(&self) -> Rad<f32> {
        self.fovy
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        self.matrix
    }
}

/// The scene's camera: a view plus its projection.
#[derive(Clone, Debug, PartialEq)]
pub struct PerspectiveCamera {
    pub camera: Camera,
    pub projection: Projection,
}

impl PerspectiveCamera {
    /// Builds a camera looking down -Z from the configured position.
    pub fn from_config(config: &CameraConfig, width: u32, height: u32) -> Self {
        let camera = Camera::new(config.position, cgmath::Deg(-90.0), cgmath::Deg(0.0));
        let projection = Projection::new(
            width,
            height,
            cgmath::Deg(config.fov_y_degrees),
            config.near,
            config.far,
        );
        Self { camera, projection }
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection.calc_matrix() * self.camera.calc_matrix()
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_position: [f32; 4],
    pub view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_position: [0.0; 4],
            view_proj: Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &PerspectiveCamera) {
        self.view_position = camera.camera.position.to_homogeneous().into();
        self.view_proj = camera.view_projection().into();
    }

    /// Uniform for a camera that is only a matrix, e.g. a light's shadow camera.
    pub fn from_matrix(view_proj: Matrix4<f32>, position: Point3<f32>) -> Self {
        Self {
            view_position: position.to_homogeneous().into(),
            view_proj: view_proj.into(),
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = PerspectiveCamera::from_config(&CameraConfig::default(), 800, 600);
        let forward = camera.camera.forward();
        assert!(forward.x.abs() < 1e-6);
        assert!(forward.y.abs() < 1e-6);
        assert!((forward.z + 1.0).abs() < 1e-6);
        assert_eq!(camera.camera.position, Point3::new(0.0, 2.5, 7.0));
    }

    #[test]
    fn resize_only_changes_matrix_after_update() {
        let mut projection = Projection::new(800, 600, cgmath::Deg(75.0), 0.1, 1000.0);
        let before = projection.calc_matrix();
        projection.resize(600, 600);
        assert_eq!(projection.aspect(), 1.0);
        assert_eq!(projection.calc_matrix(), before);
        projection.update_projection_matrix();
        assert_ne!(projection.calc_matrix(), before);
    }

    #[test]
    fn projection_matrix_encodes_aspect() {
        let projection = Projection::new(1600, 800, cgmath::Deg(90.0), 0.1, 1000.0);
        let m = projection.calc_matrix();
        // with a 90° fov the focal length is 1, x is scaled by 1 / aspect
        assert!((m.y.y - 1.0).abs() < 1e-5);
        assert!((m.x.x - 0.5).abs() < 1e-5);
    }
}
