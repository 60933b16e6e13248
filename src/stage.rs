//! The stage: everything one rendered page owns, minus the GPU.
//!
//! A [`Stage`] is created with a [`StageConfig`] and the initial
//! [`Viewport`]. It builds the scene (camera plus the light rig), follows
//! viewport changes, integrates the loaded model and advances its animation
//! once per frame. Rendering is left to [`crate::render::Renderer`], which
//! consumes the [`Frame`] snapshots the stage produces. Several stages can
//! coexist, nothing here is global.

use instant::Duration;

use crate::{
    camera::PerspectiveCamera,
    config::{RendererSettings, StageConfig},
    data_structures::{
        light::studio_rig,
        scene_graph::{Scene, SceneObject},
    },
    mixer::AnimationMixer,
    render::Frame,
    resources::{AssetLoadError, ModelAsset},
};

/// Size of the drawing surface in physical pixels and the pixel ratio it was
/// derived with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

impl Viewport {
    pub fn new(width: u32, height: u32, scale_factor: f64) -> Self {
        Self {
            width,
            height,
            scale_factor,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// A minimised window reports a zero sized surface.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size in device independent pixels.
    pub fn logical_size(&self) -> (f64, f64) {
        (
            self.width as f64 / self.scale_factor,
            self.height as f64 / self.scale_factor,
        )
    }
}

/// Where failed loads end up.
pub trait ErrorReporter {
    fn report(&mut self, error: &AssetLoadError);
}

impl<F> ErrorReporter for F
where
    F: FnMut(&AssetLoadError),
{
    fn report(&mut self, error: &AssetLoadError) {
        self(error)
    }
}

/// Logs failures with `log::error!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&mut self, error: &AssetLoadError) {
        log::error!("{}", error);
    }
}

pub struct Stage {
    config: StageConfig,
    scene: Scene,
    viewport: Viewport,
    mixer: Option<AnimationMixer>,
    reporter: Box<dyn ErrorReporter>,
}

impl Stage {
    /// Builds the scene: the camera first, then every light of the rig.
    pub fn new(config: StageConfig, viewport: Viewport) -> Self {
        let mut scene = Scene::new();
        scene.add(SceneObject::Camera(PerspectiveCamera::from_config(
            &config.camera,
            viewport.width,
            viewport.height,
        )));
        for light in studio_rig() {
            scene.add(SceneObject::Light(light));
        }
        Self {
            config,
            scene,
            viewport,
            mixer: None,
            reporter: Box::new(LogReporter),
        }
    }

    /// Replaces the default reporter, which logs failed loads.
    ///
    /// # Arguments
    ///
    /// * `reporter` - receives every failed load exactly once
    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// The configuration the stage was built with.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Surface and shadow settings, a shortcut into [`Stage::config`].
    pub fn renderer_settings(&self) -> &RendererSettings {
        &self.config.renderer
    }

    /// The scene: camera, light rig and every integrated model, in the order
    /// they were added.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// `None` only if the scene was built without a camera.
    pub fn camera(&self) -> Option<&PerspectiveCamera> {
        self.scene.camera()
    }

    /// The last viewport accepted by [`Stage::resize`].
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// The mixer of the current model. `None` until a model is integrated.
    pub fn mixer(&self) -> Option<&AnimationMixer> {
        self.mixer.as_ref()
    }

    /// Mutable access to the mixer, to stop, pause or reweight actions.
    /// `None` until a model is integrated.
    pub fn mixer_mut(&mut self) -> Option<&mut AnimationMixer> {
        self.mixer.as_mut()
    }

    /// Follows a new surface size. Returns `false` and changes nothing for
    /// an empty viewport.
    pub fn resize(&mut self, viewport: Viewport) -> bool {
        if viewport.is_empty() {
            return false;
        }
        self.viewport = viewport;
        if let Some(camera) = self.scene.camera_mut() {
            camera.projection.resize(viewport.width, viewport.height);
            camera.projection.update_projection_matrix();
        }
        true
    }

    /// Advances the animation, if there is one yet.
    pub fn advance(&mut self, elapsed: Duration) {
        let Some(mixer) = self.mixer.as_mut() else {
            return;
        };
        let dt = self.config.animation.step.delta(elapsed);
        match self.scene.model_mut(mixer.root()) {
            Some(model) => mixer.update(dt, model),
            None => log::warn!("Animated model {} is gone from the scene", mixer.root()),
        }
    }

    /// One iteration of the frame loop: advance the animation, then capture
    /// what the renderer has to draw.
    pub fn frame(&mut self, elapsed: Duration) -> Frame {
        self.advance(elapsed);
        Frame::capture(&mut self.scene, &self.config.renderer)
    }

    /// Adds a loaded model to the scene and starts all of its clips.
    ///
    /// Nothing guards against integrating twice: a second call adds a second
    /// model and the mixer is rebound to it.
    pub fn integrate(&mut self, asset: ModelAsset) -> usize {
        let ModelAsset { url, mut model } = asset;
        model.prepare(&self.config.model);
        let clips = model.animations.clone();
        let root = self.scene.add(SceneObject::Model(model));

        let mut mixer = AnimationMixer::new(root);
        for clip in &clips {
            let action = mixer.clip_action(clip);
            action.time_scale = self.config.animation.time_scale;
            action.play();
        }
        log::info!(
            "Added {} to the scene, playing {} clip(s) at {}x",
            url,
            clips.len(),
            self.config.animation.time_scale
        );
        self.mixer = Some(mixer);
        root
    }

    /// Integrates a successful load or reports a failed one. A failure leaves
    /// the scene untouched.
    pub fn finish_load(&mut self, result: Result<ModelAsset, AssetLoadError>) -> Option<usize> {
        match result {
            Ok(asset) => Some(self.integrate(asset)),
            Err(error) => {
                self.reporter.report(&error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> Stage {
        Stage::new(StageConfig::default(), Viewport::new(800, 600, 1.0))
    }

    #[test]
    fn new_stage_holds_camera_and_lights_only() {
        let stage = stage();
        assert_eq!(stage.scene().len(), 9);
        assert!(stage.camera().is_some());
        assert_eq!(stage.scene().lights().count(), 8);
        assert!(stage.mixer().is_none());
    }

    #[test]
    fn camera_matches_initial_viewport() {
        let stage = stage();
        let camera = stage.camera().unwrap();
        assert!((camera.projection.aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn empty_viewport_is_ignored() {
        let mut stage = stage();
        assert!(!stage.resize(Viewport::new(0, 600, 1.0)));
        assert_eq!(stage.viewport(), Viewport::new(800, 600, 1.0));
        assert!((stage.camera().unwrap().projection.aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn logical_size_divides_by_pixel_ratio() {
        let viewport = Viewport::new(1600, 1200, 2.0);
        assert_eq!(viewport.logical_size(), (800.0, 600.0));
    }

    #[test]
    fn frame_without_model_draws_nothing() {
        let mut stage = stage();
        let frame = stage.frame(Duration::from_millis(16));
        assert!(frame.draws.is_empty());
        assert_eq!(frame.lights.light_count(), 7);
    }

    #[test]
    fn closures_report_errors() {
        let mut count = 0;
        let mut reporter = |_: &AssetLoadError| count += 1;
        let error = AssetLoadError {
            url: "x.glb".into(),
            source: anyhow::anyhow!("boom"),
        };
        reporter.report(&error);
        reporter.report(&error);
        assert_eq!(count, 2);
    }
}
